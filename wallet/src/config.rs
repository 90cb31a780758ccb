//! Wallet Configuration
//!
//! Handles loading configuration from:
//! 1. SHROUD_CONFIG env var (explicit path)
//! 2. ./shroud.toml (current directory)
//! 3. ~/.shroud/config.toml (user home)
//!
//! Environment variables take precedence over TOML config.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::chain::retry::RetryPolicy;

const CONFIG_FILE_NAME: &str = "config.toml";
const LOCAL_CONFIG_FILE_NAME: &str = "shroud.toml";
const CONFIG_DIR_NAME: &str = ".shroud";

// ============================================================================
// Default Constants
// ============================================================================

const DEFAULT_POOL_PROGRAM: &str = "Shroud1111111111111111111111111111111111111";
const DEFAULT_TOKEN_MINT: &str = "So11111111111111111111111111111111111111112";
const DEFAULT_TREE_DEPTH: usize = shroud_privacy::DEFAULT_TREE_DEPTH;
const DEFAULT_PROVER_TIMEOUT_SECS: u64 = 300;
const DEFAULT_PAGE_SIZE: usize = 1000;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 1_400_000;
const DEFAULT_COMPUTE_UNIT_PRICE: u64 = 1000;
const DEFAULT_CONFIRM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONFIRM_POLL_MS: u64 = 500;
const DEFAULT_STORAGE_DIR: &str = "./shroud-wallet";

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub tree: TreeConfig,
    #[serde(default)]
    pub prover: ProverConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub submit: SubmitConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Shielded pool deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_pool_program")]
    pub program_id: String,
    #[serde(default = "default_token_mint")]
    pub token_mint: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            program_id: default_pool_program(),
            token_mint: default_token_mint(),
        }
    }
}

fn default_pool_program() -> String {
    DEFAULT_POOL_PROGRAM.into()
}
fn default_token_mint() -> String {
    DEFAULT_TOKEN_MINT.into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default = "default_tree_depth")]
    pub depth: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            depth: default_tree_depth(),
        }
    }
}

fn default_tree_depth() -> usize {
    DEFAULT_TREE_DEPTH
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProverConfig {
    /// Fixed timeout for a single proof request
    #[serde(default = "default_prover_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_prover_timeout(),
        }
    }
}

fn default_prover_timeout() -> u64 {
    DEFAULT_PROVER_TIMEOUT_SECS
}

/// History scanning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff on rate limits
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_base_ms() -> u64 {
    DEFAULT_RETRY_BASE_MS
}

/// Transaction submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitConfig {
    #[serde(default = "default_compute_unit_limit")]
    pub compute_unit_limit: u32,
    /// Priority fee in micro-lamports per compute unit
    #[serde(default = "default_compute_unit_price")]
    pub compute_unit_price: u64,
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
    #[serde(default = "default_confirm_poll")]
    pub confirm_poll_ms: u64,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            compute_unit_limit: default_compute_unit_limit(),
            compute_unit_price: default_compute_unit_price(),
            confirm_timeout_secs: default_confirm_timeout(),
            confirm_poll_ms: default_confirm_poll(),
        }
    }
}

fn default_compute_unit_limit() -> u32 {
    DEFAULT_COMPUTE_UNIT_LIMIT
}
fn default_compute_unit_price() -> u64 {
    DEFAULT_COMPUTE_UNIT_PRICE
}
fn default_confirm_timeout() -> u64 {
    DEFAULT_CONFIRM_TIMEOUT_SECS
}
fn default_confirm_poll() -> u64 {
    DEFAULT_CONFIRM_POLL_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

fn default_storage_dir() -> String {
    DEFAULT_STORAGE_DIR.into()
}

// ============================================================================
// Environment Variable Helpers
// ============================================================================

fn override_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut String) {
    if let Some(v) = lookup(key) {
        *field = v;
    }
}

fn override_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut T) {
    if let Some(v) = lookup(key) {
        match v.parse() {
            Ok(parsed) => *field = parsed,
            Err(_) => log::warn!("Ignoring unparseable {key}={v}"),
        }
    }
}

// ============================================================================
// Implementation
// ============================================================================

impl WalletConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::read_file(&path)?,
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse wallet config")
    }

    fn read_file(path: &Path) -> Result<Self> {
        log::info!("Loading config from: {}", path.display());
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("SHROUD_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_path = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        Self::default_config_path().filter(|p| p.exists())
    }

    /// Apply overrides from a variable lookup (the process environment in `load`)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        override_string(&lookup, "SHROUD_POOL_PROGRAM_ID", &mut self.pool.program_id);
        override_string(&lookup, "SHROUD_TOKEN_MINT", &mut self.pool.token_mint);
        override_parse(&lookup, "SHROUD_TREE_DEPTH", &mut self.tree.depth);
        override_parse(&lookup, "SHROUD_PROVER_TIMEOUT_SECS", &mut self.prover.timeout_secs);
        override_string(&lookup, "SHROUD_STORAGE_DIR", &mut self.storage.dir);
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    pub fn program_id(&self) -> Result<Pubkey> {
        Pubkey::from_str(&self.pool.program_id)
            .with_context(|| format!("Invalid pool program id: {}", self.pool.program_id))
    }

    pub fn token_mint(&self) -> Result<Pubkey> {
        Pubkey::from_str(&self.pool.token_mint)
            .with_context(|| format!("Invalid token mint: {}", self.pool.token_mint))
    }

    pub fn prover_timeout(&self) -> Duration {
        Duration::from_secs(self.prover.timeout_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.submit.confirm_timeout_secs)
    }

    pub fn confirm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.submit.confirm_poll_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sync.max_retries,
            base_delay: Duration::from_millis(self.sync.retry_base_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = WalletConfig::default();
        assert_eq!(config.tree.depth, 20);
        assert_eq!(config.prover_timeout(), Duration::from_secs(300));
        assert!(config.program_id().is_ok());
        assert!(config.token_mint().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = WalletConfig::from_toml_str(
            r#"
            [tree]
            depth = 8

            [submit]
            compute_unit_price = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.tree.depth, 8);
        assert_eq!(config.submit.compute_unit_price, 5);
        assert_eq!(config.submit.compute_unit_limit, DEFAULT_COMPUTE_UNIT_LIMIT);
        assert_eq!(config.sync.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SHROUD_TREE_DEPTH", "12"),
            ("SHROUD_PROVER_TIMEOUT_SECS", "not-a-number"),
            ("SHROUD_STORAGE_DIR", "/tmp/shroud"),
        ]);

        let mut config = WalletConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.tree.depth, 12);
        assert_eq!(config.prover.timeout_secs, DEFAULT_PROVER_TIMEOUT_SECS);
        assert_eq!(config.storage.dir, "/tmp/shroud");
    }

    #[test]
    fn test_sample_parses() {
        let sample = WalletConfig::generate_sample();
        let parsed = WalletConfig::from_toml_str(&sample).unwrap();
        assert_eq!(parsed.pool.program_id, DEFAULT_POOL_PROGRAM);
    }
}
