use thiserror::Error;

/// Errors raised by the shielded-pool primitives
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PrivacyError {
    #[error("invalid field element: {0}")]
    InvalidFieldElement(String),

    #[error("seed is empty; cannot derive an identity")]
    EmptySeed,

    #[error("unsupported tree depth {0} (expected 1..=32)")]
    InvalidDepth(usize),

    #[error("commitment tree of depth {depth} is full")]
    TreeFull { depth: usize },

    #[error("leaf index {index} out of range (tree holds {count} leaves)")]
    LeafOutOfRange { index: u64, count: u64 },

    #[error("invalid spent-set parameters: {0}")]
    InvalidSpentSet(String),
}
