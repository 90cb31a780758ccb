//! Note export format
//!
//! ```text
//! shroud-note:v1:<base64(JSON)>
//!
//! JSON = { "amount": "5", "owner": "…", "randomness": "…",
//!          "tokenMint": "…", "commitment": "…", "leafIndex": "3" }
//! ```
//!
//! Every value is a decimal string. `tokenMint` carries the mint's field
//! tag, the value committed to in the note.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use shroud_privacy::field;
use shroud_privacy::Note;

use crate::error::{ImportError, WalletError};

pub const EXPORT_PREFIX: &str = "shroud-note:v1:";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ExportedNote {
    amount: String,
    owner: String,
    randomness: String,
    token_mint: String,
    commitment: String,
    leaf_index: String,
}

/// Encode a placed note
pub fn encode_note(note: &Note) -> Result<String, WalletError> {
    let leaf_index = note.leaf_index.ok_or_else(|| {
        WalletError::LedgerCorruption("cannot export a note without a leaf index".into())
    })?;

    let exported = ExportedNote {
        amount: note.amount.to_string(),
        owner: field::to_decimal(&note.owner),
        randomness: field::to_decimal(&note.randomness),
        token_mint: field::to_decimal(&note.token_tag),
        commitment: field::to_decimal(&note.commitment),
        leaf_index: leaf_index.to_string(),
    };
    let json = serde_json::to_vec(&exported)
        .map_err(|e| WalletError::LedgerCorruption(format!("note export: {e}")))?;
    Ok(format!("{EXPORT_PREFIX}{}", STANDARD.encode(json)))
}

/// Decode and check the commitment; ownership and chain presence are the
/// caller's to verify
pub fn decode_note(encoded: &str) -> Result<Note, ImportError> {
    let payload = encoded
        .trim()
        .strip_prefix(EXPORT_PREFIX)
        .ok_or_else(|| ImportError::Malformed("missing export tag".into()))?;
    let json = STANDARD
        .decode(payload)
        .map_err(|e| ImportError::Malformed(format!("base64: {e}")))?;
    let exported: ExportedNote =
        serde_json::from_slice(&json).map_err(|e| ImportError::Malformed(format!("json: {e}")))?;

    let amount = exported
        .amount
        .parse::<u64>()
        .map_err(|e| ImportError::Malformed(format!("amount: {e}")))?;
    let leaf_index = exported
        .leaf_index
        .parse::<u64>()
        .map_err(|e| ImportError::Malformed(format!("leafIndex: {e}")))?;
    let owner = parse_field("owner", &exported.owner)?;
    let randomness = parse_field("randomness", &exported.randomness)?;
    let token_tag = parse_field("tokenMint", &exported.token_mint)?;
    let commitment = parse_field("commitment", &exported.commitment)?;

    let mut note = Note::with_randomness(amount, owner, randomness, token_tag);
    if note.commitment != commitment {
        return Err(ImportError::CommitmentMismatch);
    }
    note.leaf_index = Some(leaf_index);
    Ok(note)
}

fn parse_field(name: &str, value: &str) -> Result<shroud_privacy::Fr, ImportError> {
    field::parse_decimal(value).map_err(|e| ImportError::Malformed(format!("{name}: {e}")))
}
