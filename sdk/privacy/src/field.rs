//! Field Elements
//!
//! Everything in the pool lives in the BN254 scalar field, the field the
//! settlement layer's `alt_bn128` Groth16 verifier works over.
//!
//! ```text
//! storage / wire:  "21888242871839275222246405745257275088548364400416034343698204186575808495616"
//! bytes:           32-byte big-endian
//! ```

use ark_ff::{BigInteger, PrimeField};
use ark_std::{UniformRand, rand::Rng};
use num_bigint::BigUint;

pub use ark_bn254::Fr;

use crate::error::PrivacyError;

/// Parse a canonical decimal string into a field element.
///
/// Rejects empty strings, anything that is not plain ASCII digits, and
/// values at or above the field modulus. Stored data that fails this check
/// is corrupt and must not be reduced silently.
pub fn parse_decimal(value: &str) -> Result<Fr, PrivacyError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PrivacyError::InvalidFieldElement(value.to_string()));
    }

    let parsed = value
        .parse::<BigUint>()
        .map_err(|e| PrivacyError::InvalidFieldElement(format!("{value}: {e}")))?;

    let modulus = BigUint::from_bytes_be(&Fr::MODULUS.to_bytes_be());
    if parsed >= modulus {
        return Err(PrivacyError::InvalidFieldElement(format!(
            "{value}: not below the field modulus"
        )));
    }

    Ok(Fr::from_be_bytes_mod_order(&parsed.to_bytes_be()))
}

/// Render a field element as its canonical decimal string
pub fn to_decimal(value: &Fr) -> String {
    BigUint::from_bytes_be(&value.into_bigint().to_bytes_be()).to_string()
}

/// Canonical 32-byte big-endian encoding
pub fn to_bytes_be(value: &Fr) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    let offset = 32usize.saturating_sub(bytes.len());
    out[offset..].copy_from_slice(&bytes[bytes.len().saturating_sub(32)..]);
    out
}

/// Decode a 32-byte big-endian encoding, rejecting non-canonical values
pub fn from_bytes_be(bytes: &[u8; 32]) -> Result<Fr, PrivacyError> {
    let value = Fr::from_be_bytes_mod_order(bytes);
    if &to_bytes_be(&value) != bytes {
        return Err(PrivacyError::InvalidFieldElement(format!(
            "0x{}: not below the field modulus",
            hex_string(bytes)
        )));
    }
    Ok(value)
}

/// Sample a uniformly random field element
pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Fr {
    Fr::rand(rng)
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Serde adapter: field element as a decimal string
pub mod serde_decimal {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::{Fr, parse_decimal, to_decimal};

    pub fn serialize<S: Serializer>(value: &Fr, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_decimal(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fr, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_decimal(&raw).map_err(D::Error::custom)
    }
}

/// Serde adapter: optional field element as a decimal string
pub mod serde_decimal_opt {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use super::{Fr, parse_decimal, to_decimal};

    pub fn serialize<S: Serializer>(value: &Option<Fr>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&to_decimal(v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Fr>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| parse_decimal(&s).map_err(D::Error::custom))
            .transpose()
    }
}

/// Serde adapter: list of field elements as decimal strings
pub mod serde_decimal_vec {
    use serde::{Deserialize, Deserializer, Serializer, de::Error, ser::SerializeSeq};

    use super::{Fr, parse_decimal, to_decimal};

    pub fn serialize<S: Serializer>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&to_decimal(value))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Fr>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| parse_decimal(s).map_err(D::Error::custom))
            .collect()
    }
}

/// Serde adapter: `u64` amount as a decimal string (JSON numbers lose
/// precision above 2^53 in most consumers)
pub mod serde_u64_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u64>().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::{One, Zero};

    const MODULUS: &str =
        "21888242871839275222246405745257275088548364400416034343698204186575808495617";

    #[test]
    fn test_decimal_roundtrip_edges() {
        assert_eq!(parse_decimal("0").unwrap(), Fr::zero());
        assert_eq!(parse_decimal("1").unwrap(), Fr::one());

        let max = -Fr::one();
        let rendered = to_decimal(&max);
        assert_eq!(
            rendered,
            "21888242871839275222246405745257275088548364400416034343698204186575808495616"
        );
        assert_eq!(parse_decimal(&rendered).unwrap(), max);
    }

    #[test]
    fn test_parse_rejects_modulus_and_garbage() {
        assert!(parse_decimal(MODULUS).is_err());
        assert!(parse_decimal("").is_err());
        assert!(parse_decimal("-1").is_err());
        assert!(parse_decimal("0x10").is_err());
        assert!(parse_decimal("12 ").is_err());
    }

    #[test]
    fn test_bytes_be_layout() {
        let bytes = to_bytes_be(&Fr::from(258u64));
        assert_eq!(bytes[31], 2);
        assert_eq!(bytes[30], 1);
        assert!(bytes[..30].iter().all(|b| *b == 0));
        assert_eq!(from_bytes_be(&bytes).unwrap(), Fr::from(258u64));
    }

    #[test]
    fn test_from_bytes_rejects_non_canonical() {
        assert!(from_bytes_be(&[0xffu8; 32]).is_err());
    }
}
