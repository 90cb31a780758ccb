//! Proof encoding for the on-chain verifier
//!
//! The prover returns snarkjs-style decimal coordinates. The pool program
//! expects fixed 32-byte big-endian limbs:
//!
//! ```text
//! A (G1):  x || y                          64 bytes
//! B (G2):  x.c1 || x.c0 || y.c1 || y.c0    128 bytes
//! C (G1):  x || y                          64 bytes
//! ```

use ark_bn254::Fq;
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::WalletError;

pub const PROOF_LEN: usize = 256;

/// Proof as returned by the prover (projective coordinates, decimal strings)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
}

/// Groth16 proof in the verifier's byte layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Groth16Proof {
    pub a: [u8; 64],
    pub b: [u8; 128],
    pub c: [u8; 64],
}

impl Groth16Proof {
    pub fn to_bytes(&self) -> [u8; PROOF_LEN] {
        let mut out = [0u8; PROOF_LEN];
        out[..64].copy_from_slice(&self.a);
        out[64..192].copy_from_slice(&self.b);
        out[192..].copy_from_slice(&self.c);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != PROOF_LEN {
            return None;
        }
        let mut proof = Self {
            a: [0u8; 64],
            b: [0u8; 128],
            c: [0u8; 64],
        };
        proof.a.copy_from_slice(&bytes[..64]);
        proof.b.copy_from_slice(&bytes[64..192]);
        proof.c.copy_from_slice(&bytes[192..]);
        Some(proof)
    }
}

impl RawProof {
    /// Convert to the verifier layout, range-checking every coordinate
    pub fn to_groth16(&self) -> Result<Groth16Proof, WalletError> {
        let a = g1_bytes("pi_a", &self.pi_a)?;
        let c = g1_bytes("pi_c", &self.pi_c)?;

        if self.pi_b.len() < 2 || self.pi_b[0].len() != 2 || self.pi_b[1].len() != 2 {
            return Err(malformed("pi_b must hold two coordinate pairs"));
        }

        let mut b = [0u8; 128];
        b[..32].copy_from_slice(&coordinate("pi_b.x.c1", &self.pi_b[0][1])?);
        b[32..64].copy_from_slice(&coordinate("pi_b.x.c0", &self.pi_b[0][0])?);
        b[64..96].copy_from_slice(&coordinate("pi_b.y.c1", &self.pi_b[1][1])?);
        b[96..].copy_from_slice(&coordinate("pi_b.y.c0", &self.pi_b[1][0])?);

        Ok(Groth16Proof { a, b, c })
    }
}

fn g1_bytes(name: &str, point: &[String]) -> Result<[u8; 64], WalletError> {
    if point.len() < 2 {
        return Err(malformed(&format!("{name} must hold x and y")));
    }
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(&coordinate(name, &point[0])?);
    out[32..].copy_from_slice(&coordinate(name, &point[1])?);
    Ok(out)
}

fn coordinate(name: &str, value: &str) -> Result<[u8; 32], WalletError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(&format!("{name}: {value:?} is not a decimal integer")));
    }
    let parsed = value
        .parse::<BigUint>()
        .map_err(|e| malformed(&format!("{name}: {e}")))?;

    let modulus = BigUint::from_bytes_be(&Fq::MODULUS.to_bytes_be());
    if parsed >= modulus {
        return Err(malformed(&format!("{name}: coordinate exceeds the base field")));
    }

    let bytes = parsed.to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

fn malformed(reason: &str) -> WalletError {
    WalletError::ProofGeneration(format!("malformed proof: {reason}"))
}
