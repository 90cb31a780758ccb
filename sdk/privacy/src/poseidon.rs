//! Poseidon Hash
//!
//! Fixed-arity Poseidon over BN254 Fr, shared by commitments, nullifiers,
//! key derivation and the Merkle accumulator.
//!
//! ```text
//! Hash(x_1, .., x_n) = Poseidon.squeeze(absorb(n, x_1, .., x_n))
//! ```
//!
//! The arity is absorbed first so inputs of different lengths never share a
//! sponge state (`Hash(x)` != `Hash(x, 0)`).

use std::sync::OnceLock;

use ark_crypto_primitives::sponge::{
    CryptographicSponge,
    poseidon::{PoseidonConfig, PoseidonSponge, find_poseidon_ark_and_mds},
};

use crate::field::Fr;

static CONFIG: OnceLock<PoseidonConfig<Fr>> = OnceLock::new();

/// Hash an ordered list of field elements
pub fn hash(inputs: &[Fr]) -> Fr {
    let mut sponge = PoseidonSponge::new(config());

    sponge.absorb(&Fr::from(inputs.len() as u64));
    for input in inputs {
        sponge.absorb(input);
    }

    sponge.squeeze_field_elements::<Fr>(1)[0]
}

/// Hash two children into their parent
pub fn hash_pair(left: &Fr, right: &Fr) -> Fr {
    hash(&[*left, *right])
}

/// Shared Poseidon parameters, generated on first use
///
/// Field: BN254 Fr (254 bits)
/// Rate: 2, Capacity: 1
/// Security: 128 bits
pub fn config() -> &'static PoseidonConfig<Fr> {
    CONFIG.get_or_init(|| {
        let prime_bits: u64 = 254;
        let rate: usize = 2;
        let capacity: usize = 1;
        let full_rounds: u64 = 8;
        let partial_rounds: u64 = 57;
        let alpha: u64 = 5;
        let skip_matrices: u64 = 0;

        let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
            prime_bits,
            rate,
            full_rounds,
            partial_rounds,
            skip_matrices,
        );

        PoseidonConfig::new(
            full_rounds as usize,
            partial_rounds as usize,
            alpha,
            mds,
            ark,
            rate,
            capacity,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::Zero;

    #[test]
    fn test_hash_deterministic() {
        let a = hash(&[Fr::from(1u64), Fr::from(2u64)]);
        let b = hash(&[Fr::from(1u64), Fr::from(2u64)]);
        assert_eq!(a, b, "same inputs should produce same hash");
    }

    #[test]
    fn test_hash_order_sensitive() {
        let a = hash_pair(&Fr::from(1u64), &Fr::from(2u64));
        let b = hash_pair(&Fr::from(2u64), &Fr::from(1u64));
        assert_ne!(a, b, "pair hashing must not be commutative");
    }

    #[test]
    fn test_arity_separation() {
        let x = Fr::from(7u64);
        assert_ne!(hash(&[x]), hash(&[x, Fr::zero()]));
        assert_ne!(hash(&[]), hash(&[Fr::zero()]));
    }
}
