//! Crate-wide constants shared by the circuits and host-side orchestration.

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{find_poseidon_ark_and_mds, PoseidonConfig};
use ark_ff::PrimeField;
use std::sync::OnceLock;

/// Largest supported Merkle tree depth for identity, grade and credential groups.
pub const MAX_TREE_DEPTH: usize = 16;

/// Largest supported test height (answer vectors hold `2^test_height` entries).
pub const MAX_TEST_HEIGHT: u8 = 6;

/// Grades and weights are expressed on a 0..=100 scale.
pub const MAX_GRADE: u8 = 100;

/// Longest comment (in bytes) accepted when rating a credential issuer.
pub const MAX_COMMENT_LENGTH: usize = 1024;

/// External nullifier scope of the ownership proof attached to credential-restricted tests.
pub const CREDENTIAL_RESTRICTED_TEST_SCOPE: &str = "bq-credential-restricted-test";

/// External nullifier scope of the grade claim attached to grade-restricted tests.
pub const GRADE_RESTRICTED_TEST_SCOPE: &str = "bq-grade-restricted-test";

/// External nullifier scope used when rating a credential issuer.
pub const RATE_ISSUER_SCOPE: &str = "bq-rate";

/// Text of the sentinel answer used to pad open answers up to `2^test_height`.
pub const EMPTY_ANSWER: &str = "";

// Poseidon sponge configuration.
//
// Width-3 sponge (rate=2, capacity=1): every hash in this crate takes one or two field
// elements, so a single permutation absorbs the whole input.
pub const POSEIDON_RATE: usize = 2;
pub const POSEIDON_CAPACITY: usize = 1;

pub const POSEIDON_FULL_ROUNDS: usize = 8;
pub const POSEIDON_PARTIAL_ROUNDS: usize = 57;

/// Poseidon S-box exponent (alpha).
pub const POSEIDON_ALPHA: u64 = 5;

static POSEIDON_CONFIG: OnceLock<PoseidonConfig<Fr>> = OnceLock::new();

/// Deterministically derived Poseidon parameters for BN254::Fr.
///
/// Both the native hasher and the in-circuit gadget read the same constants. Derivation is
/// not free, so the result is computed once per process.
pub fn poseidon_config() -> &'static PoseidonConfig<Fr> {
    POSEIDON_CONFIG.get_or_init(|| {
        let prime_bits = Fr::MODULUS_BIT_SIZE as u64;

        let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
            prime_bits,
            POSEIDON_RATE,
            POSEIDON_FULL_ROUNDS as u64,
            POSEIDON_PARTIAL_ROUNDS as u64,
            0,
        );

        PoseidonConfig::new(
            POSEIDON_FULL_ROUNDS,
            POSEIDON_PARTIAL_ROUNDS,
            POSEIDON_ALPHA,
            mds,
            ark,
            POSEIDON_RATE,
            POSEIDON_CAPACITY,
        )
    })
}
