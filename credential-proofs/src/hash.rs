//! Native hash functions and 32-byte word helpers.
//!
//! `poseidon` is the in-field hash used for commitments and Merkle nodes; it MUST stay in sync
//! with `circuit::poseidon_var`. `hash_bytes` maps arbitrary bytes (answer texts, scopes,
//! signals, group ids) into the field via keccak256 with the top byte dropped.

use crate::constants::poseidon_config;
use crate::error::CredentialError;
use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::PoseidonSponge;
use ark_crypto_primitives::sponge::CryptographicSponge;
use ark_ff::{BigInteger, PrimeField};
use sha3::{Digest, Keccak256};

/// A big-endian 32-byte word, the unit of every on-chain encoding in this crate.
pub type Word = [u8; 32];

/// Poseidon over one or two field elements.
pub fn poseidon(inputs: &[Fr]) -> Fr {
    let mut sponge = PoseidonSponge::<Fr>::new(poseidon_config());
    sponge.absorb(&inputs);
    sponge.squeeze_field_elements::<Fr>(1)[0]
}

/// `H(left, right)`.
pub fn hash_pair(left: Fr, right: Fr) -> Fr {
    poseidon(&[left, right])
}

pub fn keccak256(bytes: &[u8]) -> Word {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(bytes));
    out
}

/// keccak256 shifted right by one byte, so the result is always a canonical field element.
pub fn hash_bytes(bytes: &[u8]) -> Fr {
    let digest = keccak256(bytes);
    let mut shifted = [0u8; 32];
    shifted[1..].copy_from_slice(&digest[..31]);
    Fr::from_be_bytes_mod_order(&shifted)
}

/// Field representation of an answer text.
pub fn hash_str(text: &str) -> Fr {
    hash_bytes(text.as_bytes())
}

/// Hash of an external nullifier scope, encoded as a right-padded bytes32 string.
pub fn hash_scope(scope: &str) -> Result<Fr, CredentialError> {
    let bytes = scope.as_bytes();
    if bytes.len() > 31 {
        return Err(CredentialError::validation(format!(
            "external nullifier '{scope}' does not fit in bytes32"
        )));
    }
    let mut word = [0u8; 32];
    word[..bytes.len()].copy_from_slice(bytes);
    Ok(hash_bytes(&word))
}

/// Hash of an unsigned integer encoded as a uint256 word.
pub fn hash_u64(value: u64) -> Fr {
    hash_bytes(&u64_word(value))
}

pub fn u64_word(value: u64) -> Word {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn fr_to_word(value: &Fr) -> Word {
    let bytes = value.into_bigint().to_bytes_be();
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    word
}

/// Parse a word as a field element, rejecting values at or above the modulus.
pub fn fr_from_word(word: &Word) -> Option<Fr> {
    let value = Fr::from_be_bytes_mod_order(word);
    (fr_to_word(&value) == *word).then_some(value)
}

/// Read a small unsigned integer from a field element (low limb only).
pub(crate) fn fr_low_u64(value: &Fr) -> u64 {
    value.into_bigint().as_ref()[0]
}

/// The field element as a `u8`, or `None` when it is 256 or larger.
pub(crate) fn fr_to_u8(value: &Fr) -> Option<u8> {
    let bigint = value.into_bigint();
    let limbs = bigint.as_ref();
    if limbs[1..].iter().any(|limb| *limb != 0) {
        return None;
    }
    u8::try_from(limbs[0]).ok()
}

pub fn fr_to_hex(value: &Fr) -> String {
    format!("0x{}", hex::encode(fr_to_word(value)))
}

pub fn fr_from_hex(s: &str) -> Result<Fr, String> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() || digits.len() > 64 {
        return Err(format!("invalid field element hex '{s}'"));
    }
    let padded = format!("{digits:0>64}");
    let bytes = hex::decode(padded).map_err(|e| format!("invalid hex: {e}"))?;
    let mut word = [0u8; 32];
    word.copy_from_slice(&bytes);
    fr_from_word(&word).ok_or_else(|| format!("'{s}' is not a canonical field element"))
}

/// `abi.encode(uint, uint, ...)`: static words are simply concatenated.
pub fn abi_encode_words(words: &[Word]) -> Vec<u8> {
    words.iter().flat_map(|w| w.iter().copied()).collect()
}

/// `abi.encode(uint, string)`.
pub fn abi_encode_uint_string(value: u64, text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(32 * 3 + bytes.len().div_ceil(32) * 32);
    out.extend_from_slice(&u64_word(value));
    // Head: offset of the dynamic string, right after the two head words.
    out.extend_from_slice(&u64_word(64));
    out.extend_from_slice(&u64_word(bytes.len() as u64));
    out.extend_from_slice(bytes);
    out.resize(out.len() + (32 - bytes.len() % 32) % 32, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_bytes_fits_in_248_bits() {
        let word = fr_to_word(&hash_str("sneed's"));
        assert_eq!(word[0], 0);
        assert_eq!(&word[1..], &keccak256(b"sneed's")[..31]);
    }

    #[test]
    fn poseidon_is_order_sensitive() {
        let a = Fr::from(1u64);
        let b = Fr::from(2u64);
        assert_eq!(hash_pair(a, b), hash_pair(a, b));
        assert_ne!(hash_pair(a, b), hash_pair(b, a));
        assert_ne!(poseidon(&[a]), hash_pair(a, Fr::from(0u64)));
    }

    #[test]
    fn scope_longer_than_bytes32_is_rejected() {
        assert!(hash_scope("bq-rate").is_ok());
        let err = hash_scope(&"x".repeat(32)).unwrap_err();
        assert!(matches!(err, CredentialError::Validation(_)));
    }

    #[test]
    fn words_reject_non_canonical_field_elements() {
        assert_eq!(fr_from_word(&[0xff; 32]), None);
        let x = Fr::from(123_456_789u64);
        assert_eq!(fr_from_word(&fr_to_word(&x)), Some(x));
        assert_eq!(fr_from_hex("0x75bcd15"), Ok(x));
        assert!(fr_from_hex("0xzz").is_err());
    }

    #[test]
    fn abi_encodes_uint_and_string() {
        let encoded = abi_encode_uint_string(35, "treefiddy");
        assert_eq!(encoded.len(), 128);
        assert_eq!(encoded[31], 35);
        assert_eq!(encoded[63], 64);
        assert_eq!(encoded[95], 9);
        assert_eq!(&encoded[96..105], b"treefiddy");
        assert!(encoded[105..].iter().all(|b| *b == 0));

        // Empty strings carry no data words.
        assert_eq!(abi_encode_uint_string(0, "").len(), 96);
    }
}
