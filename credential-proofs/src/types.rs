//! Types shared between grading, the circuits and the host-side prover/verifier.

use crate::constants::{EMPTY_ANSWER, MAX_GRADE, MAX_TEST_HEIGHT};
use crate::error::CredentialError;
use crate::hash::{hash_pair, hash_str, poseidon};
use ark_bn254::Fr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Published, immutable description of one test credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Log2 of the answer vector length.
    pub test_height: u8,
    pub n_questions: u8,
    pub minimum_grade: u8,
    pub multiple_choice_weight: u8,
    /// Root of the canonical multiple-choice answer key.
    #[serde(with = "fr_hex")]
    pub multiple_choice_root: Fr,
    #[serde(with = "fr_hex")]
    pub open_answers_hashes_root: Fr,
    /// Padded to `2^test_height` with the hash of the empty answer.
    #[serde(with = "fr_hex_vec")]
    pub open_answers_hashes: Vec<Fr>,
    pub admin: Address,
    /// 0 when the test is not restricted to holders of another credential.
    pub required_credential: u64,
    /// 0 when the restriction (if any) is not grade based.
    pub required_credential_grade_threshold: u8,
}

impl TestConfig {
    /// Number of answer slots, `2^test_height`; saturates for heights `validate` rejects.
    pub fn answer_slots(&self) -> usize {
        1usize
            .checked_shl(u32::from(self.test_height))
            .unwrap_or(usize::MAX)
    }

    /// Check every structural invariant of a published configuration.
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.test_height == 0 || self.test_height > MAX_TEST_HEIGHT {
            return Err(CredentialError::validation(format!(
                "test height must be between 1 and {MAX_TEST_HEIGHT}, got {}",
                self.test_height
            )));
        }
        if self.minimum_grade > MAX_GRADE {
            return Err(CredentialError::validation("minimum grade must be at most 100"));
        }
        if self.multiple_choice_weight > MAX_GRADE {
            return Err(CredentialError::validation(
                "multiple choice weight must be at most 100",
            ));
        }
        if self.required_credential_grade_threshold > MAX_GRADE {
            return Err(CredentialError::validation(
                "required credential grade threshold must be at most 100",
            ));
        }
        if self.required_credential_grade_threshold != 0 && self.required_credential == 0 {
            return Err(CredentialError::validation(
                "a grade threshold needs a required credential",
            ));
        }
        if usize::from(self.n_questions) > self.answer_slots() {
            return Err(CredentialError::validation(format!(
                "{} questions do not fit in a test of height {}",
                self.n_questions, self.test_height
            )));
        }
        if self.multiple_choice_weight != MAX_GRADE && self.n_questions == 0 {
            return Err(CredentialError::validation(
                "tests with open answers need at least one question",
            ));
        }
        if self.open_answers_hashes.len() != self.answer_slots() {
            return Err(CredentialError::validation(format!(
                "expected {} open answer hashes, got {}",
                self.answer_slots(),
                self.open_answers_hashes.len()
            )));
        }
        let empty = open_answer_hash(EMPTY_ANSWER);
        if self.open_answers_hashes[usize::from(self.n_questions)..]
            .iter()
            .any(|h| *h != empty)
        {
            return Err(CredentialError::validation(
                "open answer hashes past the last question must be the empty answer",
            ));
        }
        if root_from_leaves(&self.open_answers_hashes) != self.open_answers_hashes_root {
            return Err(CredentialError::validation(
                "open answer hashes do not match their published root",
            ));
        }
        Ok(())
    }
}

/// Raw answers as submitted by a test taker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestAnswers {
    pub multiple_choice_answers: Vec<u32>,
    pub open_answers: Vec<String>,
}

/// Outcome of grading one set of answers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    pub grade: u8,
    pub minimum_grade: u8,
    pub pass: bool,
    /// Number of open answers actually submitted.
    pub n_questions: usize,
    /// Multiple-choice sub-score on a 0..=100 scale.
    pub multiple_choice_grade: f64,
    /// Open-answer sub-score on a 0..=100 scale.
    pub open_answer_grade: f64,
    pub multiple_choice_weight: u8,
    /// Per-question correctness of the submitted open answers.
    pub open_answer_results: Vec<bool>,
}

/// Secret half of a Semaphore-style identity. Never leaves the prover.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentitySecret {
    pub nullifier: Fr,
    pub trapdoor: Fr,
}

impl IdentitySecret {
    pub fn new(nullifier: Fr, trapdoor: Fr) -> Self {
        Self { nullifier, trapdoor }
    }
}

impl fmt::Debug for IdentitySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentitySecret(..)")
    }
}

/// 20-byte account address of a credential admin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 20]);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| format!("invalid address hex: {e}"))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| format!("address '{s}' is not 20 bytes long"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Merkle root of a power-of-two leaf vector, hashing pairs level by level.
///
/// Used for the multiple-choice key and the open answer hashes; MUST match
/// `circuit::root_from_leaves_var`.
pub fn root_from_leaves(leaves: &[Fr]) -> Fr {
    debug_assert!(leaves.len().is_power_of_two());
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| hash_pair(pair[0], pair[1]))
            .collect();
    }
    level[0]
}

/// Multiple-choice answers padded with zeros to `2^test_height` field elements.
pub fn padded_multiple_choice_answers(answers: &[u32], test_height: u8) -> Vec<Fr> {
    let slots = 1usize << test_height;
    answers
        .iter()
        .map(|a| Fr::from(u64::from(*a)))
        .chain(std::iter::repeat(Fr::from(0u64)))
        .take(slots)
        .collect()
}

/// Open answers padded with the empty-answer sentinel to `2^test_height` entries.
pub fn padded_open_answers(answers: &[String], test_height: u8) -> Vec<String> {
    let slots = 1usize << test_height;
    answers
        .iter()
        .cloned()
        .chain(std::iter::repeat(String::new()))
        .take(slots)
        .collect()
}

/// Published key entry for an open answer text: `H(hash(text))`.
pub fn open_answer_hash(text: &str) -> Fr {
    poseidon(&[hash_str(text)])
}

/// Key entries for the open answers of a test, padded for the given height.
pub fn open_answers_hashes(answers: &[&str], test_height: u8) -> Vec<Fr> {
    let slots = 1usize << test_height;
    answers
        .iter()
        .map(|a| open_answer_hash(a))
        .chain(std::iter::repeat(open_answer_hash(EMPTY_ANSWER)))
        .take(slots)
        .collect()
}

/// Serde adapter: field element as a `0x`-prefixed big-endian hex word.
pub mod fr_hex {
    use crate::hash::{fr_from_hex, fr_to_hex};
    use ark_bn254::Fr;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Fr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&fr_to_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Fr, D::Error> {
        let s = String::deserialize(d)?;
        fr_from_hex(&s).map_err(serde::de::Error::custom)
    }
}

pub mod fr_hex_vec {
    use crate::hash::{fr_from_hex, fr_to_hex};
    use ark_bn254::Fr;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[Fr], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(values.iter().map(fr_to_hex))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Fr>, D::Error> {
        let items = Vec::<String>::deserialize(d)?;
        items
            .iter()
            .map(|s| fr_from_hex(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Serde adapter for raw 32-byte words (signals).
pub mod word_hex {
    use crate::hash::Word;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(word: &Word, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(word)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Word, D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s))
            .map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected a 32-byte word"))
    }
}

/// Serde adapter: Groth16 proof as base64 of its compressed arkworks encoding.
pub mod proof_b64 {
    use ark_bn254::Bn254;
    use ark_groth16::Proof;
    use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(proof: &Proof<Bn254>, s: S) -> Result<S::Ok, S::Error> {
        let mut bytes = Vec::new();
        proof
            .serialize_compressed(&mut bytes)
            .map_err(serde::ser::Error::custom)?;
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Proof<Bn254>, D::Error> {
        let s = String::deserialize(d)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)?;
        Proof::<Bn254>::deserialize_compressed(&bytes[..]).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_config;

    #[test]
    fn sample_config_is_valid() {
        assert_eq!(sample_config().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_broken_configs() {
        let mut config = sample_config();
        config.open_answers_hashes.pop();
        assert!(matches!(config.validate(), Err(CredentialError::Validation(_))));

        let mut config = sample_config();
        config.open_answers_hashes[0] = open_answer_hash("chuck's");
        assert!(matches!(config.validate(), Err(CredentialError::Validation(_))));

        let mut config = sample_config();
        config.required_credential_grade_threshold = 80;
        assert!(matches!(config.validate(), Err(CredentialError::Validation(_))));

        let mut config = sample_config();
        config.n_questions = 17;
        assert!(matches!(config.validate(), Err(CredentialError::Validation(_))));

        let mut config = sample_config();
        config.minimum_grade = 101;
        assert!(matches!(config.validate(), Err(CredentialError::Validation(_))));
    }

    #[test]
    fn padding_reaches_answer_slots() {
        let mc = padded_multiple_choice_answers(&[3, 1], 2);
        assert_eq!(mc, vec![Fr::from(3u64), Fr::from(1u64), Fr::from(0u64), Fr::from(0u64)]);

        let open = padded_open_answers(&["a".to_string()], 2);
        assert_eq!(open, vec!["a", "", "", ""]);
    }

    #[test]
    fn config_serializes_field_elements_as_hex() {
        let config = sample_config();
        let json = serde_json::to_value(&config).unwrap();
        assert!(json["multiple_choice_root"].as_str().unwrap().starts_with("0x"));
        assert_eq!(json["admin"], "0x00000000000000000000000000000000000000aa");
        let back: TestConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
