//! Fixed-width 32-byte-word encodings consumed by the on-chain registry.
//!
//! Test config layout:
//! `[testHeight, minimumGrade, multipleChoiceWeight, nQuestions, admin, requiredCredential,
//! requiredCredentialGradeThreshold, multipleChoiceRoot, openAnswersHashesRoot,
//! openAnswersHashes[2^testHeight]]`.
//!
//! Credential update layout: `[policyTag, testPassed, identityCommitment, newIdentityTreeRoot,
//! gradeCommitment, newGradeTreeRoot, proof[8]]` followed, for restricted policies, by
//! `[merkleTreeRoot, nullifierHash, proof[8]]` (ownership) or
//! `[gradeTreeRoot, nullifierHash, gradeThreshold, proof[8]]` (grade claim).

use crate::constants::MAX_TEST_HEIGHT;
use crate::error::CredentialError;
use crate::hash::{fr_from_word, fr_to_word, u64_word, Word};
use crate::orchestrator::{Policy, ProofResult};
use crate::types::{Address, TestConfig};
use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_ec::AffineRepr;
use ark_ff::{BigInteger, PrimeField, Zero};
use ark_groth16::Proof;
use serde::{Deserialize, Serialize};

/// Number of fixed words before the open answer hashes.
pub const TEST_CONFIG_HEADER_WORDS: usize = 9;

/// A Groth16 proof as eight big-endian coordinate words.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedProof(#[serde(with = "packed_words")] pub [Word; 8]);

fn field_to_word<F: PrimeField>(value: &F) -> Word {
    let bytes = value.into_bigint().to_bytes_be();
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    word
}

fn fq_from_word(word: &Word) -> Result<Fq, CredentialError> {
    let value = Fq::from_be_bytes_mod_order(word);
    if field_to_word(&value) != *word {
        return Err(CredentialError::validation(
            "proof coordinate is not a canonical base field element",
        ));
    }
    Ok(value)
}

impl PackedProof {
    /// `[a.x, a.y, b.x.c1, b.x.c0, b.y.c1, b.y.c0, c.x, c.y]`; the point at infinity packs as
    /// zero coordinates.
    pub fn pack(proof: &Proof<Bn254>) -> Self {
        let (ax, ay) = proof.a.xy().unwrap_or((Fq::zero(), Fq::zero()));
        let (bx, by) = proof.b.xy().unwrap_or((Fq2::zero(), Fq2::zero()));
        let (cx, cy) = proof.c.xy().unwrap_or((Fq::zero(), Fq::zero()));
        Self([
            field_to_word(&ax),
            field_to_word(&ay),
            field_to_word(&bx.c1),
            field_to_word(&bx.c0),
            field_to_word(&by.c1),
            field_to_word(&by.c0),
            field_to_word(&cx),
            field_to_word(&cy),
        ])
    }

    /// Rebuild the proof, rejecting points off the curve or outside the prime-order subgroup.
    pub fn unpack(&self) -> Result<Proof<Bn254>, CredentialError> {
        let w = &self.0;
        let a = g1_from_words(&w[0], &w[1])?;
        let b = g2_from_coords(
            Fq2::new(fq_from_word(&w[3])?, fq_from_word(&w[2])?),
            Fq2::new(fq_from_word(&w[5])?, fq_from_word(&w[4])?),
        )?;
        let c = g1_from_words(&w[6], &w[7])?;
        Ok(Proof { a, b, c })
    }

    pub fn words(&self) -> &[Word; 8] {
        &self.0
    }
}

fn g1_from_words(x: &Word, y: &Word) -> Result<G1Affine, CredentialError> {
    let (x, y) = (fq_from_word(x)?, fq_from_word(y)?);
    if x.is_zero() && y.is_zero() {
        return Ok(G1Affine::identity());
    }
    let point = G1Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(CredentialError::validation("proof contains an invalid G1 point"));
    }
    Ok(point)
}

fn g2_from_coords(x: Fq2, y: Fq2) -> Result<G2Affine, CredentialError> {
    if x.is_zero() && y.is_zero() {
        return Ok(G2Affine::identity());
    }
    let point = G2Affine::new_unchecked(x, y);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(CredentialError::validation("proof contains an invalid G2 point"));
    }
    Ok(point)
}

/// Reads consecutive words, reporting truncation as a validation error.
struct WordReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> WordReader<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self, CredentialError> {
        if bytes.len() % 32 != 0 {
            return Err(CredentialError::validation(format!(
                "encoding length {} is not a multiple of 32 bytes",
                bytes.len()
            )));
        }
        Ok(Self { bytes, position: 0 })
    }

    fn remaining(&self) -> usize {
        (self.bytes.len() - self.position) / 32
    }

    fn word(&mut self) -> Result<Word, CredentialError> {
        let end = self.position + 32;
        let slice = self
            .bytes
            .get(self.position..end)
            .ok_or_else(|| CredentialError::validation("encoding is truncated"))?;
        self.position = end;
        let mut word = [0u8; 32];
        word.copy_from_slice(slice);
        Ok(word)
    }

    /// A word holding an unsigned integer of at most `bits` bits.
    fn uint(&mut self, bits: usize, what: &str) -> Result<u64, CredentialError> {
        let word = self.word()?;
        let high = 32 - bits / 8;
        if word[..high].iter().any(|b| *b != 0) {
            return Err(CredentialError::validation(format!(
                "{what} does not fit in {bits} bits"
            )));
        }
        let mut low = [0u8; 8];
        low.copy_from_slice(&word[24..]);
        Ok(u64::from_be_bytes(low))
    }

    fn u8(&mut self, what: &str) -> Result<u8, CredentialError> {
        Ok(self.uint(8, what)? as u8)
    }

    fn fr(&mut self, what: &str) -> Result<Fr, CredentialError> {
        fr_from_word(&self.word()?).ok_or_else(|| {
            CredentialError::validation(format!("{what} is not a canonical field element"))
        })
    }

    fn address(&mut self) -> Result<Address, CredentialError> {
        let word = self.word()?;
        if word[..12].iter().any(|b| *b != 0) {
            return Err(CredentialError::validation("admin is not a 20-byte address"));
        }
        let mut address = [0u8; 20];
        address.copy_from_slice(&word[12..]);
        Ok(Address(address))
    }

    fn proof(&mut self) -> Result<PackedProof, CredentialError> {
        let mut words = [[0u8; 32]; 8];
        for word in &mut words {
            *word = self.word()?;
        }
        Ok(PackedProof(words))
    }

    fn finish(&self) -> Result<(), CredentialError> {
        if self.remaining() != 0 {
            return Err(CredentialError::validation(format!(
                "{} unexpected trailing words",
                self.remaining()
            )));
        }
        Ok(())
    }
}

fn address_word(address: &Address) -> Word {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&address.0);
    word
}

pub fn encode_test_config(config: &TestConfig) -> Vec<u8> {
    let mut words = vec![
        u64_word(u64::from(config.test_height)),
        u64_word(u64::from(config.minimum_grade)),
        u64_word(u64::from(config.multiple_choice_weight)),
        u64_word(u64::from(config.n_questions)),
        address_word(&config.admin),
        u64_word(config.required_credential),
        u64_word(u64::from(config.required_credential_grade_threshold)),
        fr_to_word(&config.multiple_choice_root),
        fr_to_word(&config.open_answers_hashes_root),
    ];
    words.extend(config.open_answers_hashes.iter().map(fr_to_word));
    words.concat()
}

/// Inverse of [`encode_test_config`]; the result always passes `TestConfig::validate`.
pub fn decode_test_config(bytes: &[u8]) -> Result<TestConfig, CredentialError> {
    let mut reader = WordReader::new(bytes)?;
    if reader.remaining() < TEST_CONFIG_HEADER_WORDS {
        return Err(CredentialError::validation(format!(
            "test config needs at least {TEST_CONFIG_HEADER_WORDS} words, got {}",
            reader.remaining()
        )));
    }

    let test_height = reader.u8("test height")?;
    if test_height == 0 || test_height > MAX_TEST_HEIGHT {
        return Err(CredentialError::validation(format!(
            "test height must be between 1 and {MAX_TEST_HEIGHT}, got {test_height}"
        )));
    }
    let minimum_grade = reader.u8("minimum grade")?;
    let multiple_choice_weight = reader.u8("multiple choice weight")?;
    let n_questions = reader.u8("number of questions")?;
    let admin = reader.address()?;
    let required_credential = reader.uint(64, "required credential")?;
    let required_credential_grade_threshold = reader.u8("grade threshold")?;
    let multiple_choice_root = reader.fr("multiple choice root")?;
    let open_answers_hashes_root = reader.fr("open answers hashes root")?;

    let slots = 1usize << test_height;
    if reader.remaining() != slots {
        return Err(CredentialError::validation(format!(
            "expected {slots} open answer hashes, got {}",
            reader.remaining()
        )));
    }
    let open_answers_hashes = (0..slots)
        .map(|_| reader.fr("open answer hash"))
        .collect::<Result<Vec<_>, _>>()?;
    reader.finish()?;

    let config = TestConfig {
        test_height,
        n_questions,
        minimum_grade,
        multiple_choice_weight,
        multiple_choice_root,
        open_answers_hashes_root,
        open_answers_hashes,
        admin,
        required_credential,
        required_credential_grade_threshold,
    };
    config.validate()?;
    Ok(config)
}

/// Proof section of a credential update, as read back from its encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecondaryUpdate {
    Ownership {
        merkle_tree_root: Fr,
        nullifier_hash: Fr,
        proof: PackedProof,
    },
    GradeClaim {
        grade_tree_root: Fr,
        nullifier_hash: Fr,
        grade_threshold: u8,
        proof: PackedProof,
    },
}

/// Structured view of an encoded credential update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialUpdate {
    pub policy: Policy,
    pub test_passed: bool,
    pub identity_commitment: Fr,
    pub new_identity_tree_root: Fr,
    pub grade_commitment: Fr,
    pub new_grade_tree_root: Fr,
    pub test_proof: PackedProof,
    pub secondary: Option<SecondaryUpdate>,
}

pub fn encode_credential_update(result: &ProofResult) -> Vec<u8> {
    let test = result.test();
    let mut words = vec![
        u64_word(u64::from(result.policy().tag())),
        u64_word(u64::from(test.test_passed)),
        fr_to_word(&test.identity_commitment),
        fr_to_word(&test.new_identity_tree_root),
        fr_to_word(&test.grade_commitment),
        fr_to_word(&test.new_grade_tree_root),
    ];
    words.extend(PackedProof::pack(&test.proof).0);

    match result {
        ProofResult::Open(_) => {}
        ProofResult::CredentialRestricted { ownership, .. } => {
            words.push(fr_to_word(&ownership.merkle_tree_root));
            words.push(fr_to_word(&ownership.nullifier_hash));
            words.extend(PackedProof::pack(&ownership.proof).0);
        }
        ProofResult::GradeRestricted { grade_claim, .. } => {
            words.push(fr_to_word(&grade_claim.grade_tree_root));
            words.push(fr_to_word(&grade_claim.nullifier_hash));
            words.push(u64_word(u64::from(grade_claim.grade_threshold)));
            words.extend(PackedProof::pack(&grade_claim.proof).0);
        }
    }
    words.concat()
}

pub fn decode_credential_update(bytes: &[u8]) -> Result<CredentialUpdate, CredentialError> {
    let mut reader = WordReader::new(bytes)?;
    let tag = reader.u8("policy tag")?;
    let policy = Policy::from_tag(tag)
        .ok_or_else(|| CredentialError::validation(format!("unknown policy tag {tag}")))?;

    let test_passed = match reader.u8("test passed flag")? {
        0 => false,
        1 => true,
        other => {
            return Err(CredentialError::validation(format!(
                "test passed flag must be 0 or 1, got {other}"
            )));
        }
    };
    let identity_commitment = reader.fr("identity commitment")?;
    let new_identity_tree_root = reader.fr("identity tree root")?;
    let grade_commitment = reader.fr("grade commitment")?;
    let new_grade_tree_root = reader.fr("grade tree root")?;
    let test_proof = reader.proof()?;

    let secondary = match policy {
        Policy::Open => None,
        Policy::CredentialRestricted => Some(SecondaryUpdate::Ownership {
            merkle_tree_root: reader.fr("merkle tree root")?,
            nullifier_hash: reader.fr("nullifier hash")?,
            proof: reader.proof()?,
        }),
        Policy::GradeRestricted => Some(SecondaryUpdate::GradeClaim {
            grade_tree_root: reader.fr("grade tree root")?,
            nullifier_hash: reader.fr("nullifier hash")?,
            grade_threshold: reader.u8("grade threshold")?,
            proof: reader.proof()?,
        }),
    };
    reader.finish()?;

    Ok(CredentialUpdate {
        policy,
        test_passed,
        identity_commitment,
        new_identity_tree_root,
        grade_commitment,
        new_grade_tree_root,
        test_proof,
        secondary,
    })
}

/// `0x`-prefixed hex of every proof word, the shape relayers pass as `uint256[8]`.
pub fn proof_hex_words(proof: &PackedProof) -> Vec<String> {
    proof
        .0
        .iter()
        .map(|w| format!("0x{}", hex::encode(w)))
        .collect()
}

mod packed_words {
    use crate::hash::Word;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(words: &[Word; 8], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(words.iter().map(|w| format!("0x{}", hex::encode(w))))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[Word; 8], D::Error> {
        let items = Vec::<String>::deserialize(d)?;
        if items.len() != 8 {
            return Err(serde::de::Error::custom("a packed proof has 8 words"));
        }
        let mut words = [[0u8; 32]; 8];
        for (word, item) in words.iter_mut().zip(&items) {
            let bytes = hex::decode(item.strip_prefix("0x").unwrap_or(item))
                .map_err(serde::de::Error::custom)?;
            if bytes.len() > 32 {
                return Err(serde::de::Error::custom("proof word longer than 32 bytes"));
            }
            word[32 - bytes.len()..].copy_from_slice(&bytes);
        }
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_config;
    use ark_ec::{CurveGroup, PrimeGroup};
    use ark_bn254::{G1Projective, G2Projective};

    fn sample_proof() -> Proof<Bn254> {
        Proof {
            a: (G1Projective::generator() * Fr::from(3u64)).into_affine(),
            b: (G2Projective::generator() * Fr::from(5u64)).into_affine(),
            c: (G1Projective::generator() * Fr::from(7u64)).into_affine(),
        }
    }

    #[test]
    fn config_roundtrips_through_registry_encoding() {
        let mut config = sample_config();
        config.required_credential = 9;
        config.required_credential_grade_threshold = 70;
        let bytes = encode_test_config(&config);
        assert_eq!(bytes.len(), 32 * (TEST_CONFIG_HEADER_WORDS + 16));
        assert_eq!(decode_test_config(&bytes).unwrap(), config);
    }

    #[test]
    fn malformed_configs_are_rejected() {
        let bytes = encode_test_config(&sample_config());

        let truncated = &bytes[..bytes.len() - 32];
        assert!(matches!(decode_test_config(truncated), Err(CredentialError::Validation(_))));
        assert!(decode_test_config(&bytes[..bytes.len() - 1]).is_err());

        let mut wide = bytes.clone();
        wide[30] = 1; // high byte of the test height word
        assert!(decode_test_config(&wide).is_err());

        let mut non_canonical = bytes.clone();
        non_canonical[32 * 7..32 * 8].fill(0xff);
        assert!(decode_test_config(&non_canonical).is_err());

        let mut bad_root = bytes.clone();
        bad_root[32 * 9 - 1] ^= 1;
        assert!(decode_test_config(&bad_root).is_err());

        let mut extra = bytes;
        extra.extend_from_slice(&[0u8; 32]);
        assert!(decode_test_config(&extra).is_err());
    }

    #[test]
    fn packed_proofs_unpack_to_the_same_points() {
        let proof = sample_proof();
        let packed = PackedProof::pack(&proof);
        assert_eq!(packed.unpack().unwrap(), proof);

        let b = proof.b.xy().unwrap();
        assert_eq!(packed.words()[2], field_to_word(&b.0.c1));
        assert_eq!(packed.words()[3], field_to_word(&b.0.c0));

        let json = serde_json::to_string(&packed).unwrap();
        assert_eq!(serde_json::from_str::<PackedProof>(&json).unwrap(), packed);
    }

    #[test]
    fn points_off_the_curve_are_rejected() {
        let mut packed = PackedProof::pack(&sample_proof());
        packed.0[1][31] ^= 1;
        assert!(matches!(packed.unpack(), Err(CredentialError::Validation(_))));
    }
}
