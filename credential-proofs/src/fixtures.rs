//! Shared values for unit tests.

use crate::types::{
    open_answers_hashes, padded_multiple_choice_answers, root_from_leaves, IdentitySecret,
    TestAnswers, TestConfig,
};
use crate::groth16::{
    check_witness, CircuitId, CircuitInputs, GeneratedProof, ProofBackend, ZkError,
};
use ark_bn254::{Bn254, Fr};
use ark_groth16::Proof;

/// Height-4 test: 16 multiple-choice answers (all `1`), three open questions
/// ("sneed's", "feed", "seed"), half the grade from each part.
pub fn sample_config() -> TestConfig {
    let open_answers_hashes = open_answers_hashes(&["sneed's", "feed", "seed"], 4);
    TestConfig {
        test_height: 4,
        n_questions: 3,
        minimum_grade: 50,
        multiple_choice_weight: 50,
        multiple_choice_root: root_from_leaves(&padded_multiple_choice_answers(&[1; 16], 4)),
        open_answers_hashes_root: root_from_leaves(&open_answers_hashes),
        open_answers_hashes,
        admin: "0x00000000000000000000000000000000000000aa".parse().unwrap(),
        required_credential: 0,
        required_credential_grade_threshold: 0,
    }
}

pub fn answers(multiple_choice: &[u32], open: &[&str]) -> TestAnswers {
    TestAnswers {
        multiple_choice_answers: multiple_choice.to_vec(),
        open_answers: open.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn identity() -> IdentitySecret {
    IdentitySecret::new(Fr::from(0xdee2u64), Fr::from(0x5eedu64))
}

/// Backend that checks witnesses but skips Groth16, for fast orchestration tests.
pub struct WitnessOnlyBackend;

impl ProofBackend for WitnessOnlyBackend {
    fn prove(&self, inputs: CircuitInputs) -> Result<GeneratedProof, ZkError> {
        let public_signals = match inputs {
            CircuitInputs::TestSolution(c) => check_witness(c)?,
            CircuitInputs::Ownership(c) => check_witness(c)?,
            CircuitInputs::GradeClaim(c) => check_witness(c)?,
        };
        Ok(GeneratedProof {
            proof: Proof::default(),
            public_signals,
        })
    }

    fn verify(
        &self,
        circuit: CircuitId,
        proof: &Proof<Bn254>,
        public_signals: &[Fr],
    ) -> Result<bool, ZkError> {
        Ok(*proof == Proof::default() && public_signals.len() == circuit.public_signal_count())
    }
}
