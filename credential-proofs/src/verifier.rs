//! Verification of composed proof results.
//!
//! Checks run secondary proof first, then the test-solution proof, and stop at the first
//! failure. Each proof's public signals are checked against the published test and the
//! structured fields before the pairing check. An invalid proof is an expected outcome:
//! `verify` answers `false` and `verify_detailed` names the proof that failed.

use crate::circuit::{grade_claim_signals, ownership_signals, solution_signals};
use crate::constants::{
    CREDENTIAL_RESTRICTED_TEST_SCOPE, GRADE_RESTRICTED_TEST_SCOPE, RATE_ISSUER_SCOPE,
};
use crate::groth16::{CircuitId, ProofBackend};
use crate::hash::hash_scope;
use crate::orchestrator::{
    check_rating, rating_signal, signal_hash, GradeClaimFullProof, OwnershipFullProof,
    ProofResult, RateFullProof, TestFullProof,
};
use crate::types::TestConfig;
use ark_bn254::{Bn254, Fr};
use ark_groth16::Proof;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofKind {
    TestSolution,
    Ownership,
    GradeClaim,
    RateIssuer,
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProofKind::TestSolution => "test solution",
            ProofKind::Ownership => "credential ownership",
            ProofKind::GradeClaim => "grade claim",
            ProofKind::RateIssuer => "rate issuer",
        })
    }
}

/// Why a proof result was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    /// Public signals disagree with the test or the structured fields.
    #[error("{kind} proof rejected: {reason}")]
    Mismatch { kind: ProofKind, reason: String },

    /// The pairing check failed.
    #[error("{0} proof is invalid")]
    InvalidProof(ProofKind),

    /// The backend could not check the proof at all (e.g. no keys for its shape).
    #[error("{kind} proof could not be checked: {reason}")]
    Backend { kind: ProofKind, reason: String },
}

impl VerificationFailure {
    pub fn kind(&self) -> ProofKind {
        match self {
            VerificationFailure::Mismatch { kind, .. } | VerificationFailure::Backend { kind, .. } => {
                *kind
            }
            VerificationFailure::InvalidProof(kind) => *kind,
        }
    }
}

fn ensure(kind: ProofKind, ok: bool, reason: &str) -> Result<(), VerificationFailure> {
    if ok {
        Ok(())
    } else {
        Err(VerificationFailure::Mismatch {
            kind,
            reason: reason.to_string(),
        })
    }
}

fn scope_hash(kind: ProofKind, scope: &str) -> Result<Fr, VerificationFailure> {
    hash_scope(scope).map_err(|e| VerificationFailure::Mismatch {
        kind,
        reason: e.to_string(),
    })
}

pub struct ProofVerifier<B> {
    backend: Arc<B>,
}

impl<B> Clone for ProofVerifier<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
        }
    }
}

impl<B: ProofBackend> ProofVerifier<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// `true` only if every proof the result carries verifies against `config`.
    pub fn verify(&self, result: &ProofResult, config: &TestConfig) -> bool {
        match self.verify_detailed(result, config) {
            Ok(()) => true,
            Err(failure) => {
                warn!(kind = %failure.kind(), %failure, "solution proof rejected");
                false
            }
        }
    }

    pub fn verify_detailed(
        &self,
        result: &ProofResult,
        config: &TestConfig,
    ) -> Result<(), VerificationFailure> {
        match result {
            ProofResult::Open(test) => {
                ensure(
                    ProofKind::TestSolution,
                    config.required_credential == 0,
                    "test is restricted but no secondary proof was supplied",
                )?;
                self.verify_test(test, config)
            }
            ProofResult::CredentialRestricted { test, ownership } => {
                ensure(
                    ProofKind::Ownership,
                    config.required_credential != 0
                        && config.required_credential_grade_threshold == 0,
                    "test is not credential restricted",
                )?;
                self.verify_ownership(
                    ProofKind::Ownership,
                    ownership,
                    CREDENTIAL_RESTRICTED_TEST_SCOPE,
                    &test.signal(),
                )?;
                self.verify_test(test, config)
            }
            ProofResult::GradeRestricted { test, grade_claim } => {
                ensure(
                    ProofKind::GradeClaim,
                    config.required_credential_grade_threshold != 0,
                    "test is not grade restricted",
                )?;
                self.verify_grade_claim(grade_claim, config, test)?;
                self.verify_test(test, config)
            }
        }
    }

    pub fn verify_rate(&self, proof: &RateFullProof) -> bool {
        match self.verify_rate_detailed(proof) {
            Ok(()) => true,
            Err(failure) => {
                warn!(%failure, "rate issuer proof rejected");
                false
            }
        }
    }

    pub fn verify_rate_detailed(&self, proof: &RateFullProof) -> Result<(), VerificationFailure> {
        check_rating(proof.rating, &proof.comment).map_err(|e| VerificationFailure::Mismatch {
            kind: ProofKind::RateIssuer,
            reason: e.to_string(),
        })?;
        self.verify_ownership(
            ProofKind::RateIssuer,
            &proof.ownership,
            RATE_ISSUER_SCOPE,
            &rating_signal(proof.rating, &proof.comment),
        )
    }

    fn verify_test(&self, test: &TestFullProof, config: &TestConfig) -> Result<(), VerificationFailure> {
        let kind = ProofKind::TestSolution;
        let signals = &test.public_signals;
        ensure(kind, signals.len() == solution_signals::COUNT, "wrong number of public signals")?;
        ensure(kind, test.test_height == config.test_height, "test height differs from the test")?;

        let minimum_grade = if test.test_passed { config.minimum_grade } else { 0 };
        let expected = [
            (solution_signals::MINIMUM_GRADE, Fr::from(u64::from(minimum_grade))),
            (
                solution_signals::MULTIPLE_CHOICE_WEIGHT,
                Fr::from(u64::from(config.multiple_choice_weight)),
            ),
            (solution_signals::N_QUESTIONS, Fr::from(u64::from(config.n_questions))),
            (solution_signals::MULTIPLE_CHOICE_ROOT, config.multiple_choice_root),
            (solution_signals::OPEN_ANSWERS_HASHES_ROOT, config.open_answers_hashes_root),
            (solution_signals::IDENTITY_COMMITMENT, test.identity_commitment),
            (solution_signals::NEW_IDENTITY_TREE_ROOT, test.new_identity_tree_root),
            (solution_signals::GRADE_COMMITMENT, test.grade_commitment),
            (solution_signals::NEW_GRADE_TREE_ROOT, test.new_grade_tree_root),
        ];
        for (index, value) in expected {
            ensure(kind, signals[index] == value, &format!("public signal {index} mismatch"))?;
        }

        self.check_pairing(
            kind,
            CircuitId::TestSolution {
                test_height: test.test_height,
                depth: test.tree_depth,
            },
            &test.proof,
            signals,
        )
    }

    fn verify_ownership(
        &self,
        kind: ProofKind,
        ownership: &OwnershipFullProof,
        scope: &str,
        expected_signal: &[u8; 32],
    ) -> Result<(), VerificationFailure> {
        let signals = &ownership.public_signals;
        ensure(kind, signals.len() == ownership_signals::COUNT, "wrong number of public signals")?;
        ensure(kind, ownership.signal == *expected_signal, "signal is bound to other data")?;
        ensure(
            kind,
            signals[ownership_signals::SIGNAL_HASH] == signal_hash(expected_signal),
            "signal hash mismatch",
        )?;
        let external_nullifier = scope_hash(kind, scope)?;
        ensure(
            kind,
            signals[ownership_signals::EXTERNAL_NULLIFIER] == external_nullifier
                && ownership.external_nullifier == external_nullifier,
            "external nullifier does not match the scope",
        )?;
        ensure(
            kind,
            signals[ownership_signals::MERKLE_TREE_ROOT] == ownership.merkle_tree_root
                && signals[ownership_signals::NULLIFIER_HASH] == ownership.nullifier_hash,
            "structured fields differ from public signals",
        )?;

        self.check_pairing(
            kind,
            CircuitId::Ownership {
                depth: ownership.tree_depth,
            },
            &ownership.proof,
            signals,
        )
    }

    fn verify_grade_claim(
        &self,
        claim: &GradeClaimFullProof,
        config: &TestConfig,
        test: &TestFullProof,
    ) -> Result<(), VerificationFailure> {
        let kind = ProofKind::GradeClaim;
        let signals = &claim.public_signals;
        let signal = test.signal();
        ensure(kind, signals.len() == grade_claim_signals::COUNT, "wrong number of public signals")?;
        ensure(
            kind,
            claim.grade_threshold == config.required_credential_grade_threshold
                && signals[grade_claim_signals::GRADE_THRESHOLD]
                    == Fr::from(u64::from(config.required_credential_grade_threshold)),
            "grade threshold differs from the test",
        )?;
        ensure(kind, claim.signal == signal, "signal is bound to other data")?;
        ensure(
            kind,
            signals[grade_claim_signals::SIGNAL_HASH] == signal_hash(&signal),
            "signal hash mismatch",
        )?;
        let external_nullifier = scope_hash(kind, GRADE_RESTRICTED_TEST_SCOPE)?;
        ensure(
            kind,
            signals[grade_claim_signals::EXTERNAL_NULLIFIER] == external_nullifier
                && claim.external_nullifier == external_nullifier,
            "external nullifier does not match the scope",
        )?;
        ensure(
            kind,
            signals[grade_claim_signals::GRADE_TREE_ROOT] == claim.grade_tree_root
                && signals[grade_claim_signals::NULLIFIER_HASH] == claim.nullifier_hash,
            "structured fields differ from public signals",
        )?;

        self.check_pairing(
            kind,
            CircuitId::GradeClaim {
                depth: claim.tree_depth,
            },
            &claim.proof,
            signals,
        )
    }

    fn check_pairing(
        &self,
        kind: ProofKind,
        circuit: CircuitId,
        proof: &Proof<Bn254>,
        signals: &[Fr],
    ) -> Result<(), VerificationFailure> {
        match self.backend.verify(circuit, proof, signals) {
            Ok(true) => Ok(()),
            Ok(false) => Err(VerificationFailure::InvalidProof(kind)),
            Err(e) => Err(VerificationFailure::Backend {
                kind,
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::identity_commitment;
    use crate::fixtures::{answers, identity, sample_config, WitnessOnlyBackend};
    use crate::group::{GroupInput, GroupState};
    use crate::orchestrator::{ProofOrchestrator, RequiredGroup, SolutionRequest};

    const DEPTH: usize = 3;

    fn backend() -> Arc<WitnessOnlyBackend> {
        Arc::new(WitnessOnlyBackend)
    }

    async fn restricted() -> (ProofResult, TestConfig) {
        let mut config = sample_config();
        config.required_credential = 2;
        let request = SolutionRequest {
            identity: identity(),
            answers: answers(&[1; 16], &["sneed's", "feed", "seed"]),
            config: config.clone(),
            identity_group: GroupInput::Full(GroupState::new(1, DEPTH).unwrap()),
            grade_group: GroupInput::Full(GroupState::new(1, DEPTH).unwrap()),
            required: Some(RequiredGroup::Ownership(GroupInput::Full(
                GroupState::with_members(2, DEPTH, [identity_commitment(&identity())]).unwrap(),
            ))),
        };
        let result = ProofOrchestrator::new(backend())
            .generate_solution_proof(request)
            .await
            .unwrap();
        (result, config)
    }

    #[tokio::test]
    async fn credential_restricted_result_verifies() {
        let (result, config) = restricted().await;
        assert!(ProofVerifier::new(backend()).verify(&result, &config));
    }

    #[tokio::test]
    async fn tampered_test_fields_fail_after_ownership() {
        let (mut result, config) = restricted().await;
        if let ProofResult::CredentialRestricted { test, .. } = &mut result {
            test.public_signals[solution_signals::N_QUESTIONS] = Fr::from(4u64);
        }
        let failure = ProofVerifier::new(backend())
            .verify_detailed(&result, &config)
            .unwrap_err();
        assert_eq!(failure.kind(), ProofKind::TestSolution);
    }

    #[tokio::test]
    async fn ownership_for_other_roots_is_rejected() {
        let (mut result, config) = restricted().await;
        if let ProofResult::CredentialRestricted { test, .. } = &mut result {
            test.new_grade_tree_root = Fr::from(1u64);
        }
        let failure = ProofVerifier::new(backend())
            .verify_detailed(&result, &config)
            .unwrap_err();
        assert_eq!(failure.kind(), ProofKind::Ownership);
    }

    #[tokio::test]
    async fn results_must_match_the_test_policy() {
        let (result, mut config) = restricted().await;
        config.required_credential = 0;
        assert!(!ProofVerifier::new(backend()).verify(&result, &config));

        let ProofResult::CredentialRestricted { test, .. } = result else {
            panic!("expected a credential-restricted result");
        };
        config.required_credential = 2;
        let failure = ProofVerifier::new(backend())
            .verify_detailed(&ProofResult::Open(test), &config)
            .unwrap_err();
        assert_eq!(failure.kind(), ProofKind::TestSolution);
    }

    #[tokio::test]
    async fn rate_proofs_are_bound_to_rating_and_comment() {
        let members = GroupInput::Full(
            GroupState::with_members(1, DEPTH, [identity_commitment(&identity())]).unwrap(),
        );
        let mut proof = ProofOrchestrator::new(backend())
            .generate_rate_issuer_proof(&identity(), members, 35, "treefiddy")
            .await
            .unwrap();
        let verifier = ProofVerifier::new(backend());
        assert!(verifier.verify_rate(&proof));

        proof.comment = "tree fiddy".into();
        assert!(!verifier.verify_rate(&proof));
    }
}
