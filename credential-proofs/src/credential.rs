//! Prover-side view of one test credential.
//!
//! `TestCredential` holds the immutable published config and fetches fresh group snapshots for
//! every proof it generates.

use crate::commitment::{grade_commitment_from_identity, identity_commitment};
use crate::error::CredentialError;
use crate::grading;
use crate::group::{GroupInput, GroupKind, GroupState};
use crate::groth16::ProofBackend;
use crate::orchestrator::{
    Policy, PriorGrade, ProofOrchestrator, ProofResult, RateFullProof, RequiredGroup,
    SolutionRequest,
};
use crate::types::{fr_hex_vec, GradeResult, IdentitySecret, TestAnswers, TestConfig};
use crate::verifier::ProofVerifier;
use ark_bn254::Fr;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Ordered membership of one group as recorded by the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub depth: usize,
    #[serde(with = "fr_hex_vec")]
    pub members: Vec<Fr>,
}

impl GroupSnapshot {
    /// Rebuild the Merkle tree of a group owned by `credential_id`.
    pub fn into_group(self, credential_id: u64) -> Result<GroupState, CredentialError> {
        GroupState::with_members(credential_id, self.depth, self.members)
    }
}

/// Source of current group memberships (an indexer, a node, a test double).
#[async_trait]
pub trait GroupProvider: Send + Sync {
    async fn group_snapshot(
        &self,
        credential_id: u64,
        kind: GroupKind,
    ) -> Result<GroupSnapshot, CredentialError>;
}

pub struct TestCredential<P, B> {
    credential_id: u64,
    config: TestConfig,
    provider: Arc<P>,
    orchestrator: ProofOrchestrator<B>,
    verifier: ProofVerifier<B>,
}

impl<P: GroupProvider, B: ProofBackend> TestCredential<P, B> {
    pub fn new(
        credential_id: u64,
        config: TestConfig,
        provider: Arc<P>,
        backend: Arc<B>,
    ) -> Result<Self, CredentialError> {
        if credential_id == 0 {
            return Err(CredentialError::validation("credential ids start at 1"));
        }
        config.validate()?;
        Ok(Self {
            credential_id,
            config,
            provider,
            orchestrator: ProofOrchestrator::new(backend.clone()),
            verifier: ProofVerifier::new(backend),
        })
    }

    pub fn credential_id(&self) -> u64 {
        self.credential_id
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn policy(&self) -> Policy {
        Policy::of(&self.config)
    }

    pub fn grade_solution(&self, answers: &TestAnswers) -> Result<GradeResult, CredentialError> {
        grading::grade(answers, &self.config)
    }

    async fn group(&self, credential_id: u64, kind: GroupKind) -> Result<GroupState, CredentialError> {
        let snapshot = self.provider.group_snapshot(credential_id, kind).await?;
        debug!(
            credential_id,
            group = kind.as_str(),
            members = snapshot.members.len(),
            "fetched group snapshot"
        );
        snapshot.into_group(credential_id)
    }

    pub async fn merkle_tree_root(&self, kind: GroupKind) -> Result<Fr, CredentialError> {
        Ok(self.group(self.credential_id, kind).await?.root())
    }

    pub async fn number_of_leaves(&self, kind: GroupKind) -> Result<usize, CredentialError> {
        Ok(self.group(self.credential_id, kind).await?.len())
    }

    /// Grade, fetch the groups the policy needs and prove the solution.
    ///
    /// `prior_grade` is the grade obtained in the required credential; it is only used (and then
    /// required) for grade-restricted tests.
    pub async fn generate_solution_proof(
        &self,
        identity: &IdentitySecret,
        answers: &TestAnswers,
        prior_grade: Option<u8>,
    ) -> Result<ProofResult, CredentialError> {
        let grade = self.grade_solution(answers)?;
        let identity_kind = if grade.pass {
            GroupKind::Credentials
        } else {
            GroupKind::NoCredentials
        };

        let identity_group = self.group(self.credential_id, identity_kind).await?;
        let grade_group = self.group(self.credential_id, GroupKind::Grade).await?;

        let required_id = self.config.required_credential;
        let required = match self.policy() {
            Policy::Open => None,
            Policy::CredentialRestricted => Some(RequiredGroup::Ownership(GroupInput::Full(
                self.group(required_id, GroupKind::Credentials).await?,
            ))),
            Policy::GradeRestricted => {
                let grade = prior_grade.ok_or_else(|| {
                    CredentialError::validation(format!(
                        "grade-restricted tests need the grade obtained in credential {required_id}"
                    ))
                })?;
                let group = self.group(required_id, GroupKind::Grade).await?;
                let leaf = grade_commitment_from_identity(identity_commitment(identity), grade);
                let index = group.index_of(&leaf).ok_or_else(|| {
                    CredentialError::ProofGeneration(format!(
                        "no grade commitment for grade {grade} in credential {required_id}"
                    ))
                })?;
                Some(RequiredGroup::GradeClaim {
                    group: GroupInput::Full(group),
                    prior: PriorGrade { grade, index },
                })
            }
        };

        self.orchestrator
            .generate_solution_proof(SolutionRequest {
                identity: identity.clone(),
                answers: answers.clone(),
                config: self.config.clone(),
                identity_group: GroupInput::Full(identity_group),
                grade_group: GroupInput::Full(grade_group),
                required,
            })
            .await
    }

    pub async fn generate_rate_issuer_proof(
        &self,
        identity: &IdentitySecret,
        rating: u8,
        comment: &str,
    ) -> Result<RateFullProof, CredentialError> {
        let credentials = self.group(self.credential_id, GroupKind::Credentials).await?;
        self.orchestrator
            .generate_rate_issuer_proof(identity, GroupInput::Full(credentials), rating, comment)
            .await
    }

    pub async fn verify_solution_proof(&self, result: &ProofResult) -> bool {
        let verifier = self.verifier.clone();
        let result = result.clone();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || verifier.verify(&result, &config))
            .await
            .unwrap_or(false)
    }

    pub async fn verify_rate_issuer_proof(&self, proof: &RateFullProof) -> bool {
        let verifier = self.verifier.clone();
        let proof = proof.clone();
        tokio::task::spawn_blocking(move || verifier.verify_rate(&proof))
            .await
            .unwrap_or(false)
    }
}
