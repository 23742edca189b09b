//! ZK layer for anonymous test credentials.
//!
//! This crate contains:
//! - Grading of raw answers against a published test, and the commitments that become tree leaves.
//! - Merkle groups of commitments, with full-tree and path-only inputs.
//! - SNARK circuits for test solutions, credential ownership and grade claims, plus a Groth16 backend.
//! - Policy-driven orchestration and verification of composed proofs.
//! - Fixed-width encodings of test configs and credential updates for the on-chain registry.

pub mod circuit;
pub mod codec;
pub mod commitment;
pub mod constants;
pub mod credential;
pub mod error;
pub mod grading;
pub mod groth16;
pub mod group;
pub mod hash;
pub mod orchestrator;
pub mod types;
pub mod verifier;

#[cfg(test)]
mod fixtures;

pub use credential::{GroupProvider, GroupSnapshot, TestCredential};
pub use error::CredentialError;
pub use groth16::{CircuitId, Groth16Backend, ProofBackend};
pub use group::{GroupInput, GroupKind, GroupState, MerkleProof};
pub use orchestrator::{Policy, ProofOrchestrator, ProofResult, RateFullProof};
pub use types::{GradeResult, IdentitySecret, TestAnswers, TestConfig};
pub use verifier::{ProofVerifier, VerificationFailure};
