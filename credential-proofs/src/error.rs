use thiserror::Error;

/// Failures surfaced by grading, orchestration and encoding.
///
/// Verification never produces one of these: an invalid proof is reported as `false`
/// (see [`crate::verifier::VerificationFailure`] for diagnostics).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// Malformed grading input or configuration, raised before any cryptographic work.
    #[error("validation error: {0}")]
    Validation(String),

    /// Inconsistent tree usage within one orchestration call.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The proof backend could not produce a witness or proof. Never retried.
    #[error("proof generation failed: {0}")]
    ProofGeneration(String),

    /// The group-state provider could not deliver a membership snapshot.
    #[error("group provider error: {0}")]
    Provider(String),
}

impl CredentialError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}
