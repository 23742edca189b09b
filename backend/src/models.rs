use chrono::{DateTime, Utc};
use credential_proofs::{GroupKind, Policy, TestConfig};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterCredentialRequest {
    /// Registry id of the credential. Ids start at 1.
    pub credential_id: u64,
    /// Depth of the credential's three group trees.
    pub tree_depth: usize,
    pub config: TestConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialResponse {
    pub credential_id: u64,
    pub created_at: DateTime<Utc>,
    pub tree_depth: usize,
    pub policy: Policy,
    pub config: TestConfig,
    /// The config as the registry stores it.
    pub config_hex: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupResponse {
    pub credential_id: u64,
    pub group: GroupKind,
    pub group_id: u64,
    pub depth: usize,
    pub root: String,
    pub members: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CircuitKey {
    pub circuit: String,
    pub key_b64: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ZkVkResponse {
    pub curve: String,
    pub proof_system: String,
    pub keys: Vec<CircuitKey>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Solution,
    Rating,
}

impl SubmissionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionKind::Solution => "solution",
            SubmissionKind::Rating => "rating",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "solution" => Some(SubmissionKind::Solution),
            "rating" => Some(SubmissionKind::Rating),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Claimed its nullifier; verification or relaying still in progress.
    Pending,
    /// Proof verification failed; nothing was relayed.
    Rejected,
    /// Verified, no relayer configured.
    Verified,
    Relayed,
    /// Verified, but the relayer refused or could not be reached.
    RelayFailed,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Rejected => "rejected",
            SubmissionStatus::Verified => "verified",
            SubmissionStatus::Relayed => "relayed",
            SubmissionStatus::RelayFailed => "relay_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SubmissionStatus::Pending),
            "rejected" => Some(SubmissionStatus::Rejected),
            "verified" => Some(SubmissionStatus::Verified),
            "relayed" => Some(SubmissionStatus::Relayed),
            "relay_failed" => Some(SubmissionStatus::RelayFailed),
            _ => None,
        }
    }
}

/// A solution or rating submitted for relaying, and what became of it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submission_id: Uuid,
    pub credential_id: u64,
    pub kind: SubmissionKind,
    pub created_at: DateTime<Utc>,
    pub status: SubmissionStatus,
    /// Nullifier of the secondary proof; `None` for open-test solutions.
    pub nullifier_hash: Option<String>,
    /// Encoded credential update (solutions only).
    pub payload_hex: Option<String>,
    pub detail: Option<String>,
}
