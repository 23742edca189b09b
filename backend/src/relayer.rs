//! Forwarding of accepted submissions to the registry relayer webhook.
//!
//! The relayer signs and sends the transaction; this service only describes the call. Posts are
//! not retried since a duplicate would reach the registry twice.

use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

pub const UPDATE_CREDENTIAL: &str = "updateCredential";
pub const RATE_CREDENTIAL: &str = "rateCredential";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relayer unreachable: {0}")]
    Transport(String),

    #[error("relayer rejected the call with {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// One registry call, as handed to the relayer.
#[derive(Clone, Debug, PartialEq)]
pub enum RelayCall {
    CredentialUpdate {
        credential_id: u64,
        /// `0x`-prefixed encoded credential update.
        update_hex: String,
    },
    IssuerRating {
        credential_id: u64,
        merkle_tree_root: String,
        nullifier_hash: String,
        proof: Vec<String>,
        rating: u8,
        comment: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayBody<'a> {
    abi: Value,
    function_name: &'a str,
    function_parameters: Vec<Value>,
}

impl RelayCall {
    pub fn function_name(&self) -> &'static str {
        match self {
            RelayCall::CredentialUpdate { .. } => UPDATE_CREDENTIAL,
            RelayCall::IssuerRating { .. } => RATE_CREDENTIAL,
        }
    }

    fn body(&self) -> RelayBody<'static> {
        let function_parameters = match self {
            RelayCall::CredentialUpdate {
                credential_id,
                update_hex,
            } => vec![json!(credential_id), json!(update_hex)],
            RelayCall::IssuerRating {
                credential_id,
                merkle_tree_root,
                nullifier_hash,
                proof,
                rating,
                comment,
            } => vec![
                json!(credential_id),
                json!(merkle_tree_root),
                json!(nullifier_hash),
                json!(proof),
                json!(rating),
                json!(comment),
            ],
        };
        RelayBody {
            abi: registry_abi(),
            function_name: self.function_name(),
            function_parameters,
        }
    }
}

/// The two registry entry points this service relays to.
fn registry_abi() -> Value {
    let input = |name: &str, ty: &str| json!({ "name": name, "type": ty, "internalType": ty });
    json!([
        {
            "type": "function",
            "name": UPDATE_CREDENTIAL,
            "stateMutability": "nonpayable",
            "inputs": [input("credentialId", "uint256"), input("credentialUpdate", "bytes")],
            "outputs": []
        },
        {
            "type": "function",
            "name": RATE_CREDENTIAL,
            "stateMutability": "nonpayable",
            "inputs": [
                input("credentialId", "uint256"),
                input("merkleTreeRoot", "uint256"),
                input("nullifierHash", "uint256"),
                input("proof", "uint256[8]"),
                input("rating", "uint256"),
                input("comment", "string")
            ],
            "outputs": []
        }
    ])
}

pub struct RelayerClient {
    http: reqwest::Client,
    url: String,
}

impl RelayerClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }

    pub async fn relay(&self, call: &RelayCall) -> Result<(), RelayError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&call.body())
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            tracing::info!(function = call.function_name(), %status, "relayed registry call");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(function = call.function_name(), %status, "relayer rejected registry call");
        Err(RelayError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
