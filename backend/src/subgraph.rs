//! Group memberships read from the registry's GraphQL indexer.

use crate::retry::retry_send;
use ark_bn254::Fr;
use async_trait::async_trait;
use credential_proofs::hash::fr_from_hex;
use credential_proofs::{CredentialError, GroupKind, GroupProvider, GroupSnapshot};
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::time::Duration;

/// Per-attempt timeout of indexer queries.
pub const INDEXER_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SubgraphClient {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<GroupsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GroupsData {
    groups: Vec<GroupRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupRow {
    merkle_tree: MerkleTreeRow,
    members: Vec<MemberRow>,
}

#[derive(Debug, Deserialize)]
struct MerkleTreeRow {
    depth: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberRow {
    identity_commitment: String,
}

fn groups_query(group_id: u64) -> String {
    format!(
        r#"{{
  groups(where: {{ id: "{group_id}" }}) {{
    id
    merkleTree {{ root depth numberOfLeaves }}
    members(orderBy: index) {{ identityCommitment }}
  }}
}}"#
    )
}

/// Indexers report commitments as decimal big integers; hex is accepted as well.
fn parse_commitment(s: &str) -> Result<Fr, CredentialError> {
    if s.starts_with("0x") {
        return fr_from_hex(s).map_err(CredentialError::Provider);
    }
    Fr::from_str(s)
        .map_err(|_| CredentialError::Provider(format!("invalid commitment '{s}' from indexer")))
}

impl SubgraphClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl GroupProvider for SubgraphClient {
    async fn group_snapshot(
        &self,
        credential_id: u64,
        kind: GroupKind,
    ) -> Result<GroupSnapshot, CredentialError> {
        let group_id = kind.group_id(credential_id);
        let body = json!({ "query": groups_query(group_id) });

        let resp = retry_send(|| self.http.post(&self.url).json(&body).send())
            .await
            .map_err(|e| CredentialError::Provider(format!("indexer unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CredentialError::Provider(format!(
                "indexer answered {status} for group {group_id}"
            )));
        }

        let parsed: GraphQlResponse = resp
            .json()
            .await
            .map_err(|e| CredentialError::Provider(format!("invalid indexer response: {e}")))?;

        if let Some(err) = parsed.errors.first() {
            return Err(CredentialError::Provider(format!("indexer error: {}", err.message)));
        }

        let group = parsed
            .data
            .and_then(|d| d.groups.into_iter().next())
            .ok_or_else(|| CredentialError::Provider(format!("group {group_id} is not indexed")))?;

        let members = group
            .members
            .iter()
            .map(|m| parse_commitment(&m.identity_commitment))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(group_id, members = members.len(), "indexed group fetched");

        Ok(GroupSnapshot {
            depth: group.merkle_tree.depth,
            members,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> SubgraphClient {
        SubgraphClient::new(format!("{}/subgraph", server.uri()), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn fetches_members_of_the_derived_group_id() {
        let server = MockServer::start().await;
        // Credentials group of credential 2 is group 5.
        Mock::given(method("POST"))
            .and(path("/subgraph"))
            .and(body_string_contains(r#"id: \"5\""#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "groups": [{
                    "id": "5",
                    "merkleTree": { "root": "0", "depth": 16, "numberOfLeaves": 2 },
                    "members": [
                        { "identityCommitment": "42" },
                        { "identityCommitment": "0x2a" }
                    ]
                }]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = client(&server)
            .group_snapshot(2, GroupKind::Credentials)
            .await
            .unwrap();
        assert_eq!(snapshot.depth, 16);
        assert_eq!(snapshot.members, vec![Fr::from(42u64), Fr::from(42u64)]);
    }

    #[tokio::test]
    async fn missing_group_and_graphql_errors_are_provider_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains(r#"id: \"1\""#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "groups": [] } })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains(r#"id: \"3\""#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{ "message": "indexing_error" }]
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.group_snapshot(1, GroupKind::Grade).await.unwrap_err();
        assert!(matches!(err, CredentialError::Provider(m) if m.contains("not indexed")));

        let err = client.group_snapshot(1, GroupKind::NoCredentials).await.unwrap_err();
        assert!(matches!(err, CredentialError::Provider(m) if m.contains("indexing_error")));
    }

    #[tokio::test]
    async fn error_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .group_snapshot(1, GroupKind::Grade)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Provider(m) if m.contains("503")));
    }
}
