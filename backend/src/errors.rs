use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use credential_proofs::CredentialError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Well-formed input that could not be turned into a proof or accepted as one.
    #[error("unprocessable: {0}")]
    Unprocessable(String),

    /// An upstream collaborator (indexer, relayer) failed.
    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("internal error")]
    Internal,
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Validation(_) | CredentialError::Protocol(_) => {
                ApiError::BadRequest(e.to_string())
            }
            CredentialError::ProofGeneration(_) => ApiError::Unprocessable(e.to_string()),
            CredentialError::Provider(_) => ApiError::BadGateway(e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ApiError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            ApiError::BadGateway(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };

        (status, Json(ErrorBody { error: msg })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_errors_map_to_statuses() {
        let cases = [
            (CredentialError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (CredentialError::Protocol("x".into()), StatusCode::BAD_REQUEST),
            (CredentialError::ProofGeneration("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (CredentialError::Provider("x".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
