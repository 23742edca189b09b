use crate::db::{self, StoredCredential};
use crate::errors::ApiError;
use crate::models::*;
use crate::relayer::RelayCall;
use crate::state::{credential_circuits, AppState};
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use chrono::Utc;
use credential_proofs::codec::{encode_credential_update, encode_test_config, proof_hex_words, PackedProof};
use credential_proofs::constants::MAX_TREE_DEPTH;
use credential_proofs::groth16::{serialize_pk, serialize_vk};
use credential_proofs::hash::fr_to_hex;
use credential_proofs::{
    grading, CircuitId, GradeResult, GroupKind, GroupProvider, Policy, ProofResult, ProofVerifier,
    RateFullProof, TestAnswers, VerificationFailure,
};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/v1/credentials", post(register_credential))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/credentials/:id", get(get_credential))
        .route("/api/v1/credentials/:id/grade", post(grade_answers))
        .route("/api/v1/credentials/:id/groups/:kind", get(get_group))
        .route("/api/v1/credentials/:id/vk", get(get_vk))
        .route("/api/v1/credentials/:id/pk/:circuit", get(get_pk))
        .route("/api/v1/credentials/:id/solutions", post(submit_solution))
        .route("/api/v1/credentials/:id/ratings", post(submit_rating))
        .route("/api/v1/submissions/:id", get(get_submission))
        .merge(protected_routes)
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(provided_key) = headers.get("X-API-KEY") {
        if provided_key == state.config.api_key.as_str() {
            return Ok(next.run(request).await);
        }
    }

    tracing::warn!("unauthorized access attempt");
    Err(StatusCode::UNAUTHORIZED)
}

async fn load_credential(state: &AppState, id: u64) -> Result<StoredCredential, ApiError> {
    db::get_credential(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("credential {id} not found")))
}

fn credential_response(credential: StoredCredential) -> CredentialResponse {
    CredentialResponse {
        credential_id: credential.credential_id,
        created_at: credential.created_at,
        tree_depth: credential.tree_depth,
        policy: Policy::of(&credential.config),
        config_hex: format!("0x{}", hex::encode(encode_test_config(&credential.config))),
        config: credential.config,
    }
}

async fn register_credential(
    State(state): State<AppState>,
    Json(req): Json<RegisterCredentialRequest>,
) -> Result<(StatusCode, Json<CredentialResponse>), ApiError> {
    let credential_id = req.credential_id;
    if credential_id == 0 {
        return Err(ApiError::BadRequest("credential ids start at 1".to_string()));
    }
    if req.tree_depth == 0 || req.tree_depth > MAX_TREE_DEPTH {
        return Err(ApiError::BadRequest(format!(
            "tree depth must be between 1 and {MAX_TREE_DEPTH}"
        )));
    }
    req.config.validate()?;

    // Secondary proofs are made against the required credential's trees, with the same circuits.
    let required = req.config.required_credential;
    if required != 0 {
        if required == credential_id {
            return Err(ApiError::BadRequest("a credential cannot require itself".to_string()));
        }
        let Some(required_credential) = db::get_credential(&state.db, required).await? else {
            return Err(ApiError::BadRequest(format!(
                "required credential {required} is not registered"
            )));
        };
        if required_credential.tree_depth != req.tree_depth {
            return Err(ApiError::BadRequest(format!(
                "required credential {required} uses tree depth {}, not {}",
                required_credential.tree_depth, req.tree_depth
            )));
        }
    }

    let created_at = db::insert_credential(&state.db, credential_id, req.tree_depth, &req.config).await?;
    let policy = Policy::of(&req.config);
    tracing::info!(credential_id, ?policy, tree_depth = req.tree_depth, "registered credential");

    Ok((
        StatusCode::CREATED,
        Json(credential_response(StoredCredential {
            credential_id,
            created_at,
            tree_depth: req.tree_depth,
            config: req.config,
        })),
    ))
}

async fn get_credential(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<CredentialResponse>, ApiError> {
    Ok(Json(credential_response(load_credential(&state, id).await?)))
}

async fn grade_answers(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(answers): Json<TestAnswers>,
) -> Result<Json<GradeResult>, ApiError> {
    let credential = load_credential(&state, id).await?;
    Ok(Json(grading::grade(&answers, &credential.config)?))
}

async fn get_group(
    State(state): State<AppState>,
    Path((id, kind)): Path<(u64, String)>,
) -> Result<Json<GroupResponse>, ApiError> {
    let kind = GroupKind::parse(&kind).ok_or_else(|| {
        ApiError::BadRequest("group must be one of grade, credentials, no-credentials".to_string())
    })?;
    let credential = load_credential(&state, id).await?;
    let groups = state
        .groups
        .as_ref()
        .ok_or_else(|| ApiError::BadGateway("no group indexer is configured".to_string()))?;

    let snapshot = groups.group_snapshot(id, kind).await?;
    if snapshot.depth != credential.tree_depth {
        return Err(ApiError::BadGateway(format!(
            "indexer reports depth {} for a credential registered with depth {}",
            snapshot.depth, credential.tree_depth
        )));
    }
    let group = snapshot.into_group(id)?;

    Ok(Json(GroupResponse {
        credential_id: id,
        group: kind,
        group_id: kind.group_id(id),
        depth: group.depth(),
        root: fr_to_hex(&group.root()),
        members: group.members().iter().map(fr_to_hex).collect(),
    }))
}

fn circuit_name(circuit: &CircuitId) -> &'static str {
    match circuit {
        CircuitId::TestSolution { .. } => "test-solution",
        CircuitId::Ownership { .. } => "ownership",
        CircuitId::GradeClaim { .. } => "grade-claim",
    }
}

async fn get_vk(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<ZkVkResponse>, ApiError> {
    let credential = load_credential(&state, id).await?;
    let b64 = base64::engine::general_purpose::STANDARD;

    let mut keys = Vec::new();
    for circuit in credential_circuits(&credential.config, credential.tree_depth) {
        let circuit_keys = state.ensure_keys(circuit).await?;
        let vk_bytes = serialize_vk(circuit_keys.vk()).map_err(|_| ApiError::Internal)?;
        keys.push(CircuitKey {
            circuit: circuit.to_string(),
            key_b64: b64.encode(vk_bytes),
        });
    }

    Ok(Json(ZkVkResponse {
        curve: "bn254".to_string(),
        proof_system: "groth16".to_string(),
        keys,
    }))
}

/// Proving key download for provers; `circuit` is `test-solution`, `ownership` or `grade-claim`.
async fn get_pk(
    State(state): State<AppState>,
    Path((id, name)): Path<(u64, String)>,
) -> Result<Json<CircuitKey>, ApiError> {
    let credential = load_credential(&state, id).await?;
    let circuit = credential_circuits(&credential.config, credential.tree_depth)
        .into_iter()
        .find(|c| circuit_name(c) == name)
        .ok_or_else(|| ApiError::NotFound(format!("credential {id} has no '{name}' circuit")))?;

    let keys = state.ensure_keys(circuit).await?;
    let pk_bytes = serialize_pk(&keys.pk).map_err(|_| ApiError::Internal)?;

    Ok(Json(CircuitKey {
        circuit: circuit.to_string(),
        key_b64: base64::engine::general_purpose::STANDARD.encode(pk_bytes),
    }))
}

fn new_submission(credential_id: u64, kind: SubmissionKind, nullifier_hash: Option<String>) -> SubmissionRecord {
    SubmissionRecord {
        submission_id: Uuid::new_v4(),
        credential_id,
        kind,
        created_at: Utc::now(),
        status: SubmissionStatus::Pending,
        nullifier_hash,
        payload_hex: None,
        detail: None,
    }
}

/// Reject a claimed submission whose request failed before a verdict, releasing its nullifier.
async fn abandon(state: &AppState, mut record: SubmissionRecord, err: ApiError) -> ApiError {
    record.status = SubmissionStatus::Rejected;
    record.detail = Some(err.to_string());
    if let Err(settle_err) = db::settle_submission(&state.db, &record).await {
        tracing::error!(submission_id = %record.submission_id, %settle_err, "could not release submission");
    }
    err
}

async fn relay(state: &AppState, record: &mut SubmissionRecord, call: RelayCall) {
    let Some(relayer) = &state.relayer else {
        record.status = SubmissionStatus::Verified;
        return;
    };
    match relayer.relay(&call).await {
        Ok(()) => record.status = SubmissionStatus::Relayed,
        Err(e) => {
            record.status = SubmissionStatus::RelayFailed;
            record.detail = Some(e.to_string());
        }
    }
}

async fn finish_submission(
    state: &AppState,
    record: SubmissionRecord,
) -> Result<(StatusCode, Json<SubmissionRecord>), ApiError> {
    db::settle_submission(&state.db, &record).await?;
    tracing::info!(
        submission_id = %record.submission_id,
        credential_id = record.credential_id,
        kind = record.kind.as_str(),
        status = record.status.as_str(),
        "recorded submission"
    );

    let status = match record.status {
        SubmissionStatus::Pending => StatusCode::ACCEPTED,
        SubmissionStatus::Rejected => StatusCode::UNPROCESSABLE_ENTITY,
        SubmissionStatus::RelayFailed => StatusCode::BAD_GATEWAY,
        SubmissionStatus::Verified | SubmissionStatus::Relayed => StatusCode::CREATED,
    };
    Ok((status, Json(record)))
}

async fn check_solution(
    state: &AppState,
    credential: &StoredCredential,
    result: &ProofResult,
) -> Result<Result<(), VerificationFailure>, ApiError> {
    state
        .ensure_all_keys(&credential_circuits(&credential.config, credential.tree_depth))
        .await?;

    let verifier = ProofVerifier::new(state.zk.clone());
    let config = credential.config.clone();
    let checked = result.clone();
    tokio::task::spawn_blocking(move || verifier.verify_detailed(&checked, &config))
        .await
        .map_err(|_| ApiError::Internal)
}

async fn check_rating(
    state: &AppState,
    credential: &StoredCredential,
    proof: &RateFullProof,
) -> Result<Result<(), VerificationFailure>, ApiError> {
    state
        .ensure_keys(CircuitId::Ownership {
            depth: credential.tree_depth,
        })
        .await?;

    let verifier = ProofVerifier::new(state.zk.clone());
    let checked = proof.clone();
    tokio::task::spawn_blocking(move || verifier.verify_rate_detailed(&checked))
        .await
        .map_err(|_| ApiError::Internal)
}

async fn submit_solution(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(result): Json<ProofResult>,
) -> Result<(StatusCode, Json<SubmissionRecord>), ApiError> {
    let credential = load_credential(&state, id).await?;
    let policy = Policy::of(&credential.config);
    if result.policy() != policy {
        return Err(ApiError::BadRequest(format!(
            "credential {id} takes {policy:?} solutions, got {:?}",
            result.policy()
        )));
    }

    // Only the registered shapes are verified; anything else would trigger a fresh setup.
    let test = result.test();
    let (secondary_depth, nullifier_hash) = match &result {
        ProofResult::Open(_) => (credential.tree_depth, None),
        ProofResult::CredentialRestricted { ownership, .. } => {
            (ownership.tree_depth, Some(fr_to_hex(&ownership.nullifier_hash)))
        }
        ProofResult::GradeRestricted { grade_claim, .. } => {
            (grade_claim.tree_depth, Some(fr_to_hex(&grade_claim.nullifier_hash)))
        }
    };
    if test.test_height != credential.config.test_height
        || test.tree_depth != credential.tree_depth
        || secondary_depth != credential.tree_depth
    {
        return Err(ApiError::BadRequest(
            "proof shape does not match the credential's circuits".to_string(),
        ));
    }

    let mut record = new_submission(id, SubmissionKind::Solution, nullifier_hash);
    db::claim_submission(&state.db, &record).await?;
    let outcome = match check_solution(&state, &credential, &result).await {
        Ok(outcome) => outcome,
        Err(err) => return Err(abandon(&state, record, err).await),
    };

    match outcome {
        Err(failure) => {
            tracing::warn!(credential_id = id, %failure, "solution rejected");
            record.detail = Some(failure.to_string());
        }
        Ok(()) => {
            let update_hex = format!("0x{}", hex::encode(encode_credential_update(&result)));
            record.payload_hex = Some(update_hex.clone());
            relay(
                &state,
                &mut record,
                RelayCall::CredentialUpdate {
                    credential_id: id,
                    update_hex,
                },
            )
            .await;
        }
    }

    finish_submission(&state, record).await
}

async fn submit_rating(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(proof): Json<RateFullProof>,
) -> Result<(StatusCode, Json<SubmissionRecord>), ApiError> {
    let credential = load_credential(&state, id).await?;
    let ownership = &proof.ownership;
    if ownership.tree_depth != credential.tree_depth {
        return Err(ApiError::BadRequest(format!(
            "credential {id} uses tree depth {}, got a proof for depth {}",
            credential.tree_depth, ownership.tree_depth
        )));
    }

    let mut record = new_submission(id, SubmissionKind::Rating, Some(fr_to_hex(&ownership.nullifier_hash)));
    db::claim_submission(&state.db, &record).await?;
    let outcome = match check_rating(&state, &credential, &proof).await {
        Ok(outcome) => outcome,
        Err(err) => return Err(abandon(&state, record, err).await),
    };

    match outcome {
        Err(failure) => {
            tracing::warn!(credential_id = id, %failure, "rating rejected");
            record.detail = Some(failure.to_string());
        }
        Ok(()) => {
            let call = RelayCall::IssuerRating {
                credential_id: id,
                merkle_tree_root: fr_to_hex(&ownership.merkle_tree_root),
                nullifier_hash: fr_to_hex(&ownership.nullifier_hash),
                proof: proof_hex_words(&PackedProof::pack(&ownership.proof)),
                rating: proof.rating,
                comment: proof.comment.clone(),
            };
            relay(&state, &mut record, call).await;
        }
    }

    finish_submission(&state, record).await
}

async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubmissionRecord>, ApiError> {
    db::get_submission(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("submission not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use ark_bn254::Fr;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use credential_proofs::commitment::identity_commitment;
    use credential_proofs::orchestrator::SolutionRequest;
    use credential_proofs::types::{open_answers_hashes, padded_multiple_choice_answers, root_from_leaves};
    use credential_proofs::{GroupInput, GroupState, IdentitySecret, ProofOrchestrator, TestConfig};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DEPTH: usize = 3;

    fn test_config() -> TestConfig {
        let open_answers_hashes = open_answers_hashes(&["sneed", "chuck"], 2);
        TestConfig {
            test_height: 2,
            n_questions: 2,
            minimum_grade: 60,
            multiple_choice_weight: 50,
            multiple_choice_root: root_from_leaves(&padded_multiple_choice_answers(&[1, 2, 3, 4], 2)),
            open_answers_hashes_root: root_from_leaves(&open_answers_hashes),
            open_answers_hashes,
            admin: Default::default(),
            required_credential: 0,
            required_credential_grade_threshold: 0,
        }
    }

    fn answers() -> TestAnswers {
        TestAnswers {
            multiple_choice_answers: vec![1, 2, 3, 4],
            open_answers: vec!["sneed".to_string(), "feed".to_string()],
        }
    }

    fn identity() -> IdentitySecret {
        IdentitySecret::new(Fr::from(1_234u64), Fr::from(5_678u64))
    }

    async fn app_state(config: GatewayConfig) -> AppState {
        AppState::new(db::connect_memory().await.unwrap(), config).unwrap()
    }

    fn request(method: &str, uri: &str, body: Option<Value>, api_key: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().method(method).uri(uri);
        if let Some(key) = api_key {
            builder = builder.header("X-API-KEY", key);
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: HttpRequest<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn register(app: &Router, credential_id: u64, config: &TestConfig) -> (StatusCode, Value) {
        let body = json!({ "credential_id": credential_id, "tree_depth": DEPTH, "config": config });
        send(app, request("POST", "/api/v1/credentials", Some(body), Some("test-key"))).await
    }

    #[tokio::test]
    async fn registration_is_protected_and_validated() {
        let app = router(app_state(GatewayConfig::for_tests()).await);
        let body = json!({ "credential_id": 1, "tree_depth": DEPTH, "config": test_config() });

        let (status, _) = send(&app, request("POST", "/api/v1/credentials", Some(body.clone()), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) =
            send(&app, request("POST", "/api/v1/credentials", Some(body), Some("wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, created) = register(&app, 1, &test_config()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["policy"], "open");
        assert!(created["config_hex"].as_str().unwrap().starts_with("0x"));

        let (status, _) = register(&app, 1, &test_config()).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, fetched) = send(&app, request("GET", "/api/v1/credentials/1", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["tree_depth"], DEPTH);
        assert_eq!(fetched["config_hex"], created["config_hex"]);

        let (status, _) = send(&app, request("GET", "/api/v1/credentials/9", None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = register(&app, 0, &test_config()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut restricted = test_config();
        restricted.required_credential = 7;
        let (status, body) = register(&app, 2, &restricted).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("not registered"));

        restricted.required_credential = 1;
        let (status, created) = register(&app, 2, &restricted).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["policy"], "credential-restricted");
    }

    #[tokio::test]
    async fn grading_uses_the_registered_config() {
        let app = router(app_state(GatewayConfig::for_tests()).await);
        register(&app, 1, &test_config()).await;

        let body = serde_json::to_value(answers()).unwrap();
        let (status, graded) =
            send(&app, request("POST", "/api/v1/credentials/1/grade", Some(body), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(graded["grade"], 75);
        assert_eq!(graded["pass"], true);

        let too_many = json!({ "multiple_choice_answers": [1, 2, 3, 4, 5], "open_answers": ["sneed"] });
        let (status, body) =
            send(&app, request("POST", "/api/v1/credentials/1/grade", Some(too_many), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("validation"));
    }

    #[tokio::test]
    async fn groups_are_proxied_from_the_indexer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/subgraph"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "groups": [{
                    "id": "2",
                    "merkleTree": { "root": "0", "depth": DEPTH, "numberOfLeaves": 2 },
                    "members": [{ "identityCommitment": "7" }, { "identityCommitment": "8" }]
                }]}
            })))
            .mount(&server)
            .await;

        let no_indexer = router(app_state(GatewayConfig::for_tests()).await);
        register(&no_indexer, 1, &test_config()).await;
        let (status, _) =
            send(&no_indexer, request("GET", "/api/v1/credentials/1/groups/credentials", None, None)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let mut config = GatewayConfig::for_tests();
        config.subgraph_url = Some(format!("{}/subgraph", server.uri()));
        let app = router(app_state(config).await);
        register(&app, 1, &test_config()).await;

        let (status, _) =
            send(&app, request("GET", "/api/v1/credentials/1/groups/everyone", None, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, group) =
            send(&app, request("GET", "/api/v1/credentials/1/groups/credentials", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(group["group_id"], 2);
        assert_eq!(group["members"].as_array().unwrap().len(), 2);

        let expected = GroupState::with_members(1, DEPTH, [Fr::from(7u64), Fr::from(8u64)]).unwrap();
        assert_eq!(group["root"], fr_to_hex(&expected.root()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn verified_submissions_are_relayed_once() {
        let relayer = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&relayer)
            .await;

        let mut config = GatewayConfig::for_tests();
        config.relayer_webhook_url = Some(format!("{}/webhook", relayer.uri()));
        let state = app_state(config).await;
        let app = router(state.clone());
        register(&app, 1, &test_config()).await;

        // The prover fetches these keys from the gateway; here it shares the backend directly.
        state
            .ensure_all_keys(&credential_circuits(&test_config(), DEPTH))
            .await
            .unwrap();
        let orchestrator = ProofOrchestrator::new(state.zk.clone());
        let result = orchestrator
            .generate_solution_proof(SolutionRequest {
                identity: identity(),
                answers: answers(),
                config: test_config(),
                identity_group: GroupInput::Full(GroupState::new(1, DEPTH).unwrap()),
                grade_group: GroupInput::Full(GroupState::new(1, DEPTH).unwrap()),
                required: None,
            })
            .await
            .unwrap();

        let body = serde_json::to_value(&result).unwrap();
        let (status, submission) =
            send(&app, request("POST", "/api/v1/credentials/1/solutions", Some(body), None)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(submission["status"], "relayed");
        assert!(submission["payload_hex"].as_str().unwrap().starts_with("0x00"));

        let uri = format!("/api/v1/submissions/{}", submission["submission_id"].as_str().unwrap());
        let (status, fetched) = send(&app, request("GET", &uri, None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["payload_hex"], submission["payload_hex"]);

        // A grade commitment the proof does not carry.
        let ProofResult::Open(mut test) = result else {
            panic!("open credentials produce open results");
        };
        test.grade_commitment += Fr::from(1u64);
        let body = serde_json::to_value(ProofResult::Open(test)).unwrap();
        let (status, rejected) =
            send(&app, request("POST", "/api/v1/credentials/1/solutions", Some(body), None)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(rejected["status"], "rejected");
        assert!(rejected["payload_hex"].is_null());

        let holders = GroupState::with_members(1, DEPTH, [identity_commitment(&identity())]).unwrap();
        let rating = orchestrator
            .generate_rate_issuer_proof(&identity(), GroupInput::Full(holders), 90, "fair test")
            .await
            .unwrap();
        let body = serde_json::to_value(&rating).unwrap();
        let (status, rated) =
            send(&app, request("POST", "/api/v1/credentials/1/ratings", Some(body.clone()), None)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(rated["status"], "relayed");

        let (status, _) =
            send(&app, request("POST", "/api/v1/credentials/1/ratings", Some(body), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let calls: Vec<Value> = relayer
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.body_json().unwrap())
            .collect();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["functionName"], "updateCredential");
        assert_eq!(calls[0]["functionParameters"][1], submission["payload_hex"]);
        assert_eq!(calls[1]["functionName"], "rateCredential");
        assert_eq!(calls[1]["functionParameters"][4], 90);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_ratings_spend_the_nullifier_once() {
        let relayer = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&relayer)
            .await;

        let mut config = GatewayConfig::for_tests();
        config.relayer_webhook_url = Some(format!("{}/webhook", relayer.uri()));
        let state = app_state(config).await;
        let app = router(state.clone());
        register(&app, 1, &test_config()).await;

        state
            .ensure_keys(CircuitId::Ownership { depth: DEPTH })
            .await
            .unwrap();
        let holders = GroupState::with_members(1, DEPTH, [identity_commitment(&identity())]).unwrap();
        let rating = ProofOrchestrator::new(state.zk.clone())
            .generate_rate_issuer_proof(&identity(), GroupInput::Full(holders), 40, "too long")
            .await
            .unwrap();
        let body = serde_json::to_value(&rating).unwrap();

        let ((first, _), (second, _)) = tokio::join!(
            send(&app, request("POST", "/api/v1/credentials/1/ratings", Some(body.clone()), None)),
            send(&app, request("POST", "/api/v1/credentials/1/ratings", Some(body), None)),
        );
        let mut statuses = [first, second];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);
    }
}
