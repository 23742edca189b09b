use crate::errors::ApiError;
use crate::models::{SubmissionKind, SubmissionRecord, SubmissionStatus};
use chrono::{DateTime, Utc};
use credential_proofs::codec::{decode_test_config, encode_test_config};
use credential_proofs::TestConfig;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use uuid::Uuid;

pub type Db = Pool<Sqlite>;

/// A registered credential, with its config decoded from the stored registry encoding.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub credential_id: u64,
    pub created_at: DateTime<Utc>,
    pub tree_depth: usize,
    pub config: TestConfig,
}

pub async fn connect(db_url: &str) -> Result<Db, ApiError> {
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .map_err(|_| ApiError::Internal)
}

/// Single-connection in-memory database; every pooled connection would otherwise see its own.
pub async fn connect_memory() -> Result<Db, ApiError> {
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .map_err(|_| ApiError::Internal)?;
    init_schema(&db).await?;
    Ok(db)
}

pub async fn init_schema(db: &Db) -> Result<(), ApiError> {
    // Configs are stored exactly as the registry encodes them.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS credentials (
  id INTEGER PRIMARY KEY,
  created_at TEXT NOT NULL,
  tree_depth INTEGER NOT NULL,
  config BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS submissions (
  id TEXT PRIMARY KEY,
  credential_id INTEGER NOT NULL,
  kind TEXT NOT NULL,
  created_at TEXT NOT NULL,
  status TEXT NOT NULL,
  nullifier_hash TEXT,
  payload_hex TEXT,
  detail TEXT
);

-- A nullifier is held by at most one live submission per credential and kind.
CREATE UNIQUE INDEX IF NOT EXISTS submissions_live_nullifier
  ON submissions (credential_id, kind, nullifier_hash)
  WHERE status IN ('pending', 'verified', 'relayed');
"#,
    )
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    Ok(())
}

pub async fn insert_credential(
    db: &Db,
    credential_id: u64,
    tree_depth: usize,
    config: &TestConfig,
) -> Result<DateTime<Utc>, ApiError> {
    let created_at = Utc::now();

    let res = sqlx::query(
        r#"INSERT OR IGNORE INTO credentials (id, created_at, tree_depth, config)
           VALUES (?, ?, ?, ?)"#,
    )
    .bind(credential_id as i64)
    .bind(created_at.to_rfc3339())
    .bind(tree_depth as i64)
    .bind(encode_test_config(config))
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::Conflict(format!("credential {credential_id} is already registered")));
    }
    Ok(created_at)
}

pub async fn get_credential(db: &Db, credential_id: u64) -> Result<Option<StoredCredential>, ApiError> {
    let row = sqlx::query(r#"SELECT created_at, tree_depth, config FROM credentials WHERE id = ?"#)
        .bind(credential_id as i64)
        .fetch_optional(db)
        .await
        .map_err(|_| ApiError::Internal)?;

    let Some(row) = row else { return Ok(None); };

    let created_at: String = row.get(0);
    let tree_depth: i64 = row.get(1);
    let config: Vec<u8> = row.get(2);

    Ok(Some(StoredCredential {
        credential_id,
        created_at: parse_timestamp(&created_at)?,
        tree_depth: tree_depth as usize,
        // Validated on the way in; a decode failure here means the row was tampered with.
        config: decode_test_config(&config).map_err(|_| ApiError::Internal)?,
    }))
}

/// Insert a pending submission, claiming its nullifier.
///
/// Fails with `Conflict` while another pending or accepted submission of the same kind holds the
/// nullifier.
pub async fn claim_submission(db: &Db, record: &SubmissionRecord) -> Result<(), ApiError> {
    let res = sqlx::query(
        r#"INSERT INTO submissions
           (id, credential_id, kind, created_at, status, nullifier_hash, payload_hex, detail)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(record.submission_id.to_string())
    .bind(record.credential_id as i64)
    .bind(record.kind.as_str())
    .bind(record.created_at.to_rfc3339())
    .bind(record.status.as_str())
    .bind(record.nullifier_hash.as_deref())
    .bind(record.payload_hex.as_deref())
    .bind(record.detail.as_deref())
    .execute(db)
    .await;

    match res {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(ApiError::Conflict(format!(
            "nullifier {} was already used for credential {}",
            record.nullifier_hash.as_deref().unwrap_or_default(),
            record.credential_id
        ))),
        Err(_) => Err(ApiError::Internal),
    }
}

/// Store the outcome of a claimed submission. Rejected and relay-failed rows release the nullifier.
pub async fn settle_submission(db: &Db, record: &SubmissionRecord) -> Result<(), ApiError> {
    sqlx::query(r#"UPDATE submissions SET status = ?, payload_hex = ?, detail = ? WHERE id = ?"#)
        .bind(record.status.as_str())
        .bind(record.payload_hex.as_deref())
        .bind(record.detail.as_deref())
        .bind(record.submission_id.to_string())
        .execute(db)
        .await
        .map_err(|_| ApiError::Internal)?;

    Ok(())
}

pub async fn get_submission(db: &Db, submission_id: Uuid) -> Result<Option<SubmissionRecord>, ApiError> {
    let row = sqlx::query(
        r#"SELECT credential_id, kind, created_at, status, nullifier_hash, payload_hex, detail
           FROM submissions WHERE id = ?"#,
    )
    .bind(submission_id.to_string())
    .fetch_optional(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    let Some(row) = row else { return Ok(None); };

    let credential_id: i64 = row.get(0);
    let kind: String = row.get(1);
    let created_at: String = row.get(2);
    let status: String = row.get(3);

    Ok(Some(SubmissionRecord {
        submission_id,
        credential_id: credential_id as u64,
        kind: SubmissionKind::parse(&kind).ok_or(ApiError::Internal)?,
        created_at: parse_timestamp(&created_at)?,
        status: SubmissionStatus::parse(&status).ok_or(ApiError::Internal)?,
        nullifier_hash: row.get(4),
        payload_hex: row.get(5),
        detail: row.get(6),
    }))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, ApiError> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|_| ApiError::Internal)?
        .with_timezone(&Utc))
}
