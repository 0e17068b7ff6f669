//! SQLite-backed [`AttemptStore`].
//!
//! Each call checks a connection out of the r2d2 pool inside
//! `spawn_blocking`, so the async handlers never block on SQLite.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::storage::{AttemptStore, DbPool, StoreError, StoreResult};
use crate::verification::model::{AttemptId, AttemptStatus, ChannelId, ChannelLinkSession, VerificationAttempt};

const ATTEMPT_COLUMNS: &str = "id, client_id, submitted_phone_number, code, expires_at, guesses_remaining, \
     channel_identity, channel_asserted_phone_number, status, mismatch_count, version, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteAttemptStore {
    pool: DbPool,
}

impl SqliteAttemptStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            op(&conn)
        })
        .await?
    }
}

/// Timestamps are stored as fixed-width RFC 3339 (UTC, millis) so text
/// order is time order.
fn to_db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", value, e)))
}

struct RawAttempt {
    id: String,
    client_id: String,
    submitted_phone_number: String,
    code: String,
    expires_at: String,
    guesses_remaining: i64,
    channel_identity: Option<i64>,
    channel_asserted_phone_number: Option<String>,
    status: String,
    mismatch_count: i64,
    version: i64,
    created_at: String,
    updated_at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAttempt> {
    Ok(RawAttempt {
        id: row.get(0)?,
        client_id: row.get(1)?,
        submitted_phone_number: row.get(2)?,
        code: row.get(3)?,
        expires_at: row.get(4)?,
        guesses_remaining: row.get(5)?,
        channel_identity: row.get(6)?,
        channel_asserted_phone_number: row.get(7)?,
        status: row.get(8)?,
        mismatch_count: row.get(9)?,
        version: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl TryFrom<RawAttempt> for VerificationAttempt {
    type Error = StoreError;

    fn try_from(raw: RawAttempt) -> StoreResult<Self> {
        let status = raw.status.parse::<AttemptStatus>().map_err(StoreError::Corrupt)?;
        let version = u64::try_from(raw.version)
            .map_err(|_| StoreError::Corrupt(format!("negative version {}", raw.version)))?;
        Ok(VerificationAttempt {
            id: AttemptId::from(raw.id),
            client_id: raw.client_id,
            submitted_phone_number: raw.submitted_phone_number,
            code: raw.code,
            expires_at: parse_time(&raw.expires_at)?,
            guesses_remaining: raw.guesses_remaining,
            channel_identity: raw.channel_identity.map(ChannelId),
            channel_asserted_phone_number: raw.channel_asserted_phone_number,
            status,
            mismatch_count: raw.mismatch_count,
            version,
            created_at: parse_time(&raw.created_at)?,
            updated_at: parse_time(&raw.updated_at)?,
        })
    }
}

fn query_attempt<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> StoreResult<Option<VerificationAttempt>> {
    let raw = conn.query_row(sql, params, read_row).optional()?;
    raw.map(VerificationAttempt::try_from).transpose()
}

#[async_trait]
impl AttemptStore for SqliteAttemptStore {
    async fn insert_attempt(&self, attempt: &VerificationAttempt) -> StoreResult<()> {
        let attempt = attempt.clone();
        self.run(move |conn| {
            let result = conn.execute(
                &format!(
                    "INSERT INTO verification_attempts ({}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    ATTEMPT_COLUMNS
                ),
                params![
                    attempt.id.as_str(),
                    attempt.client_id,
                    attempt.submitted_phone_number,
                    attempt.code,
                    to_db_time(&attempt.expires_at),
                    attempt.guesses_remaining,
                    attempt.channel_identity.map(|c| c.0),
                    attempt.channel_asserted_phone_number,
                    attempt.status.as_str(),
                    attempt.mismatch_count,
                    attempt.version as i64,
                    to_db_time(&attempt.created_at),
                    to_db_time(&attempt.updated_at),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                    Err(StoreError::Duplicate(attempt.id.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn get_attempt(&self, id: &AttemptId) -> StoreResult<Option<VerificationAttempt>> {
        let id = id.clone();
        self.run(move |conn| {
            query_attempt(
                conn,
                &format!("SELECT {} FROM verification_attempts WHERE id = ?1", ATTEMPT_COLUMNS),
                params![id.as_str()],
            )
        })
        .await
    }

    async fn update_attempt(&self, attempt: &VerificationAttempt, expected_version: u64) -> StoreResult<bool> {
        let attempt = attempt.clone();
        self.run(move |conn| {
            // id, client, submitted phone, code and created_at are immutable
            let changed = conn.execute(
                "UPDATE verification_attempts SET \
                     expires_at = ?1, guesses_remaining = ?2, channel_identity = ?3, \
                     channel_asserted_phone_number = ?4, status = ?5, mismatch_count = ?6, \
                     version = ?7, updated_at = ?8 \
                 WHERE id = ?9 AND version = ?10",
                params![
                    to_db_time(&attempt.expires_at),
                    attempt.guesses_remaining,
                    attempt.channel_identity.map(|c| c.0),
                    attempt.channel_asserted_phone_number,
                    attempt.status.as_str(),
                    attempt.mismatch_count,
                    attempt.version as i64,
                    to_db_time(&attempt.updated_at),
                    attempt.id.as_str(),
                    expected_version as i64,
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn find_bound_attempt(
        &self,
        phone: &str,
        channel: ChannelId,
        exclude: &AttemptId,
    ) -> StoreResult<Option<VerificationAttempt>> {
        let phone = phone.to_string();
        let exclude = exclude.clone();
        self.run(move |conn| {
            query_attempt(
                conn,
                &format!(
                    "SELECT {} FROM verification_attempts \
                     WHERE submitted_phone_number = ?1 AND channel_identity = ?2 AND id != ?3 \
                     ORDER BY updated_at DESC LIMIT 1",
                    ATTEMPT_COLUMNS
                ),
                params![phone, channel.0, exclude.as_str()],
            )
        })
        .await
    }

    async fn find_live_code_sent(
        &self,
        channel: ChannelId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VerificationAttempt>> {
        self.run(move |conn| {
            query_attempt(
                conn,
                &format!(
                    "SELECT {} FROM verification_attempts \
                     WHERE channel_identity = ?1 AND status = ?2 AND expires_at >= ?3 \
                     ORDER BY updated_at DESC LIMIT 1",
                    ATTEMPT_COLUMNS
                ),
                params![channel.0, AttemptStatus::CodeSent.as_str(), to_db_time(&now)],
            )
        })
        .await
    }

    async fn put_session(&self, session: &ChannelLinkSession) -> StoreResult<()> {
        let session = session.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO channel_link_sessions (channel_identity, attempt_id, created_at) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT(channel_identity) DO UPDATE SET \
                     attempt_id = excluded.attempt_id, created_at = excluded.created_at",
                params![
                    session.channel_identity.0,
                    session.attempt_id.as_str(),
                    to_db_time(&session.created_at)
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, channel: ChannelId) -> StoreResult<Option<ChannelLinkSession>> {
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT attempt_id, created_at FROM channel_link_sessions WHERE channel_identity = ?1",
                    params![channel.0],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            row.map(|(attempt_id, created_at)| {
                Ok(ChannelLinkSession {
                    channel_identity: channel,
                    attempt_id: AttemptId::from(attempt_id),
                    created_at: parse_time(&created_at)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn delete_session(&self, channel: ChannelId, attempt_id: &AttemptId) -> StoreResult<()> {
        let attempt_id = attempt_id.clone();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM channel_link_sessions WHERE channel_identity = ?1 AND attempt_id = ?2",
                params![channel.0, attempt_id.as_str()],
            )?;
            Ok(())
        })
        .await
    }
}
