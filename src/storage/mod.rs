//! Record stores for attempts, channel-link sessions and client applications.
//!
//! The verification layer only sees the [`AttemptStore`] and
//! `ClientRegistry` traits. `attempts`/`clients` back them with SQLite,
//! `memory` with process-local maps for tests and throwaway runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use thiserror::Error;

use crate::core::config;
use crate::core::retry::{retry_with_timeout, RetryConfig, Retryable};
use crate::verification::model::{AttemptId, ChannelId, ChannelLinkSession, VerificationAttempt};

pub mod attempts;
pub mod clients;
pub mod db;
pub mod memory;
pub mod migrations;

pub use attempts::SqliteAttemptStore;
pub use clients::SqliteClientRegistry;
pub use db::{create_pool, DbPool};
pub use memory::{InMemoryAttemptStore, InMemoryClientRegistry};

/// Store faults. Business outcomes never show up here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Store call timed out")]
    Timeout,

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<tokio::time::error::Elapsed> for StoreError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        StoreError::Timeout
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            StoreError::Pool(_) | StoreError::Timeout => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable storage for attempts and link sessions.
///
/// `update_attempt` is the only way an existing attempt changes: a
/// conditional write that succeeds only while the stored row still carries
/// `expected_version`.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Inserts a new attempt. Fails with `Duplicate` if the id exists.
    async fn insert_attempt(&self, attempt: &VerificationAttempt) -> StoreResult<()>;

    async fn get_attempt(&self, id: &AttemptId) -> StoreResult<Option<VerificationAttempt>>;

    /// Replaces the stored attempt if its version is still `expected_version`.
    ///
    /// Returns `false` when another writer got there first (or the row is
    /// gone); the caller re-reads and re-applies its mutation.
    async fn update_attempt(&self, attempt: &VerificationAttempt, expected_version: u64) -> StoreResult<bool>;

    /// `(phone, chat)` index: another attempt for `phone` already bound to `channel`.
    ///
    /// A channel identity is only ever bound after it proved the number, so
    /// any hit is an attempt that reached `code_sent`.
    async fn find_bound_attempt(
        &self,
        phone: &str,
        channel: ChannelId,
        exclude: &AttemptId,
    ) -> StoreResult<Option<VerificationAttempt>>;

    /// `(chat)` index: newest `code_sent` attempt bound to `channel` that is still live at `now`.
    async fn find_live_code_sent(
        &self,
        channel: ChannelId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VerificationAttempt>>;

    /// Opens (or replaces) the link session of `session.channel_identity`.
    async fn put_session(&self, session: &ChannelLinkSession) -> StoreResult<()>;

    async fn get_session(&self, channel: ChannelId) -> StoreResult<Option<ChannelLinkSession>>;

    /// Deletes the session of `channel` only while it still points at
    /// `attempt_id`; a session replaced by a newer entry survives.
    /// Deleting an absent session is not an error.
    async fn delete_session(&self, channel: ChannelId, attempt_id: &AttemptId) -> StoreResult<()>;
}

/// Runs one store call with the request-path timeout and retry budget.
pub async fn with_retry<F, Fut, T>(operation: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    retry_with_timeout(&RetryConfig::quick(), config::network::store_timeout(), operation).await
}
