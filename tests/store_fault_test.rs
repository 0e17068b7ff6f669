//! Conditional writes against a store that commits but fails to answer
//!
//! Run with: cargo test --test store_fault_test

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::TestEnvironment;
use televerify::config;
use televerify::storage::{AttemptStore, InMemoryAttemptStore, StoreError, StoreResult};
use televerify::verification::{
    AttemptId, AttemptStatus, ChannelId, ChannelLinkSession, LinkOutcome, RedeemOutcome, VerificationAttempt,
};

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Commits, then hangs past the store timeout
    StallAfterCommit,
    /// Commits, then reports a transient error
    ErrorAfterCommit,
    /// Reports a transient error without writing
    ErrorBeforeCommit,
}

/// In-memory store whose next `update_attempt` calls misbehave.
struct FaultyStore {
    inner: InMemoryAttemptStore,
    fault: Fault,
    armed: AtomicU32,
    updates: AtomicU32,
}

impl FaultyStore {
    fn new(fault: Fault) -> Self {
        Self {
            inner: InMemoryAttemptStore::new(),
            fault,
            armed: AtomicU32::new(0),
            updates: AtomicU32::new(0),
        }
    }

    fn arm(&self, times: u32) {
        self.armed.store(times, Ordering::SeqCst);
    }

    fn take_fault(&self) -> bool {
        self.armed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AttemptStore for FaultyStore {
    async fn insert_attempt(&self, attempt: &VerificationAttempt) -> StoreResult<()> {
        self.inner.insert_attempt(attempt).await
    }

    async fn get_attempt(&self, id: &AttemptId) -> StoreResult<Option<VerificationAttempt>> {
        self.inner.get_attempt(id).await
    }

    async fn update_attempt(&self, attempt: &VerificationAttempt, expected_version: u64) -> StoreResult<bool> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if !self.take_fault() {
            return self.inner.update_attempt(attempt, expected_version).await;
        }
        match self.fault {
            Fault::StallAfterCommit => {
                let written = self.inner.update_attempt(attempt, expected_version).await?;
                tokio::time::sleep(config::network::store_timeout() + Duration::from_secs(1)).await;
                Ok(written)
            }
            Fault::ErrorAfterCommit => {
                self.inner.update_attempt(attempt, expected_version).await?;
                Err(StoreError::Timeout)
            }
            Fault::ErrorBeforeCommit => Err(StoreError::Timeout),
        }
    }

    async fn find_bound_attempt(
        &self,
        phone: &str,
        channel: ChannelId,
        exclude: &AttemptId,
    ) -> StoreResult<Option<VerificationAttempt>> {
        self.inner.find_bound_attempt(phone, channel, exclude).await
    }

    async fn find_live_code_sent(
        &self,
        channel: ChannelId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VerificationAttempt>> {
        self.inner.find_live_code_sent(channel, now).await
    }

    async fn put_session(&self, session: &ChannelLinkSession) -> StoreResult<()> {
        self.inner.put_session(session).await
    }

    async fn get_session(&self, channel: ChannelId) -> StoreResult<Option<ChannelLinkSession>> {
        self.inner.get_session(channel).await
    }

    async fn delete_session(&self, channel: ChannelId, attempt_id: &AttemptId) -> StoreResult<()> {
        self.inner.delete_session(channel, attempt_id).await
    }
}

fn environment(fault: Fault) -> (Arc<FaultyStore>, TestEnvironment) {
    let store = Arc::new(FaultyStore::new(fault));
    let env = TestEnvironment::with_store(store.clone());
    (store, env)
}

async fn code_sent_attempt(env: &TestEnvironment) -> VerificationAttempt {
    let attempt = env.start("+14155550000").await;
    env.open_link(42, &attempt.id).await;
    env.share_own(42, "+14155550000").await;
    attempt
}

#[tokio::test]
async fn test_stalled_write_spends_one_guess() {
    let (store, env) = environment(Fault::StallAfterCommit);
    let attempt = code_sent_attempt(&env).await;
    let wrong = TestEnvironment::wrong_code(&attempt.code);

    store.arm(1);
    assert_eq!(
        env.redeem(&attempt.id, &wrong).await,
        RedeemOutcome::InvalidCode { guesses_remaining: 2 }
    );

    let stored = env.manager.get_attempt(&attempt.id).await.unwrap();
    assert_eq!(stored.guesses_remaining, 2);
    assert_eq!(stored.status, AttemptStatus::CodeSent);
}

#[tokio::test]
async fn test_unacknowledged_write_spends_one_guess() {
    let (store, env) = environment(Fault::ErrorAfterCommit);
    let attempt = code_sent_attempt(&env).await;
    let wrong = TestEnvironment::wrong_code(&attempt.code);

    store.arm(1);
    assert_eq!(
        env.redeem(&attempt.id, &wrong).await,
        RedeemOutcome::InvalidCode { guesses_remaining: 2 }
    );
    assert_eq!(
        env.redeem(&attempt.id, &wrong).await,
        RedeemOutcome::InvalidCode { guesses_remaining: 1 }
    );
    assert_eq!(env.manager.get_attempt(&attempt.id).await.unwrap().guesses_remaining, 1);
}

#[tokio::test]
async fn test_failed_write_is_retried_once() {
    let (store, env) = environment(Fault::ErrorBeforeCommit);
    let attempt = code_sent_attempt(&env).await;
    let wrong = TestEnvironment::wrong_code(&attempt.code);

    store.arm(1);
    let before = store.updates.load(Ordering::SeqCst);
    assert_eq!(
        env.redeem(&attempt.id, &wrong).await,
        RedeemOutcome::InvalidCode { guesses_remaining: 2 }
    );
    assert_eq!(store.updates.load(Ordering::SeqCst) - before, 2);

    let stored = env.manager.get_attempt(&attempt.id).await.unwrap();
    assert_eq!(stored.guesses_remaining, 2);
}

#[tokio::test]
async fn test_stalled_write_counts_one_mismatch() {
    let (store, env) = environment(Fault::StallAfterCommit);
    let attempt = env.start("+14155550000").await;
    env.open_link(42, &attempt.id).await;

    store.arm(1);
    assert_eq!(
        env.share_own(42, "+19995550000").await,
        LinkOutcome::PhoneMismatch { mismatches_left: 2 }
    );
    let stored = env.manager.get_attempt(&attempt.id).await.unwrap();
    assert_eq!(stored.mismatch_count, 1);
    assert_eq!(stored.status, AttemptStatus::PhoneMismatch);

    // The user can still prove the number afterwards
    env.open_link(42, &attempt.id).await;
    env.share_own(42, "+14155550000").await;
    assert_eq!(env.status(&attempt.id).await, AttemptStatus::CodeSent);
}

#[tokio::test]
async fn test_unacknowledged_write_counts_one_mismatch() {
    let (store, env) = environment(Fault::ErrorAfterCommit);
    let attempt = env.start("+14155550000").await;

    for expected_left in [2, 1] {
        env.open_link(42, &attempt.id).await;
        store.arm(1);
        assert_eq!(
            env.share_own(42, "+19995550000").await,
            LinkOutcome::PhoneMismatch {
                mismatches_left: expected_left
            }
        );
    }
    assert_eq!(env.manager.get_attempt(&attempt.id).await.unwrap().mismatch_count, 2);
}
