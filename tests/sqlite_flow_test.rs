//! The same flows against the SQLite stores (migrations, indexes, conditional updates)
//!
//! Run with: cargo test --test sqlite_flow_test

mod common;

use pretty_assertions::assert_eq;
use std::sync::Arc;

use common::{TestEnvironment, REDIRECT_URL};
use televerify::storage::AttemptStore;
use televerify::verification::{AttemptStatus, ChannelId, Delivery, LinkOutcome, RedeemOutcome};

#[tokio::test]
async fn test_sqlite_happy_path() {
    let env = TestEnvironment::sqlite().unwrap();
    let attempt = env.start("+14155550000").await;

    assert_eq!(env.open_link(42, &attempt.id).await, LinkOutcome::ContactRequested);
    assert_eq!(
        env.share_own(42, "14155550000").await,
        LinkOutcome::CodeDelivered(Delivery::Matched)
    );
    assert_eq!(env.last_code(42), Some(attempt.code.clone()));

    assert_eq!(
        env.redeem(&attempt.id, &attempt.code).await,
        RedeemOutcome::Verified {
            redirect_url: Some(REDIRECT_URL.to_string())
        }
    );

    let stored = env.manager.get_attempt(&attempt.id).await.unwrap();
    assert_eq!(stored.status, AttemptStatus::Verified);
    assert_eq!(stored.channel_identity, Some(ChannelId(42)));
    assert!(stored.version >= 2);
}

#[tokio::test]
async fn test_sqlite_fast_path_and_redelivery() {
    let env = TestEnvironment::sqlite().unwrap();
    let first = env.start("+14155550000").await;
    env.open_link(555, &first.id).await;
    env.share_own(555, "+14155550000").await;

    let second = env.start("+14155550000").await;
    assert_eq!(
        env.open_link(555, &second.id).await,
        LinkOutcome::CodeDelivered(Delivery::FastPath)
    );

    assert_eq!(env.last_code(555), Some(second.code.clone()));

    // A redelivered contact re-sends a live code instead of minting one
    assert_eq!(
        env.share_own(555, "+14155550000").await,
        LinkOutcome::CodeDelivered(Delivery::Resent)
    );
    assert_eq!(env.transport.codes_to(ChannelId(555)), 3);
    let resent = env.last_code(555).unwrap();
    assert!(resent == first.code || resent == second.code);
}

#[tokio::test]
async fn test_sqlite_session_is_single_use() {
    let env = TestEnvironment::sqlite().unwrap();
    let attempt = env.start("+14155550000").await;
    env.open_link(42, &attempt.id).await;

    assert!(env.store.get_session(ChannelId(42)).await.unwrap().is_some());
    env.share_own(42, "+19995550000").await;
    assert!(env.store.get_session(ChannelId(42)).await.unwrap().is_none());

    let stored = env.manager.get_attempt(&attempt.id).await.unwrap();
    assert_eq!(stored.status, AttemptStatus::PhoneMismatch);
    assert_eq!(stored.mismatch_count, 1);
    assert_eq!(stored.channel_asserted_phone_number.as_deref(), Some("+19995550000"));
    assert_eq!(stored.channel_identity, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_wrong_guesses() {
    let env = Arc::new(TestEnvironment::sqlite().unwrap());
    let attempt = env.start("+14155550000").await;
    env.open_link(42, &attempt.id).await;
    env.share_own(42, "+14155550000").await;
    let wrong = TestEnvironment::wrong_code(&attempt.code);

    let mut handles = Vec::new();
    for _ in 0..3 {
        let env = env.clone();
        let id = attempt.id.clone();
        let wrong = wrong.clone();
        handles.push(tokio::spawn(async move { env.redeem(&id, &wrong).await }));
    }
    let mut remaining = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            RedeemOutcome::InvalidCode { guesses_remaining } => remaining.push(guesses_remaining),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    remaining.sort_unstable();

    assert_eq!(remaining, vec![0, 1, 2]);
    assert_eq!(env.status(&attempt.id).await, AttemptStatus::FailedGuesses);
}
