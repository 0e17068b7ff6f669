//! Process-local stores on `DashMap`.
//!
//! Same contract as the SQLite stores, including the versioned conditional
//! update; the compare and the write happen under the shard lock of the
//! entry. Used by the test suites and by `run --ephemeral`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::storage::{AttemptStore, StoreError, StoreResult};
use crate::verification::clients::{ClientApplication, ClientRegistry};
use crate::verification::model::{AttemptId, AttemptStatus, ChannelId, ChannelLinkSession, VerificationAttempt};

#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    attempts: DashMap<AttemptId, VerificationAttempt>,
    sessions: DashMap<ChannelId, ChannelLinkSession>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn insert_attempt(&self, attempt: &VerificationAttempt) -> StoreResult<()> {
        match self.attempts.entry(attempt.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(attempt.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(attempt.clone());
                Ok(())
            }
        }
    }

    async fn get_attempt(&self, id: &AttemptId) -> StoreResult<Option<VerificationAttempt>> {
        Ok(self.attempts.get(id).map(|entry| entry.value().clone()))
    }

    async fn update_attempt(&self, attempt: &VerificationAttempt, expected_version: u64) -> StoreResult<bool> {
        match self.attempts.get_mut(&attempt.id) {
            Some(mut stored) if stored.version == expected_version => {
                *stored = attempt.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_bound_attempt(
        &self,
        phone: &str,
        channel: ChannelId,
        exclude: &AttemptId,
    ) -> StoreResult<Option<VerificationAttempt>> {
        Ok(self
            .attempts
            .iter()
            .filter(|entry| {
                let attempt = entry.value();
                attempt.id != *exclude && attempt.submitted_phone_number == phone && attempt.is_bound_to(channel)
            })
            .max_by_key(|entry| entry.value().updated_at)
            .map(|entry| entry.value().clone()))
    }

    async fn find_live_code_sent(
        &self,
        channel: ChannelId,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<VerificationAttempt>> {
        Ok(self
            .attempts
            .iter()
            .filter(|entry| {
                let attempt = entry.value();
                attempt.status == AttemptStatus::CodeSent && attempt.is_bound_to(channel) && !attempt.is_expired_at(now)
            })
            .max_by_key(|entry| entry.value().updated_at)
            .map(|entry| entry.value().clone()))
    }

    async fn put_session(&self, session: &ChannelLinkSession) -> StoreResult<()> {
        self.sessions.insert(session.channel_identity, session.clone());
        Ok(())
    }

    async fn get_session(&self, channel: ChannelId) -> StoreResult<Option<ChannelLinkSession>> {
        Ok(self.sessions.get(&channel).map(|entry| entry.value().clone()))
    }

    async fn delete_session(&self, channel: ChannelId, attempt_id: &AttemptId) -> StoreResult<()> {
        self.sessions
            .remove_if(&channel, |_, session| session.attempt_id == *attempt_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryClientRegistry {
    clients: DashMap<String, ClientApplication>,
}

impl InMemoryClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(self, client: ClientApplication) -> Self {
        self.clients.insert(client.client_id.clone(), client);
        self
    }
}

#[async_trait]
impl ClientRegistry for InMemoryClientRegistry {
    async fn find_client(&self, client_id: &str) -> StoreResult<Option<ClientApplication>> {
        Ok(self.clients.get(client_id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_conditional_update_rejects_stale_version() {
        let store = InMemoryAttemptStore::new();
        let attempt = VerificationAttempt::new("acme", "+14155550000", "123456", ChronoDuration::minutes(5), 3);
        store.insert_attempt(&attempt).await.unwrap();
        assert!(matches!(
            store.insert_attempt(&attempt).await,
            Err(StoreError::Duplicate(_))
        ));

        let mut next = attempt.clone();
        next.version = 1;
        assert!(store.update_attempt(&next, 0).await.unwrap());
        assert!(!store.update_attempt(&next, 0).await.unwrap());
        assert_eq!(store.get_attempt(&attempt.id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_delete_session_checks_attempt() {
        let store = InMemoryAttemptStore::new();
        let first = AttemptId::generate();
        let second = AttemptId::generate();
        store
            .put_session(&ChannelLinkSession::new(ChannelId(42), first.clone()))
            .await
            .unwrap();
        store
            .put_session(&ChannelLinkSession::new(ChannelId(42), second.clone()))
            .await
            .unwrap();

        store.delete_session(ChannelId(42), &first).await.unwrap();
        assert_eq!(
            store.get_session(ChannelId(42)).await.unwrap().map(|s| s.attempt_id),
            Some(second.clone())
        );
        store.delete_session(ChannelId(42), &second).await.unwrap();
        assert!(store.get_session(ChannelId(42)).await.unwrap().is_none());
    }
}
