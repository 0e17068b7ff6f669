//! Attempt lifecycle: creation, reads and guarded transitions.
//!
//! Every change to an existing attempt goes through
//! [`AttemptManager::transition`], which re-reads the row, applies the
//! caller's mutation and writes it back with a version check. On a lost race
//! the mutation is re-evaluated against the fresh row, so two concurrent
//! wrong guesses cannot both decrement from the same stale read.

use chrono::{Duration as ChronoDuration, SubsecRound, Utc};
use std::sync::Arc;

use crate::core::config;
use crate::core::logging::{mask_phone, short_id};
use crate::core::metrics;
use crate::core::validation::validate_phone_number;
use crate::storage::{with_retry, AttemptStore};
use crate::verification::code::generate_code;
use crate::verification::error::{VerifyError, VerifyResult};
use crate::verification::model::{AttemptId, AttemptStatus, VerificationAttempt};

/// Tunables of the verification flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationPolicy {
    pub code_ttl: ChronoDuration,
    pub max_guesses: i64,
    pub max_phone_mismatches: i64,
    pub link_session_ttl: ChronoDuration,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            code_ttl: config::verification::code_ttl(),
            max_guesses: config::verification::MAX_GUESSES,
            max_phone_mismatches: config::verification::MAX_PHONE_MISMATCHES,
            link_session_ttl: config::verification::link_session_ttl(),
        }
    }
}

/// What a call to [`AttemptManager::transition`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// The mutation was written
    Applied,
    /// The mutation left the attempt as it was; nothing written
    Unchanged,
    /// The attempt was already terminal; nothing written
    AlreadyTerminal,
    /// The deadline had passed; the attempt was moved to `expired` instead
    Expired,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub attempt: VerificationAttempt,
    pub kind: TransitionKind,
}

impl Transition {
    pub fn applied(&self) -> bool {
        self.kind == TransitionKind::Applied
    }
}

/// Owns the attempt state machine on top of an [`AttemptStore`].
#[derive(Clone)]
pub struct AttemptManager {
    store: Arc<dyn AttemptStore>,
    policy: VerificationPolicy,
}

impl AttemptManager {
    pub fn new(store: Arc<dyn AttemptStore>, policy: VerificationPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn AttemptStore> {
        &self.store
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    /// Creates a `pending` attempt. The only place a code is minted.
    pub async fn start_attempt(&self, client_id: &str, submitted_phone_number: &str) -> VerifyResult<VerificationAttempt> {
        let client_id = client_id.trim();
        if client_id.is_empty() {
            return Err(VerifyError::InvalidInput {
                field: "clientId",
                message: "Client identifier is required.".to_string(),
            });
        }
        validate_phone_number(submitted_phone_number)?;

        let attempt = VerificationAttempt::new(
            client_id,
            submitted_phone_number,
            generate_code(),
            self.policy.code_ttl,
            self.policy.max_guesses,
        );
        with_retry(|| self.store.insert_attempt(&attempt)).await?;

        metrics::ATTEMPTS_STARTED_TOTAL.inc();
        log::info!(
            "Started attempt {} for client {} phone {} (expires {})",
            short_id(attempt.id.as_str()),
            attempt.client_id,
            mask_phone(&attempt.submitted_phone_number),
            attempt.expires_at
        );
        Ok(attempt)
    }

    pub async fn get_attempt(&self, id: &AttemptId) -> VerifyResult<VerificationAttempt> {
        with_retry(|| self.store.get_attempt(id))
            .await?
            .ok_or(VerifyError::NotFound)
    }

    /// Reads an attempt, moving it to `expired` first if its deadline passed.
    pub async fn refresh(&self, id: &AttemptId) -> VerifyResult<VerificationAttempt> {
        Ok(self.transition(id, |_| Ok(())).await?.attempt)
    }

    /// Applies `mutate` as a conditional read-modify-write.
    ///
    /// - terminal attempts are returned untouched (`AlreadyTerminal`), so
    ///   redelivered events are harmless;
    /// - attempts past their deadline are expired instead of mutated;
    /// - a bound channel identity can never be replaced (`IdentityConflict`);
    /// - the status change must be an edge of the state machine.
    ///
    /// `mutate` may run several times and must only depend on the attempt it
    /// is given. An `Err` from it aborts without writing.
    pub async fn transition<F>(&self, id: &AttemptId, mut mutate: F) -> VerifyResult<Transition>
    where
        F: FnMut(&mut VerificationAttempt) -> VerifyResult<()>,
    {
        for _ in 0..config::retry::MAX_CAS_ATTEMPTS {
            let current = self.get_attempt(id).await?;

            if current.status.is_terminal() {
                return Ok(Transition {
                    attempt: current,
                    kind: TransitionKind::AlreadyTerminal,
                });
            }

            // Millisecond precision, as persisted, so a committed row compares equal to `next`
            let now = Utc::now().trunc_subsecs(3);
            let (next, kind) = if current.is_expired_at(now) {
                let mut next = current.clone();
                next.status = AttemptStatus::Expired;
                (next, TransitionKind::Expired)
            } else {
                let mut next = current.clone();
                mutate(&mut next)?;
                check_transition(&current, &next)?;
                if next == current {
                    return Ok(Transition {
                        attempt: current,
                        kind: TransitionKind::Unchanged,
                    });
                }
                (next, TransitionKind::Applied)
            };

            let mut next = next;
            next.version = current.version + 1;
            next.updated_at = now;

            if self.write(&next, current.version).await? {
                if current.status != next.status {
                    log::info!(
                        "Attempt {}: {} -> {}",
                        short_id(id.as_str()),
                        current.status,
                        next.status
                    );
                }
                return Ok(Transition { attempt: next, kind });
            }

            metrics::VERSION_CONFLICTS_TOTAL.inc();
            log::debug!("Version conflict on attempt {}, re-reading", short_id(id.as_str()));
        }

        log::error!(
            "Attempt {} still contended after {} writes",
            short_id(id.as_str()),
            config::retry::MAX_CAS_ATTEMPTS
        );
        Err(VerifyError::UpstreamUnavailable(
            "attempt is being updated concurrently".to_string(),
        ))
    }

    /// Conditional write under the store retry budget.
    ///
    /// A try that timed out or failed may still have committed, in which case
    /// the retry sees a moved version. That `false` is checked against the
    /// stored row so one mutation is never applied twice.
    async fn write(&self, next: &VerificationAttempt, expected_version: u64) -> VerifyResult<bool> {
        let mut tries = 0u32;
        let written = with_retry(|| {
            tries += 1;
            self.store.update_attempt(next, expected_version)
        })
        .await?;
        if written || tries == 1 {
            return Ok(written);
        }

        let stored = self.get_attempt(&next.id).await?;
        if stored == *next {
            log::warn!(
                "Attempt {}: write v{} committed without acknowledgement",
                short_id(next.id.as_str()),
                next.version
            );
            return Ok(true);
        }
        Ok(false)
    }
}

fn check_transition(current: &VerificationAttempt, next: &VerificationAttempt) -> VerifyResult<()> {
    if let Some(bound) = current.channel_identity {
        if next.channel_identity != Some(bound) {
            return Err(VerifyError::IdentityConflict);
        }
    }
    let immutable_changed = next.id != current.id
        || next.client_id != current.client_id
        || next.submitted_phone_number != current.submitted_phone_number
        || next.code != current.code
        || next.created_at != current.created_at
        || next.expires_at != current.expires_at;
    if immutable_changed
        || next.guesses_remaining > current.guesses_remaining
        || next.mismatch_count < current.mismatch_count
        || !current.status.can_transition_to(next.status)
    {
        return Err(VerifyError::InvalidTransition {
            from: current.status,
            to: next.status,
        });
    }
    Ok(())
}
