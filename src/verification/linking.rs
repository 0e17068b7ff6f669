//! Channel-linking protocol: ties a Telegram chat to an attempt and proves
//! the chat controls the submitted phone number.
//!
//! Two inbound events drive it:
//! - **entry**: `/start VERIFY_<id>` opened from the deep link;
//! - **phone assertion**: the user shared their own contact card.
//!
//! All handlers are safe to re-run on redelivered updates: state only moves
//! through [`AttemptManager::transition`] and code delivery never mints a
//! new code.

use chrono::Utc;
use std::sync::Arc;

use crate::core::logging::{mask_phone, short_id};
use crate::core::metrics;
use crate::core::validation::{normalize_asserted_phone, parse_deep_link_payload};
use crate::storage::with_retry;
use crate::telegram::transport::ChannelTransport;
use crate::verification::error::{VerifyError, VerifyResult};
use crate::verification::lifecycle::{AttemptManager, TransitionKind};
use crate::verification::model::{AttemptId, AttemptStatus, ChannelId, ChannelLinkSession, VerificationAttempt};

/// What the protocol did with one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Missing or malformed entry payload; instructions sent
    Instructions,
    /// The attempt id does not exist
    UnknownAttempt,
    /// Contact-share prompt sent, session opened
    ContactRequested,
    /// Code sent to the chat
    CodeDelivered(Delivery),
    /// Asserted number differs; the user may share again
    PhoneMismatch { mismatches_left: i64 },
    /// Mismatch limit reached; attempt failed
    MismatchLimitReached,
    /// Attempt is bound to a different chat
    IdentityConflict,
    /// Contact shared without an open session and nothing to re-send
    NoSession,
    /// Contact card belongs to someone other than the sender
    ForeignContact,
    /// Attempt already finished or expired; status reported to the user
    Finished(AttemptStatus),
}

/// Why a code went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Fresh phone match
    Matched,
    /// The (phone, chat) pair proved itself on an earlier attempt
    FastPath,
    /// Same chat asked again for an attempt already in `code_sent`
    Resent,
}

/// Text of every reply the bot sends.
pub mod replies {
    use crate::core::logging::mask_phone;

    pub const WELCOME: &str = "Welcome to TeleVerify! To verify your phone number for a website, start the \
         process on that website. You will get a link that brings you back here to receive your code.";
    pub const INCOMPLETE_LINK: &str =
        "It looks like the verification link was incomplete. Please use the complete link from the website.";
    pub const UNKNOWN_ATTEMPT: &str =
        "This verification link is invalid or has expired. Please start over from the website.";
    pub const EXPIRED: &str = "This verification request has expired. Please request a new one from the website.";
    pub const FAILED: &str =
        "This verification request can no longer be completed. Please start over from the website.";
    pub const SHARE_CONTACT: &str = "Please share your contact to continue with the verification. \
         Use the button below, typing the number is not accepted.";
    pub const FOREIGN_CONTACT: &str =
        "Please share your own contact using the button, not someone else's contact card.";
    pub const NO_SESSION: &str = "Your contact-sharing session was not found or has timed out. \
         Please open the verification link from the website again.";
    pub const NOT_COMPLETED: &str =
        "Sorry, this verification could not be completed from this account. Please start over from the website.";
    pub const MISMATCH_LIMIT: &str = "The shared number did not match too many times. \
         This verification request has been closed, please start over from the website.";
    pub const TRY_AGAIN: &str = "Sorry, something went wrong on our side. Please try again in a moment.";

    pub fn code(phone: &str, code: &str) -> String {
        format!(
            "Your verification code for {} is: {}\n\nPlease enter this code on the website.",
            phone, code
        )
    }

    pub fn already_verified(phone: &str) -> String {
        format!("The verification for {} is already complete.", phone)
    }

    pub fn mismatch(asserted: &str, submitted: &str, mismatches_left: i64) -> String {
        format!(
            "The phone number you shared ({}) does not match the number entered on the website ({}). \
             Make sure you are using the right Telegram account; you can share a contact {} more time(s).",
            asserted,
            mask_phone(submitted),
            mismatches_left
        )
    }
}

/// Bot-side half of the verification flow.
#[derive(Clone)]
pub struct ChannelLinker {
    manager: AttemptManager,
    transport: Arc<dyn ChannelTransport>,
}

impl ChannelLinker {
    pub fn new(manager: AttemptManager, transport: Arc<dyn ChannelTransport>) -> Self {
        Self { manager, transport }
    }

    pub async fn send_welcome(&self, channel: ChannelId) {
        self.reply(channel, replies::WELCOME).await;
    }

    /// Entry event: `/start` carrying `payload`.
    pub async fn handle_entry(&self, channel: ChannelId, payload: &str) -> VerifyResult<LinkOutcome> {
        let Some(token) = parse_deep_link_payload(payload) else {
            log::info!("Chat {} opened the bot with an unusable payload", channel);
            self.reply(channel, replies::INCOMPLETE_LINK).await;
            return Ok(LinkOutcome::Instructions);
        };
        let id = AttemptId::from(token);

        let result = self.enter(channel, &id).await;
        self.finish(channel, &id, result).await
    }

    /// Phone-assertion event: a contact card shared in `channel`.
    ///
    /// `sender` is the Telegram user that sent the message and
    /// `contact_user_id` the user the card belongs to, if Telegram knows it.
    pub async fn handle_phone_assertion(
        &self,
        channel: ChannelId,
        sender: i64,
        contact_user_id: Option<i64>,
        phone: &str,
    ) -> VerifyResult<LinkOutcome> {
        if contact_user_id != Some(sender) {
            metrics::FOREIGN_CONTACTS_TOTAL.inc();
            log::warn!("Chat {} shared a contact that is not the sender's own", channel);
            self.reply(channel, replies::FOREIGN_CONTACT).await;
            return Ok(LinkOutcome::ForeignContact);
        }

        let store = self.manager.store();
        let session = match with_retry(|| store.get_session(channel)).await {
            Ok(session) => session,
            Err(e) => return self.finish(channel, &AttemptId::from(""), Err(e.into())).await,
        };
        let ttl = self.manager.policy().link_session_ttl;
        let session = match session {
            Some(session) if session.is_stale_at(Utc::now(), ttl) => {
                log::info!("Dropping stale link session of chat {}", channel);
                self.delete_session(&session).await;
                None
            }
            other => other,
        };

        let Some(session) = session else {
            return self.redeliver_or_restart(channel).await;
        };

        let id = session.attempt_id.clone();
        let result = self.assert_phone(channel, &id, phone).await;
        // Single-use, whatever happened above
        self.delete_session(&session).await;
        self.finish(channel, &id, result).await
    }

    async fn enter(&self, channel: ChannelId, id: &AttemptId) -> VerifyResult<LinkOutcome> {
        let attempt = self.manager.refresh(id).await?;

        match attempt.status {
            AttemptStatus::Verified | AttemptStatus::Expired | AttemptStatus::FailedGuesses => {
                Ok(self.report_finished(channel, &attempt).await)
            }
            AttemptStatus::CodeSent => {
                if attempt.is_bound_to(channel) {
                    self.deliver(channel, &attempt).await;
                    Ok(LinkOutcome::CodeDelivered(Delivery::Resent))
                } else {
                    Err(VerifyError::IdentityConflict)
                }
            }
            AttemptStatus::Pending | AttemptStatus::PhoneMismatch => {
                let store = self.manager.store();
                let proven = with_retry(|| store.find_bound_attempt(&attempt.submitted_phone_number, channel, id)).await?;
                match proven {
                    Some(prior) => self.fast_path(channel, id, &prior).await,
                    None => self.open_session(channel, id).await,
                }
            }
        }
    }

    async fn fast_path(&self, channel: ChannelId, id: &AttemptId, prior: &VerificationAttempt) -> VerifyResult<LinkOutcome> {
        log::info!(
            "Chat {} already proved {} on attempt {}, skipping contact share for {}",
            channel,
            mask_phone(&prior.submitted_phone_number),
            short_id(prior.id.as_str()),
            short_id(id.as_str())
        );

        let asserted = prior.channel_asserted_phone_number.clone();
        let transition = self
            .manager
            .transition(id, |attempt| {
                reject_other_channel(attempt, channel)?;
                if attempt.status != AttemptStatus::CodeSent {
                    attempt.channel_identity = Some(channel);
                    attempt.channel_asserted_phone_number = asserted
                        .clone()
                        .or_else(|| Some(attempt.submitted_phone_number.clone()));
                    attempt.status = AttemptStatus::CodeSent;
                }
                Ok(())
            })
            .await?;

        match transition.kind {
            TransitionKind::Applied | TransitionKind::Unchanged => {
                if transition.applied() {
                    metrics::PHONE_CHECKS_TOTAL.with_label_values(&["fast_path"]).inc();
                }
                self.deliver(channel, &transition.attempt).await;
                Ok(LinkOutcome::CodeDelivered(Delivery::FastPath))
            }
            TransitionKind::AlreadyTerminal | TransitionKind::Expired => {
                Ok(self.report_finished(channel, &transition.attempt).await)
            }
        }
    }

    async fn open_session(&self, channel: ChannelId, id: &AttemptId) -> VerifyResult<LinkOutcome> {
        let session = ChannelLinkSession::new(channel, id.clone());
        let store = self.manager.store();
        with_retry(|| store.put_session(&session)).await?;

        log::info!("Requested contact from chat {} for attempt {}", channel, short_id(id.as_str()));
        if let Err(e) = self.transport.request_contact(channel, replies::SHARE_CONTACT).await {
            log::warn!("Contact prompt to chat {} not delivered: {}", channel, e);
        }
        Ok(LinkOutcome::ContactRequested)
    }

    async fn assert_phone(&self, channel: ChannelId, id: &AttemptId, phone: &str) -> VerifyResult<LinkOutcome> {
        let asserted = normalize_asserted_phone(phone);
        let max_mismatches = self.manager.policy().max_phone_mismatches;

        let transition = self
            .manager
            .transition(id, |attempt| {
                reject_other_channel(attempt, channel)?;
                if attempt.status == AttemptStatus::CodeSent {
                    // Same chat already matched: treat like the fast path
                    return Ok(());
                }
                attempt.channel_asserted_phone_number = Some(asserted.clone());
                if asserted == attempt.submitted_phone_number {
                    attempt.channel_identity = Some(channel);
                    attempt.status = AttemptStatus::CodeSent;
                } else {
                    attempt.mismatch_count += 1;
                    attempt.status = if attempt.mismatch_count >= max_mismatches {
                        AttemptStatus::FailedGuesses
                    } else {
                        AttemptStatus::PhoneMismatch
                    };
                }
                Ok(())
            })
            .await?;

        let attempt = &transition.attempt;
        match transition.kind {
            TransitionKind::AlreadyTerminal | TransitionKind::Expired => return Ok(self.report_finished(channel, attempt).await),
            TransitionKind::Unchanged => {
                self.deliver(channel, attempt).await;
                return Ok(LinkOutcome::CodeDelivered(Delivery::Resent));
            }
            TransitionKind::Applied => {}
        }

        match attempt.status {
            AttemptStatus::CodeSent => {
                metrics::PHONE_CHECKS_TOTAL.with_label_values(&["match"]).inc();
                log::info!(
                    "Chat {} matched {} on attempt {}",
                    channel,
                    mask_phone(&asserted),
                    short_id(id.as_str())
                );
                self.deliver(channel, attempt).await;
                Ok(LinkOutcome::CodeDelivered(Delivery::Matched))
            }
            AttemptStatus::FailedGuesses => {
                metrics::PHONE_CHECKS_TOTAL.with_label_values(&["mismatch"]).inc();
                log::warn!(
                    "Attempt {} closed after {} phone mismatches (last from chat {})",
                    short_id(id.as_str()),
                    attempt.mismatch_count,
                    channel
                );
                self.reply(channel, replies::MISMATCH_LIMIT).await;
                Ok(LinkOutcome::MismatchLimitReached)
            }
            _ => {
                metrics::PHONE_CHECKS_TOTAL.with_label_values(&["mismatch"]).inc();
                let mismatches_left = (max_mismatches - attempt.mismatch_count).max(0);
                log::info!(
                    "Chat {} asserted {} for attempt {}: mismatch {}/{}",
                    channel,
                    mask_phone(&asserted),
                    short_id(id.as_str()),
                    attempt.mismatch_count,
                    max_mismatches
                );
                self.reply(
                    channel,
                    &replies::mismatch(&asserted, &attempt.submitted_phone_number, mismatches_left),
                )
                .await;
                Ok(LinkOutcome::PhoneMismatch { mismatches_left })
            }
        }
    }

    /// Contact without a session: a redelivery after the session was used
    /// up, or a chat that never opened the link.
    async fn redeliver_or_restart(&self, channel: ChannelId) -> VerifyResult<LinkOutcome> {
        let store = self.manager.store();
        let now = Utc::now();
        match with_retry(|| store.find_live_code_sent(channel, now)).await {
            Ok(Some(attempt)) => {
                log::info!(
                    "Re-sending code of attempt {} to chat {} (no open session)",
                    short_id(attempt.id.as_str()),
                    channel
                );
                self.deliver(channel, &attempt).await;
                Ok(LinkOutcome::CodeDelivered(Delivery::Resent))
            }
            Ok(None) => {
                self.reply(channel, replies::NO_SESSION).await;
                Ok(LinkOutcome::NoSession)
            }
            Err(e) => self.finish(channel, &AttemptId::from(""), Err(e.into())).await,
        }
    }

    /// Maps protocol errors to user replies. Only infrastructure faults stay errors.
    async fn finish(&self, channel: ChannelId, id: &AttemptId, result: VerifyResult<LinkOutcome>) -> VerifyResult<LinkOutcome> {
        match result {
            Ok(outcome) => Ok(outcome),
            Err(VerifyError::NotFound) => {
                log::info!("Chat {} referenced unknown attempt {}", channel, short_id(id.as_str()));
                self.reply(channel, replies::UNKNOWN_ATTEMPT).await;
                Ok(LinkOutcome::UnknownAttempt)
            }
            Err(VerifyError::IdentityConflict) => {
                metrics::IDENTITY_CONFLICTS_TOTAL.inc();
                log::warn!(
                    "identity conflict: chat {} tried to act on attempt {} bound to another chat",
                    channel,
                    short_id(id.as_str())
                );
                self.reply(channel, replies::NOT_COMPLETED).await;
                Ok(LinkOutcome::IdentityConflict)
            }
            Err(e) => {
                log::error!("Linking failed for chat {} attempt {}: {}", channel, short_id(id.as_str()), e);
                self.reply(channel, replies::TRY_AGAIN).await;
                Err(e)
            }
        }
    }

    async fn report_finished(&self, channel: ChannelId, attempt: &VerificationAttempt) -> LinkOutcome {
        let text = match attempt.status {
            AttemptStatus::Verified if attempt.is_bound_to(channel) => {
                replies::already_verified(&attempt.submitted_phone_number)
            }
            AttemptStatus::Verified => replies::UNKNOWN_ATTEMPT.to_string(),
            AttemptStatus::Expired => replies::EXPIRED.to_string(),
            _ => replies::FAILED.to_string(),
        };
        self.reply(channel, &text).await;
        LinkOutcome::Finished(attempt.status)
    }

    async fn deliver(&self, channel: ChannelId, attempt: &VerificationAttempt) {
        let text = replies::code(&attempt.submitted_phone_number, &attempt.code);
        if let Err(e) = self.transport.deliver_code(channel, &text).await {
            // The chat can fetch it again by reopening the link
            log::warn!(
                "Code for attempt {} not delivered to chat {}: {}",
                short_id(attempt.id.as_str()),
                channel,
                e
            );
        }
    }

    async fn reply(&self, channel: ChannelId, text: &str) {
        if let Err(e) = self.transport.send_text(channel, text).await {
            log::warn!("Reply to chat {} not delivered: {}", channel, e);
        }
    }

    async fn delete_session(&self, session: &ChannelLinkSession) {
        let store = self.manager.store();
        let channel = session.channel_identity;
        if let Err(e) = with_retry(|| store.delete_session(channel, &session.attempt_id)).await {
            log::error!("Failed to delete link session of chat {}: {}", channel, e);
        }
    }
}

fn reject_other_channel(attempt: &VerificationAttempt, channel: ChannelId) -> VerifyResult<()> {
    match attempt.channel_identity {
        Some(bound) if bound != channel => Err(VerifyError::IdentityConflict),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validation::deep_link_payload;
    use crate::storage::InMemoryAttemptStore;
    use crate::testing::{Outbound, RecordingTransport};
    use crate::verification::lifecycle::VerificationPolicy;
    use pretty_assertions::assert_eq;

    struct Fixture {
        manager: AttemptManager,
        transport: Arc<RecordingTransport>,
        linker: ChannelLinker,
    }

    fn fixture() -> Fixture {
        let manager = AttemptManager::new(Arc::new(InMemoryAttemptStore::new()), VerificationPolicy::default());
        let transport = Arc::new(RecordingTransport::new());
        let linker = ChannelLinker::new(manager.clone(), transport.clone());
        Fixture {
            manager,
            transport,
            linker,
        }
    }

    async fn share(linker: &ChannelLinker, chat: i64, phone: &str) -> LinkOutcome {
        linker
            .handle_phone_assertion(ChannelId(chat), chat, Some(chat), phone)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_entry_without_usable_payload_sends_instructions() {
        let f = fixture();
        let outcome = f.linker.handle_entry(ChannelId(42), "hello").await.unwrap();
        assert_eq!(outcome, LinkOutcome::Instructions);
        assert_eq!(f.transport.texts_to(ChannelId(42)), vec![replies::INCOMPLETE_LINK.to_string()]);
    }

    #[tokio::test]
    async fn test_entry_for_unknown_attempt() {
        let f = fixture();
        let outcome = f
            .linker
            .handle_entry(ChannelId(42), &deep_link_payload("0f8fad5b-d9cb-469f-a165-70867728950e"))
            .await
            .unwrap();
        assert_eq!(outcome, LinkOutcome::UnknownAttempt);
        assert!(f.manager.store().get_session(ChannelId(42)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_then_matching_contact_delivers_code() {
        let f = fixture();
        let attempt = f.manager.start_attempt("acme", "+251911223344").await.unwrap();

        let outcome = f
            .linker
            .handle_entry(ChannelId(42), &deep_link_payload(attempt.id.as_str()))
            .await
            .unwrap();
        assert_eq!(outcome, LinkOutcome::ContactRequested);
        assert_eq!(f.manager.get_attempt(&attempt.id).await.unwrap().status, AttemptStatus::Pending);
        assert!(matches!(f.transport.last_to(ChannelId(42)), Some(Outbound::ContactRequest(_))));

        // Telegram reports the number without the leading +
        let outcome = share(&f.linker, 42, "251911223344").await;
        assert_eq!(outcome, LinkOutcome::CodeDelivered(Delivery::Matched));

        let stored = f.manager.get_attempt(&attempt.id).await.unwrap();
        assert_eq!(stored.status, AttemptStatus::CodeSent);
        assert_eq!(stored.channel_identity, Some(ChannelId(42)));
        assert_eq!(stored.channel_asserted_phone_number.as_deref(), Some("+251911223344"));
        assert_eq!(f.transport.codes_to(ChannelId(42)), 1);
        assert!(f.transport.last_text_to(ChannelId(42)).unwrap().contains(&attempt.code));
        assert!(f.manager.store().get_session(ChannelId(42)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mismatch_is_recorded_and_bounded() {
        let f = fixture();
        let attempt = f.manager.start_attempt("acme", "+14155550000").await.unwrap();
        let payload = deep_link_payload(attempt.id.as_str());

        for left in [2, 1] {
            f.linker.handle_entry(ChannelId(7), &payload).await.unwrap();
            let outcome = share(&f.linker, 7, "+14155559999").await;
            assert_eq!(outcome, LinkOutcome::PhoneMismatch { mismatches_left: left });
        }
        let stored = f.manager.get_attempt(&attempt.id).await.unwrap();
        assert_eq!(stored.status, AttemptStatus::PhoneMismatch);
        assert_eq!(stored.channel_identity, None);
        assert_eq!(stored.channel_asserted_phone_number.as_deref(), Some("+14155559999"));
        assert!(!f.transport.all_text().iter().any(|t| t.contains(&attempt.code)));

        f.linker.handle_entry(ChannelId(7), &payload).await.unwrap();
        assert_eq!(share(&f.linker, 7, "+14155559999").await, LinkOutcome::MismatchLimitReached);
        assert_eq!(
            f.manager.get_attempt(&attempt.id).await.unwrap().status,
            AttemptStatus::FailedGuesses
        );
    }

    #[tokio::test]
    async fn test_mismatch_then_match_recovers() {
        let f = fixture();
        let attempt = f.manager.start_attempt("acme", "+14155550000").await.unwrap();
        let payload = deep_link_payload(attempt.id.as_str());

        f.linker.handle_entry(ChannelId(7), &payload).await.unwrap();
        share(&f.linker, 7, "+14155559999").await;
        f.linker.handle_entry(ChannelId(8), &payload).await.unwrap();
        assert_eq!(
            share(&f.linker, 8, "+14155550000").await,
            LinkOutcome::CodeDelivered(Delivery::Matched)
        );
        assert_eq!(
            f.manager.get_attempt(&attempt.id).await.unwrap().channel_identity,
            Some(ChannelId(8))
        );
    }

    #[tokio::test]
    async fn test_second_chat_cannot_claim_bound_attempt() {
        let f = fixture();
        let attempt = f.manager.start_attempt("acme", "+14155550000").await.unwrap();
        let payload = deep_link_payload(attempt.id.as_str());

        f.linker.handle_entry(ChannelId(111), &payload).await.unwrap();
        f.linker.handle_entry(ChannelId(222), &payload).await.unwrap();
        share(&f.linker, 111, "+14155550000").await;

        let outcome = share(&f.linker, 222, "+14155550000").await;
        assert_eq!(outcome, LinkOutcome::IdentityConflict);
        assert_eq!(
            f.transport.last_text_to(ChannelId(222)).as_deref(),
            Some(replies::NOT_COMPLETED)
        );

        let outcome = f.linker.handle_entry(ChannelId(222), &payload).await.unwrap();
        assert_eq!(outcome, LinkOutcome::IdentityConflict);

        let stored = f.manager.get_attempt(&attempt.id).await.unwrap();
        assert_eq!(stored.channel_identity, Some(ChannelId(111)));
        assert_eq!(f.transport.codes_to(ChannelId(222)), 0);
    }

    #[tokio::test]
    async fn test_fast_path_skips_contact_share() {
        let f = fixture();
        let first = f.manager.start_attempt("acme", "+14155550000").await.unwrap();
        f.linker
            .handle_entry(ChannelId(555), &deep_link_payload(first.id.as_str()))
            .await
            .unwrap();
        share(&f.linker, 555, "+14155550000").await;

        let second = f.manager.start_attempt("acme", "+14155550000").await.unwrap();
        let outcome = f
            .linker
            .handle_entry(ChannelId(555), &deep_link_payload(second.id.as_str()))
            .await
            .unwrap();
        assert_eq!(outcome, LinkOutcome::CodeDelivered(Delivery::FastPath));

        let stored = f.manager.get_attempt(&second.id).await.unwrap();
        assert_eq!(stored.status, AttemptStatus::CodeSent);
        assert_eq!(stored.channel_identity, Some(ChannelId(555)));
        assert!(f.manager.store().get_session(ChannelId(555)).await.unwrap().is_none());
        assert!(f.transport.last_text_to(ChannelId(555)).unwrap().contains(&second.code));
    }

    #[tokio::test]
    async fn test_fast_path_is_scoped_to_the_chat() {
        let f = fixture();
        let first = f.manager.start_attempt("acme", "+14155550000").await.unwrap();
        f.linker
            .handle_entry(ChannelId(555), &deep_link_payload(first.id.as_str()))
            .await
            .unwrap();
        share(&f.linker, 555, "+14155550000").await;

        let second = f.manager.start_attempt("acme", "+14155550000").await.unwrap();
        let outcome = f
            .linker
            .handle_entry(ChannelId(556), &deep_link_payload(second.id.as_str()))
            .await
            .unwrap();
        assert_eq!(outcome, LinkOutcome::ContactRequested);
    }

    #[tokio::test]
    async fn test_redelivered_events_resend_the_same_code() {
        let f = fixture();
        let attempt = f.manager.start_attempt("acme", "+14155550000").await.unwrap();
        let payload = deep_link_payload(attempt.id.as_str());

        f.linker.handle_entry(ChannelId(42), &payload).await.unwrap();
        share(&f.linker, 42, "+14155550000").await;

        // Redelivered contact: session is gone, code comes from the (chat) index
        assert_eq!(
            share(&f.linker, 42, "+14155550000").await,
            LinkOutcome::CodeDelivered(Delivery::Resent)
        );
        // Redelivered entry from the bound chat
        assert_eq!(
            f.linker.handle_entry(ChannelId(42), &payload).await.unwrap(),
            LinkOutcome::CodeDelivered(Delivery::Resent)
        );

        assert_eq!(f.transport.codes_to(ChannelId(42)), 3);
        let stored = f.manager.get_attempt(&attempt.id).await.unwrap();
        assert_eq!(stored.code, attempt.code);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_contact_without_session() {
        let f = fixture();
        assert_eq!(share(&f.linker, 42, "+14155550000").await, LinkOutcome::NoSession);
        assert_eq!(f.transport.last_text_to(ChannelId(42)).as_deref(), Some(replies::NO_SESSION));
    }

    #[tokio::test]
    async fn test_stale_session_is_treated_as_absent() {
        let manager = AttemptManager::new(
            Arc::new(InMemoryAttemptStore::new()),
            VerificationPolicy {
                link_session_ttl: chrono::Duration::seconds(-1),
                ..VerificationPolicy::default()
            },
        );
        let transport = Arc::new(RecordingTransport::new());
        let linker = ChannelLinker::new(manager.clone(), transport.clone());
        let attempt = manager.start_attempt("acme", "+14155550000").await.unwrap();

        linker
            .handle_entry(ChannelId(42), &deep_link_payload(attempt.id.as_str()))
            .await
            .unwrap();
        assert_eq!(share(&linker, 42, "+14155550000").await, LinkOutcome::NoSession);
        assert_eq!(manager.get_attempt(&attempt.id).await.unwrap().status, AttemptStatus::Pending);
    }

    #[tokio::test]
    async fn test_foreign_contact_card_is_rejected() {
        let f = fixture();
        let attempt = f.manager.start_attempt("acme", "+14155550000").await.unwrap();
        f.linker
            .handle_entry(ChannelId(42), &deep_link_payload(attempt.id.as_str()))
            .await
            .unwrap();

        let outcome = f
            .linker
            .handle_phone_assertion(ChannelId(42), 42, Some(99), "+14155550000")
            .await
            .unwrap();
        assert_eq!(outcome, LinkOutcome::ForeignContact);
        assert_eq!(f.manager.get_attempt(&attempt.id).await.unwrap().status, AttemptStatus::Pending);
        // The session survives so the user can share their own card
        assert!(f.manager.store().get_session(ChannelId(42)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_entry_on_expired_attempt() {
        let manager = AttemptManager::new(
            Arc::new(InMemoryAttemptStore::new()),
            VerificationPolicy {
                code_ttl: chrono::Duration::seconds(-1),
                ..VerificationPolicy::default()
            },
        );
        let transport = Arc::new(RecordingTransport::new());
        let linker = ChannelLinker::new(manager.clone(), transport.clone());
        let attempt = manager.start_attempt("acme", "+14155550000").await.unwrap();

        let outcome = linker
            .handle_entry(ChannelId(42), &deep_link_payload(attempt.id.as_str()))
            .await
            .unwrap();
        assert_eq!(outcome, LinkOutcome::Finished(AttemptStatus::Expired));
        assert_eq!(manager.get_attempt(&attempt.id).await.unwrap().status, AttemptStatus::Expired);
        assert_eq!(transport.last_text_to(ChannelId(42)).as_deref(), Some(replies::EXPIRED));
    }
}
