//! Verification attempt and channel-link session records.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque attempt identifier, also the token embedded in the bot deep link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(String);

impl AttemptId {
    /// Mints a fresh random id (UUID v4).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AttemptId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AttemptId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-specific identity of the conversation (Telegram chat id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an attempt.
///
/// ```text
/// pending ──match──▶ code_sent ──correct code──▶ verified
///    │                   │  ▲
///    │ mismatch          │  └─ wrong code, guesses left
///    ▼                   └────── last wrong code ──▶ failed_guesses
/// phone_mismatch ──match──▶ code_sent
///    └── mismatch limit ──▶ failed_guesses
/// any non-terminal ──deadline passed──▶ expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    PhoneMismatch,
    CodeSent,
    Verified,
    Expired,
    FailedGuesses,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::PhoneMismatch => "phone_mismatch",
            AttemptStatus::CodeSent => "code_sent",
            AttemptStatus::Verified => "verified",
            AttemptStatus::Expired => "expired",
            AttemptStatus::FailedGuesses => "failed_guesses",
        }
    }

    /// Terminal states accept no further writes.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptStatus::Verified | AttemptStatus::Expired | AttemptStatus::FailedGuesses
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    ///
    /// Staying in the same non-terminal state is allowed (field-only updates,
    /// the wrong-guess self-loop, repeated mismatches).
    pub fn can_transition_to(self, next: AttemptStatus) -> bool {
        use AttemptStatus::*;

        if self.is_terminal() {
            return false;
        }
        if self == next || next == Expired {
            return true;
        }
        matches!(
            (self, next),
            (Pending, CodeSent)
                | (Pending, PhoneMismatch)
                | (PhoneMismatch, CodeSent)
                | (PhoneMismatch, FailedGuesses)
                | (CodeSent, Verified)
                | (CodeSent, FailedGuesses)
        )
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "phone_mismatch" => Ok(AttemptStatus::PhoneMismatch),
            "code_sent" => Ok(AttemptStatus::CodeSent),
            "verified" => Ok(AttemptStatus::Verified),
            "expired" => Ok(AttemptStatus::Expired),
            "failed_guesses" => Ok(AttemptStatus::FailedGuesses),
            other => Err(format!("unknown attempt status: {}", other)),
        }
    }
}

/// One verification attempt: the unit of the state machine.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationAttempt {
    pub id: AttemptId,
    /// Relying party that requested the verification
    pub client_id: String,
    /// E.164 number typed on the originating site; immutable
    pub submitted_phone_number: String,
    /// One-time code minted at creation; never regenerated
    pub code: String,
    pub expires_at: DateTime<Utc>,
    /// Starts at the policy budget, only ever decremented
    pub guesses_remaining: i64,
    /// Chat that proved control of the number; never rebound once set
    pub channel_identity: Option<ChannelId>,
    /// Last number asserted by the channel, kept on mismatch for audit
    pub channel_asserted_phone_number: Option<String>,
    pub status: AttemptStatus,
    /// Contact shares that did not match the submitted number
    pub mismatch_count: i64,
    /// Bumped by every successful conditional write
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationAttempt {
    /// Builds a fresh `pending` attempt.
    pub fn new(
        client_id: impl Into<String>,
        submitted_phone_number: impl Into<String>,
        code: impl Into<String>,
        ttl: ChronoDuration,
        guesses: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: AttemptId::generate(),
            client_id: client_id.into(),
            submitted_phone_number: submitted_phone_number.into(),
            code: code.into(),
            expires_at: now + ttl,
            guesses_remaining: guesses,
            channel_identity: None,
            channel_asserted_phone_number: None,
            status: AttemptStatus::Pending,
            mismatch_count: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once `now` is strictly past the deadline.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// True if `channel` is the identity bound to this attempt.
    pub fn is_bound_to(&self, channel: ChannelId) -> bool {
        self.channel_identity == Some(channel)
    }
}

// Hand-written so the one-time code never ends up in a log line.
impl fmt::Debug for VerificationAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationAttempt")
            .field("id", &self.id)
            .field("client_id", &self.client_id)
            .field("status", &self.status)
            .field("expires_at", &self.expires_at)
            .field("guesses_remaining", &self.guesses_remaining)
            .field("channel_identity", &self.channel_identity)
            .field("mismatch_count", &self.mismatch_count)
            .field("version", &self.version)
            .field("code", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Bridges "please share your contact" to the contact message that follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLinkSession {
    pub channel_identity: ChannelId,
    pub attempt_id: AttemptId,
    pub created_at: DateTime<Utc>,
}

impl ChannelLinkSession {
    pub fn new(channel_identity: ChannelId, attempt_id: AttemptId) -> Self {
        Self {
            channel_identity,
            attempt_id,
            created_at: Utc::now(),
        }
    }

    /// Sessions older than `ttl` are treated as if they were never opened.
    pub fn is_stale_at(&self, now: DateTime<Utc>, ttl: ChronoDuration) -> bool {
        now - self.created_at > ttl
    }
}
