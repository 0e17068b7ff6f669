use thiserror::Error;

use crate::core::validation::ValidationError;
use crate::storage::StoreError;
use crate::verification::model::AttemptStatus;

/// Outcome taxonomy of the verification layer.
///
/// Only `UpstreamUnavailable` is an infrastructure fault; everything else is
/// a business outcome the caller maps to a user-facing answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// Malformed phone number or code, attributed to the input field
    #[error("Invalid {field}: {message}")]
    InvalidInput { field: &'static str, message: String },

    /// Unknown attempt id
    #[error("Verification attempt not found")]
    NotFound,

    /// Deadline passed
    #[error("Verification attempt expired")]
    Expired,

    /// Attempt already finished; callers treat this as idempotent
    #[error("Verification attempt already {0}")]
    AlreadyTerminal(AttemptStatus),

    /// No guesses left
    #[error("Guess budget exhausted")]
    GuessBudgetExhausted,

    /// A different channel identity is already bound to the attempt
    #[error("Attempt is bound to another channel identity")]
    IdentityConflict,

    /// A mutation tried to leave the state machine
    #[error("Invalid transition {from} -> {to}")]
    InvalidTransition { from: AttemptStatus, to: AttemptStatus },

    /// Store or transport still failing after retries
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl From<ValidationError> for VerifyError {
    fn from(err: ValidationError) -> Self {
        VerifyError::InvalidInput {
            field: err.field,
            message: err.message,
        }
    }
}

impl From<StoreError> for VerifyError {
    fn from(err: StoreError) -> Self {
        VerifyError::UpstreamUnavailable(err.to_string())
    }
}

impl VerifyError {
    /// True for faults the HTTP layer reports as 5xx.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, VerifyError::UpstreamUnavailable(_))
    }
}

pub type VerifyResult<T> = Result<T, VerifyError>;
