//! Site-side redemption of the one-time code.

use serde::Serialize;
use std::sync::Arc;

use crate::core::config;
use crate::core::logging::short_id;
use crate::core::metrics;
use crate::core::retry::{retry_with_timeout, RetryConfig};
use crate::verification::clients::ClientRegistry;
use crate::verification::error::{VerifyError, VerifyResult};
use crate::verification::lifecycle::{AttemptManager, TransitionKind};
use crate::verification::model::{AttemptId, AttemptStatus};

/// Result of one `redeem` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RedeemOutcome {
    /// Code accepted (now or on an earlier call)
    #[serde(rename_all = "camelCase")]
    Verified { redirect_url: Option<String> },
    Expired,
    /// Wrong code; the attempt closes when this reaches 0
    #[serde(rename_all = "camelCase")]
    InvalidCode { guesses_remaining: i64 },
    FailedGuesses,
    /// Code not delivered yet; `status` says why (`pending` or `phone_mismatch`)
    NotReady { status: AttemptStatus },
    NotFound,
}

impl RedeemOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            RedeemOutcome::Verified { .. } => "verified",
            RedeemOutcome::Expired => "expired",
            RedeemOutcome::InvalidCode { .. } => "invalid_code",
            RedeemOutcome::FailedGuesses => "failed_guesses",
            RedeemOutcome::NotReady { .. } => "not_ready",
            RedeemOutcome::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    NotReady,
    Exhausted,
    Correct,
    Wrong,
}

#[derive(Clone)]
pub struct RedemptionGateway {
    manager: AttemptManager,
    clients: Arc<dyn ClientRegistry>,
}

impl RedemptionGateway {
    pub fn new(manager: AttemptManager, clients: Arc<dyn ClientRegistry>) -> Self {
        Self { manager, clients }
    }

    /// Checks `submitted_code` against the attempt and finalizes it.
    ///
    /// The code is compared as an exact string. A wrong guess and the
    /// decrement it causes are one conditional write, so concurrent
    /// submissions each cost exactly one guess.
    pub async fn redeem(&self, id: &AttemptId, submitted_code: &str) -> VerifyResult<RedeemOutcome> {
        let outcome = self.evaluate(id, submitted_code).await?;
        metrics::REDEMPTIONS_TOTAL
            .with_label_values(&[outcome.metric_label()])
            .inc();
        Ok(outcome)
    }

    async fn evaluate(&self, id: &AttemptId, submitted_code: &str) -> VerifyResult<RedeemOutcome> {
        let mut verdict = Verdict::NotReady;
        let result = self
            .manager
            .transition(id, |attempt| {
                if attempt.status != AttemptStatus::CodeSent {
                    verdict = Verdict::NotReady;
                    return Ok(());
                }
                if attempt.guesses_remaining <= 0 {
                    verdict = Verdict::Exhausted;
                    attempt.status = AttemptStatus::FailedGuesses;
                    return Ok(());
                }
                if submitted_code == attempt.code {
                    verdict = Verdict::Correct;
                    attempt.status = AttemptStatus::Verified;
                } else {
                    verdict = Verdict::Wrong;
                    attempt.guesses_remaining -= 1;
                    if attempt.guesses_remaining <= 0 {
                        attempt.status = AttemptStatus::FailedGuesses;
                    }
                }
                Ok(())
            })
            .await;

        let transition = match result {
            Ok(transition) => transition,
            Err(VerifyError::NotFound) => return Ok(RedeemOutcome::NotFound),
            Err(e) => return Err(e),
        };
        let attempt = transition.attempt;

        match transition.kind {
            TransitionKind::Expired => {
                log::info!("Redemption on expired attempt {}", short_id(id.as_str()));
                return Ok(RedeemOutcome::Expired);
            }
            TransitionKind::AlreadyTerminal => {
                return Ok(match attempt.status {
                    AttemptStatus::Verified => RedeemOutcome::Verified {
                        redirect_url: self.redirect_for(&attempt.client_id).await,
                    },
                    AttemptStatus::Expired => RedeemOutcome::Expired,
                    _ => RedeemOutcome::FailedGuesses,
                });
            }
            TransitionKind::Applied | TransitionKind::Unchanged => {}
        }

        Ok(match verdict {
            Verdict::NotReady => RedeemOutcome::NotReady { status: attempt.status },
            Verdict::Exhausted => RedeemOutcome::FailedGuesses,
            Verdict::Correct => {
                log::info!("Attempt {} verified", short_id(id.as_str()));
                RedeemOutcome::Verified {
                    redirect_url: self.redirect_for(&attempt.client_id).await,
                }
            }
            Verdict::Wrong => {
                log::info!(
                    "Wrong code for attempt {}, {} guess(es) left",
                    short_id(id.as_str()),
                    attempt.guesses_remaining
                );
                RedeemOutcome::InvalidCode {
                    guesses_remaining: attempt.guesses_remaining,
                }
            }
        })
    }

    /// First redirect target of an active client, if any.
    ///
    /// A registry fault does not undo the verification; the caller simply
    /// gets no redirect and can resubmit the code to try again.
    async fn redirect_for(&self, client_id: &str) -> Option<String> {
        let lookup = retry_with_timeout(&RetryConfig::quick(), config::network::registry_timeout(), || {
            self.clients.find_client(client_id)
        })
        .await;

        match lookup {
            Ok(Some(client)) => {
                let target = client.redirect_target().map(str::to_string);
                if target.is_none() {
                    log::warn!("Client {} is {} or has no redirect target", client_id, client.status);
                }
                target
            }
            Ok(None) => {
                log::warn!("Client {} is not registered, no redirect", client_id);
                None
            }
            Err(e) => {
                log::error!("Client registry lookup for {} failed: {}", client_id, e);
                None
            }
        }
    }
}
