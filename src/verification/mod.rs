//! Cross-channel phone verification.
//!
//! - [`lifecycle`]: attempt creation and guarded state transitions
//! - [`linking`]: the bot side (deep-link entry, contact share, code delivery)
//! - [`redemption`]: the site side (code check, redirect resolution)

pub mod clients;
pub mod code;
pub mod error;
pub mod lifecycle;
pub mod linking;
pub mod model;
pub mod redemption;

pub use clients::{ClientApplication, ClientRegistry, ClientStatus};
pub use error::{VerifyError, VerifyResult};
pub use lifecycle::{AttemptManager, Transition, TransitionKind, VerificationPolicy};
pub use linking::{ChannelLinker, Delivery, LinkOutcome};
pub use model::{AttemptId, AttemptStatus, ChannelId, ChannelLinkSession, VerificationAttempt};
pub use redemption::{RedeemOutcome, RedemptionGateway};
