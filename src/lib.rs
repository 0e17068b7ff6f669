//! Televerify - phone number verification over a Telegram bot
//!
//! A website starts a verification attempt for a submitted phone number and
//! sends the user to the bot through a deep link. The bot asks the user to
//! share their contact, compares the asserted number with the submitted one
//! and delivers a one-time code, which the user then redeems on the website.
//!
//! # Module Structure
//!
//! - `core`: Configuration, errors, logging, metrics, retries and the HTTP API
//! - `storage`: SQLite and in-memory record stores
//! - `verification`: Attempt lifecycle, the bot linking protocol and code redemption
//! - `telegram`: Bot setup, update classification and the outbound transport
//! - `testing`: Test doubles

pub mod cli;
pub mod core;
pub mod storage;
pub mod telegram;
pub mod testing;
pub mod verification;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult};
pub use storage::{create_pool, DbPool};
pub use verification::{AttemptManager, ChannelLinker, RedemptionGateway, VerificationPolicy};
