//! Configuration read once from the environment.
//!
//! `.env` is loaded by `main` before any of these statics is touched.

use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: televerify.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "televerify.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: televerify.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "televerify.log".to_string()));

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Bot username (without @), used to build `t.me` deep links.
/// Read from BOT_USERNAME environment variable. When unset, the start
/// endpoint returns only the payload and the web side builds the link.
pub static BOT_USERNAME: Lazy<Option<String>> = Lazy::new(|| {
    env::var("BOT_USERNAME")
        .ok()
        .map(|name| name.trim_start_matches('@').to_string())
        .filter(|name| !name.is_empty())
});

/// Custom Bot API server URL (local telegram-bot-api deployments)
pub static BOT_API_URL: Lazy<Option<String>> = Lazy::new(|| env::var("BOT_API_URL").ok());

/// Public URL Telegram posts updates to, e.g. `https://verify.example.com/api/telegram-webhook`
pub static WEBHOOK_URL: Lazy<Option<String>> = Lazy::new(|| env::var("WEBHOOK_URL").ok());

/// Secret echoed by Telegram in `X-Telegram-Bot-Api-Secret-Token`.
/// Telegram accepts 1-256 characters from `A-Za-z0-9_-`.
pub static WEBHOOK_SECRET: Lazy<Option<String>> =
    Lazy::new(|| env::var("WEBHOOK_SECRET").ok().filter(|secret| !secret.is_empty()));

/// Port for the public HTTP API
/// Read from WEB_PORT environment variable
/// Default: 3000
pub static WEB_PORT: Lazy<u16> = Lazy::new(|| {
    env::var("WEB_PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(3000)
});

/// Verification policy constants
pub mod verification {
    /// Lifetime of an attempt from creation until its code can no longer be redeemed
    pub const CODE_TTL_SECS: i64 = 300; // 5 minutes

    /// Wrong codes tolerated before the attempt fails
    pub const MAX_GUESSES: i64 = 3;

    /// Phone mismatches tolerated before the attempt fails
    pub const MAX_PHONE_MISMATCHES: i64 = 3;

    /// How long a "please share your contact" exchange stays open
    pub const LINK_SESSION_TTL_SECS: i64 = 600; // 10 minutes

    /// Prefix of the `/start` payload carrying the attempt id
    pub const DEEP_LINK_PREFIX: &str = "VERIFY_";

    /// Code TTL duration
    pub fn code_ttl() -> chrono::Duration {
        chrono::Duration::seconds(CODE_TTL_SECS)
    }

    /// Link session TTL duration
    pub fn link_session_ttl() -> chrono::Duration {
        chrono::Duration::seconds(LINK_SESSION_TTL_SECS)
    }
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for Telegram Bot API calls (in seconds)
    pub const REQUEST_TIMEOUT_SECS: u64 = 15;

    /// Upper bound for a single store call, including pool checkout (in seconds)
    pub const STORE_TIMEOUT_SECS: u64 = 5;

    /// Upper bound for a client registry lookup (in seconds)
    pub const REGISTRY_TIMEOUT_SECS: u64 = 5;

    /// Request timeout duration
    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }

    /// Store call timeout duration
    pub fn store_timeout() -> Duration {
        Duration::from_secs(STORE_TIMEOUT_SECS)
    }

    /// Registry lookup timeout duration
    pub fn registry_timeout() -> Duration {
        Duration::from_secs(REGISTRY_TIMEOUT_SECS)
    }
}

/// Retry configuration
pub mod retry {
    use super::Duration;

    /// Read-modify-write attempts before a version conflict is reported
    pub const MAX_CAS_ATTEMPTS: u32 = 8;

    /// Maximum number of retries when Bot API is still starting up
    pub const MAX_STARTUP_RETRIES: u32 = 12;

    /// Delay between startup retry attempts (in seconds)
    pub const STARTUP_RETRY_DELAY_SECS: u64 = 5;

    /// Startup retry delay duration
    pub fn startup_delay() -> Duration {
        Duration::from_secs(STARTUP_RETRY_DELAY_SECS)
    }
}

/// Web server configuration
pub mod web {
    use super::Duration;

    /// Upper bound for processing one webhook update before acknowledging anyway
    pub const WEBHOOK_PROCESSING_TIMEOUT_SECS: u64 = 20;

    /// Maximum accepted request body (Telegram updates are a few KB)
    pub const MAX_BODY_BYTES: usize = 256 * 1024;

    /// Webhook processing timeout duration
    pub fn webhook_processing_timeout() -> Duration {
        Duration::from_secs(WEBHOOK_PROCESSING_TIMEOUT_SECS)
    }
}
