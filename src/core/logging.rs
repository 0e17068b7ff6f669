//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - Masking helpers so phone numbers never reach the log in full
//! - A configuration summary printed at startup

use anyhow::Result;
use simplelog::*;
use std::fs::OpenOptions;

use crate::core::config;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file (appended to, created if missing)
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to open the file or a logger was already set
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .map_err(|e| anyhow::anyhow!("Failed to open log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(
            LevelFilter::Info,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(LevelFilter::Info, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Masks the middle of a phone number for log output.
///
/// Keeps the leading `+`, the first four digits and the last two:
/// `+251911223344` becomes `+2519******44`. Short inputs are masked entirely.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 7 {
        return "*".repeat(chars.len());
    }
    let head = 5.min(chars.len());
    let tail = 2;
    let middle = chars.len() - head - tail;
    let mut masked: String = chars[..head].iter().collect();
    masked.push_str(&"*".repeat(middle));
    masked.extend(&chars[chars.len() - tail..]);
    masked
}

/// Shortens an attempt id for log lines (`3f2a9c1e…`).
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Logs the effective configuration at application startup
///
/// Secrets are reported as set/not set only.
pub fn log_startup_configuration() {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("📋 Configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("DATABASE_PATH: {}", config::DATABASE_PATH.as_str());
    log::info!("WEB_PORT: {}", *config::WEB_PORT);
    log::info!(
        "BOT_TOKEN: {}",
        if config::BOT_TOKEN.is_empty() { "❌ not set" } else { "✅ set" }
    );
    match config::BOT_USERNAME.as_deref() {
        Some(name) => log::info!("BOT_USERNAME: @{}", name),
        None => log::warn!("⚠️  BOT_USERNAME: not set, deep links will not be generated"),
    }
    match config::WEBHOOK_URL.as_deref() {
        Some(url) => log::info!("WEBHOOK_URL: {}", url),
        None => log::warn!("⚠️  WEBHOOK_URL: not set"),
    }
    if config::WEBHOOK_SECRET.is_some() {
        log::info!("WEBHOOK_SECRET: ✅ set");
    } else {
        log::warn!("⚠️  WEBHOOK_SECRET: not set, webhook requests are not authenticated");
    }
    log::info!(
        "Policy: ttl={}s guesses={} mismatches={} link_session_ttl={}s",
        config::verification::CODE_TTL_SECS,
        config::verification::MAX_GUESSES,
        config::verification::MAX_PHONE_MISMATCHES,
        config::verification::LINK_SESSION_TTL_SECS
    );
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
