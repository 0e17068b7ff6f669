//! Metrics collection using Prometheus
//!
//! This module provides a centralized metrics registry for tracking:
//! - Verification funnel (attempts started, codes delivered, redemptions)
//! - Channel traffic (webhook events by kind)
//! - Security signals (identity conflicts, foreign contacts, mismatches)
//! - Infrastructure health (retries)

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_int_counter, CounterVec, IntCounter};

// ======================
// FUNNEL METRICS
// ======================

lazy_static! {
    /// Attempts created through the start endpoint
    pub static ref ATTEMPTS_STARTED_TOTAL: IntCounter = register_int_counter!(
        "televerify_attempts_started_total",
        "Total number of verification attempts created"
    )
    .expect("metric can be registered");

    /// Phone comparisons performed by the channel-linking protocol
    /// Labels: result (match/mismatch/fast_path)
    pub static ref PHONE_CHECKS_TOTAL: CounterVec = register_counter_vec!(
        "televerify_phone_checks_total",
        "Channel-asserted phone comparisons by result",
        &["result"]
    )
    .expect("metric can be registered");

    /// Redemption results
    /// Labels: outcome (verified/expired/invalid_code/failed_guesses/not_ready/not_found)
    pub static ref REDEMPTIONS_TOTAL: CounterVec = register_counter_vec!(
        "televerify_redemptions_total",
        "Code redemptions by outcome",
        &["outcome"]
    )
    .expect("metric can be registered");
}

// ======================
// CHANNEL METRICS
// ======================

lazy_static! {
    /// Inbound channel events
    /// Labels: kind (entry/welcome/help/contact/ignored/unparseable)
    pub static ref CHANNEL_EVENTS_TOTAL: CounterVec = register_counter_vec!(
        "televerify_channel_events_total",
        "Inbound channel events by kind",
        &["kind"]
    )
    .expect("metric can be registered");

    /// Outbound channel messages that failed after retries
    pub static ref CHANNEL_SEND_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "televerify_channel_send_failures_total",
        "Outbound channel messages that could not be delivered"
    )
    .expect("metric can be registered");
}

// ======================
// SECURITY METRICS
// ======================

lazy_static! {
    /// A second channel identity tried to act on a bound attempt
    pub static ref IDENTITY_CONFLICTS_TOTAL: IntCounter = register_int_counter!(
        "televerify_identity_conflicts_total",
        "Channel identity conflicts on bound attempts"
    )
    .expect("metric can be registered");

    /// Contacts shared that do not belong to the sender
    pub static ref FOREIGN_CONTACTS_TOTAL: IntCounter = register_int_counter!(
        "televerify_foreign_contacts_total",
        "Shared contacts rejected because they belong to someone else"
    )
    .expect("metric can be registered");
}

// ======================
// INFRASTRUCTURE METRICS
// ======================

lazy_static! {
    /// Retries of transient failures
    /// Labels: attempt (1, 2, ...)
    pub static ref RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "televerify_retries_total",
        "Retries of transient store/channel failures",
        &["attempt"]
    )
    .expect("metric can be registered");

    /// Optimistic-concurrency conflicts on attempt writes
    pub static ref VERSION_CONFLICTS_TOTAL: IntCounter = register_int_counter!(
        "televerify_version_conflicts_total",
        "Conditional attempt updates that lost a race and were re-read"
    )
    .expect("metric can be registered");
}

/// Forces registration so every series shows up in /metrics before first use.
pub fn init_metrics() {
    log::info!("Initializing metrics registry...");

    let _ = &*ATTEMPTS_STARTED_TOTAL;
    let _ = &*CHANNEL_SEND_FAILURES_TOTAL;
    let _ = &*IDENTITY_CONFLICTS_TOTAL;
    let _ = &*FOREIGN_CONTACTS_TOTAL;
    let _ = &*VERSION_CONFLICTS_TOTAL;

    for result in ["match", "mismatch", "fast_path"] {
        PHONE_CHECKS_TOTAL.with_label_values(&[result]);
    }
    for outcome in [
        "verified",
        "expired",
        "invalid_code",
        "failed_guesses",
        "not_ready",
        "not_found",
    ] {
        REDEMPTIONS_TOTAL.with_label_values(&[outcome]);
    }
    for kind in ["entry", "welcome", "help", "contact", "ignored", "unparseable"] {
        CHANNEL_EVENTS_TOTAL.with_label_values(&[kind]);
    }
}

/// Renders all registered metrics in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
