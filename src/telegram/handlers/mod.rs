//! Telegram update handling
//!
//! Webhook deliveries and the polling dispatcher both end up in
//! [`handle_event`], so the two transports behave identically.

mod schema;
mod types;

pub use schema::schema;
pub use types::{HandlerDeps, HandlerError};

use teloxide::types::Update;

use crate::core::metrics;
use crate::telegram::events::{classify_update, ChannelEvent};
use crate::verification::error::VerifyResult;
use crate::verification::linking::LinkOutcome;

/// Routes one classified event to the linking protocol.
///
/// Returns `None` for events that need no protocol work.
pub async fn handle_event(deps: &HandlerDeps, event: ChannelEvent) -> VerifyResult<Option<LinkOutcome>> {
    metrics::CHANNEL_EVENTS_TOTAL.with_label_values(&[event.kind()]).inc();

    match event {
        ChannelEvent::Entry { channel, payload } => deps.linker.handle_entry(channel, &payload).await.map(Some),
        ChannelEvent::PhoneAssertion {
            channel,
            sender,
            contact_user_id,
            phone,
        } => deps
            .linker
            .handle_phone_assertion(channel, sender, contact_user_id, &phone)
            .await
            .map(Some),
        ChannelEvent::Welcome { channel } | ChannelEvent::Help { channel } => {
            deps.linker.send_welcome(channel).await;
            Ok(None)
        }
        ChannelEvent::Ignored => Ok(None),
    }
}

/// Entry point for one raw update (webhook body or polled update).
pub async fn handle_update(deps: &HandlerDeps, update: &Update) -> VerifyResult<Option<LinkOutcome>> {
    let event = classify_update(update);
    log::debug!("Update {} classified as {}", update.id.0, event.kind());
    handle_event(deps, event).await
}
