//! Dispatcher schema for long-polling mode

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::Message;

use super::types::{HandlerDeps, HandlerError};
use crate::telegram::events::classify_message;

/// Creates the dispatcher schema used by `run --polling`.
///
/// Only private-chat messages reach the endpoint; classification and the
/// protocol itself are shared with the webhook path.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.chat.is_private())
        .endpoint(move |msg: Message| {
            let deps = deps.clone();
            async move {
                let event = classify_message(&msg);
                if let Err(e) = super::handle_event(&deps, event).await {
                    // Already answered in-chat; the update is not retried in polling mode
                    log::error!("Handling message {} in chat {} failed: {}", msg.id.0, msg.chat.id, e);
                }
                Ok(())
            }
        })
}
