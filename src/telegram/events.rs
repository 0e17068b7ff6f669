//! Turns raw Telegram updates into the events the linking protocol handles.

use teloxide::types::{Message, Update, UpdateKind};

use crate::telegram::bot::Command;
use crate::verification::model::ChannelId;

/// One inbound user action, already reduced to what verification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// `/start <payload>` from the website deep link
    Entry { channel: ChannelId, payload: String },
    /// Plain `/start` or any other private text
    Welcome { channel: ChannelId },
    Help { channel: ChannelId },
    /// A contact card shared in the chat
    PhoneAssertion {
        channel: ChannelId,
        sender: i64,
        contact_user_id: Option<i64>,
        phone: String,
    },
    /// Group traffic, edits, service messages and other update kinds
    Ignored,
}

impl ChannelEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::Entry { .. } => "entry",
            ChannelEvent::Welcome { .. } => "welcome",
            ChannelEvent::Help { .. } => "help",
            ChannelEvent::PhoneAssertion { .. } => "contact",
            ChannelEvent::Ignored => "ignored",
        }
    }
}

pub fn classify_update(update: &Update) -> ChannelEvent {
    match &update.kind {
        UpdateKind::Message(msg) => classify_message(msg),
        _ => ChannelEvent::Ignored,
    }
}

/// Only private chats are considered: the chat id is the user's identity.
pub fn classify_message(msg: &Message) -> ChannelEvent {
    if !msg.chat.is_private() {
        return ChannelEvent::Ignored;
    }
    let channel = ChannelId(msg.chat.id.0);

    if let Some(contact) = msg.contact() {
        let Some(sender) = msg.from.as_ref().and_then(|user| i64::try_from(user.id.0).ok()) else {
            return ChannelEvent::Ignored;
        };
        return ChannelEvent::PhoneAssertion {
            channel,
            sender,
            contact_user_id: contact.user_id.and_then(|id| i64::try_from(id.0).ok()),
            phone: contact.phone_number.clone(),
        };
    }

    let Some(text) = msg.text() else {
        return ChannelEvent::Ignored;
    };
    match Command::parse_text(text) {
        Some(Command::Start(payload)) if !payload.trim().is_empty() => ChannelEvent::Entry {
            channel,
            payload: payload.trim().to_string(),
        },
        Some(Command::Help) => ChannelEvent::Help { channel },
        _ => ChannelEvent::Welcome { channel },
    }
}
