//! Raw Telegram update bodies, as the webhook receives them

#![allow(dead_code)]

use serde_json::{json, Value};

fn message(update_id: i64, chat: i64, body: Value) -> Value {
    let mut message = json!({
        "message_id": update_id,
        "date": 1_700_000_000,
        "chat": {"id": chat, "type": "private", "first_name": "Test"},
        "from": {"id": chat, "is_bot": false, "first_name": "Test"},
    });
    if let (Some(message), Some(body)) = (message.as_object_mut(), body.as_object()) {
        for (key, value) in body {
            message.insert(key.clone(), value.clone());
        }
    }
    json!({"update_id": update_id, "message": message})
}

/// Private text message; `/commands` get a bot_command entity like real clients send.
pub fn text_update(update_id: i64, chat: i64, text: &str) -> Value {
    if text.starts_with('/') {
        let command_len = text.split_whitespace().next().map(str::len).unwrap_or_default();
        message(
            update_id,
            chat,
            json!({"text": text, "entities": [{"type": "bot_command", "offset": 0, "length": command_len}]}),
        )
    } else {
        message(update_id, chat, json!({"text": text}))
    }
}

/// Contact card shared in `chat`; `owner` is the user the card belongs to.
pub fn contact_update(update_id: i64, chat: i64, phone: &str, owner: i64) -> Value {
    message(
        update_id,
        chat,
        json!({"contact": {"phone_number": phone, "first_name": "Test", "user_id": owner}}),
    )
}
