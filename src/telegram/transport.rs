//! Outbound side of the channel: the messages the linking protocol sends.
//!
//! The protocol only knows [`ChannelTransport`]; `TelegramTransport` is the
//! teloxide implementation, tests use `testing::RecordingTransport`.

use async_trait::async_trait;
use std::time::Duration;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{ButtonRequest, KeyboardButton, KeyboardMarkup, KeyboardRemove};
use thiserror::Error;

use crate::core::config;
use crate::core::metrics;
use crate::core::retry::{retry_with_timeout, RetryConfig, Retryable};
use crate::verification::model::ChannelId;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("Telegram request timed out")]
    Timeout,
}

impl From<tokio::time::error::Elapsed> for TransportError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TransportError::Timeout
    }
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            TransportError::Telegram(err) => err.is_retryable(),
            TransportError::Timeout => true,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TransportError::Telegram(err) => err.retry_after(),
            TransportError::Timeout => None,
        }
    }
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Plain text reply.
    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<(), TransportError>;

    /// Prompt with a one-time "share contact" keyboard.
    async fn request_contact(&self, channel: ChannelId, prompt: &str) -> Result<(), TransportError>;

    /// Message carrying the one-time code; clears the contact keyboard.
    async fn deliver_code(&self, channel: ChannelId, text: &str) -> Result<(), TransportError>;
}

/// Label of the contact-share button.
pub const SHARE_CONTACT_BUTTON: &str = "📱 Share contact";

/// [`ChannelTransport`] over the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
    retry: RetryConfig,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            retry: RetryConfig::quick(),
        }
    }

    async fn send(&self, channel: ChannelId, text: &str, keyboard: Keyboard) -> Result<(), TransportError> {
        let result = retry_with_timeout(&self.retry, config::network::timeout(), || {
            let request = self.bot.send_message(ChatId(channel.0), text);
            async move {
                match keyboard {
                    Keyboard::Keep => request.await?,
                    Keyboard::Contact => request.reply_markup(contact_keyboard()).await?,
                    Keyboard::Remove => request.reply_markup(KeyboardRemove::new()).await?,
                };
                Ok::<(), TransportError>(())
            }
        })
        .await;

        if let Err(e) = &result {
            metrics::CHANNEL_SEND_FAILURES_TOTAL.inc();
            log::error!("Failed to send message to chat {}: {}", channel, e);
        }
        result
    }
}

#[derive(Debug, Clone, Copy)]
enum Keyboard {
    Keep,
    Contact,
    Remove,
}

fn contact_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(SHARE_CONTACT_BUTTON).request(ButtonRequest::Contact)
    ]])
    .one_time_keyboard()
    .resize_keyboard()
}

#[async_trait]
impl ChannelTransport for TelegramTransport {
    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<(), TransportError> {
        self.send(channel, text, Keyboard::Keep).await
    }

    async fn request_contact(&self, channel: ChannelId, prompt: &str) -> Result<(), TransportError> {
        self.send(channel, prompt, Keyboard::Contact).await
    }

    async fn deliver_code(&self, channel: ChannelId, text: &str) -> Result<(), TransportError> {
        self.send(channel, text, Keyboard::Remove).await
    }
}
