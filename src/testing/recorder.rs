//! Transport double that records outbound messages instead of sending them.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::telegram::transport::{ChannelTransport, TransportError};
use crate::verification::model::ChannelId;

/// One recorded outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    ContactRequest(String),
    Code(String),
}

impl Outbound {
    pub fn text(&self) -> &str {
        match self {
            Outbound::Text(text) | Outbound::ContactRequest(text) | Outbound::Code(text) => text,
        }
    }
}

/// Records every message per chat; can be switched to fail every send.
#[derive(Debug, Default, Clone)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<(ChannelId, Outbound)>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send fail with a timeout.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn record(&self, channel: ChannelId, message: Outbound) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout);
        }
        let mut sent = match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sent.push((channel, message));
        Ok(())
    }

    /// Everything sent so far, in order.
    pub fn messages(&self) -> Vec<(ChannelId, Outbound)> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn messages_to(&self, channel: ChannelId) -> Vec<Outbound> {
        self.messages()
            .into_iter()
            .filter(|(to, _)| *to == channel)
            .map(|(_, message)| message)
            .collect()
    }

    pub fn texts_to(&self, channel: ChannelId) -> Vec<String> {
        self.messages_to(channel)
            .iter()
            .map(|message| message.text().to_string())
            .collect()
    }

    pub fn last_to(&self, channel: ChannelId) -> Option<Outbound> {
        self.messages_to(channel).pop()
    }

    pub fn last_text_to(&self, channel: ChannelId) -> Option<String> {
        self.last_to(channel).map(|message| message.text().to_string())
    }

    /// Number of code deliveries to `channel`.
    pub fn codes_to(&self, channel: ChannelId) -> usize {
        self.messages_to(channel)
            .iter()
            .filter(|message| matches!(message, Outbound::Code(_)))
            .count()
    }

    pub fn all_text(&self) -> Vec<String> {
        self.messages()
            .iter()
            .map(|(_, message)| message.text().to_string())
            .collect()
    }
}

#[async_trait]
impl ChannelTransport for RecordingTransport {
    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<(), TransportError> {
        self.record(channel, Outbound::Text(text.to_string()))
    }

    async fn request_contact(&self, channel: ChannelId, prompt: &str) -> Result<(), TransportError> {
        self.record(channel, Outbound::ContactRequest(prompt.to_string()))
    }

    async fn deliver_code(&self, channel: ChannelId, text: &str) -> Result<(), TransportError> {
        self.record(channel, Outbound::Code(text.to_string()))
    }
}
