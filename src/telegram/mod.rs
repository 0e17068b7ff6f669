//! Telegram bot integration: bot setup, update classification, handlers and the outbound transport

pub mod bot;
pub mod events;
pub mod handlers;
pub mod transport;

pub use bot::{create_bot, Command};
pub use events::{classify_update, ChannelEvent};
pub use handlers::{handle_event, handle_update, schema, HandlerDeps, HandlerError};
pub use transport::{ChannelTransport, TelegramTransport, TransportError};
