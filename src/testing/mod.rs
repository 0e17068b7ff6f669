//! Test doubles shared by unit and integration tests.
//!
//! ```
//! use std::sync::Arc;
//! use televerify::testing::RecordingTransport;
//!
//! let transport = Arc::new(RecordingTransport::new());
//! // hand `transport.clone()` to a ChannelLinker, then inspect what it sent
//! assert!(transport.messages().is_empty());
//! ```

pub mod recorder;

pub use recorder::{Outbound, RecordingTransport};
