//! Common test utilities
//!
//! This module is shared across all integration tests

pub mod fixtures;
pub mod updates;

#[allow(unused_imports)]
pub use fixtures::{TestEnvironment, CLIENT_ID, REDIRECT_URL};
#[allow(unused_imports)]
pub use updates::{contact_update, text_update};
