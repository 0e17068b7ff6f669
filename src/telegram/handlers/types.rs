//! Handler types and dependencies

use crate::verification::linking::ChannelLinker;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub linker: ChannelLinker,
}

impl HandlerDeps {
    pub fn new(linker: ChannelLinker) -> Self {
        Self { linker }
    }
}
