//! Protocol router — maps sub-protocol IDs to inbound stream handlers.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::transport::Stream;

/// A handler invoked once per inbound stream negotiated for its protocol.
///
/// The handler owns the stream and is responsible for closing or resetting
/// it.
pub type StreamHandler = Arc<dyn Fn(Stream) -> BoxFuture<'static, ()> + Send + Sync>;

/// Routes negotiated inbound streams to the handler registered for their
/// protocol ID.
#[derive(Default)]
pub struct ProtocolRouter {
    handlers: HashMap<String, StreamHandler>,
}

impl ProtocolRouter {
    /// Create a new router with no handlers registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a protocol, replacing any previous one.
    pub fn register(&mut self, protocol: impl Into<String>, handler: StreamHandler) {
        let protocol = protocol.into();
        debug!("Registering stream handler for {protocol}");
        self.handlers.insert(protocol, handler);
    }

    /// Check if a handler is registered for a protocol.
    pub fn has_handler(&self, protocol: &str) -> bool {
        self.handlers.contains_key(protocol)
    }

    /// The handler for a protocol, if any.
    pub fn handler(&self, protocol: &str) -> Option<StreamHandler> {
        self.handlers.get(protocol).cloned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
