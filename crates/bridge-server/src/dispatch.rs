//! Handler registry

use crate::handlers::ThoughtHandler;
use async_trait::async_trait;
use bridge_inference::InferenceError;
use bridge_proto::{EventKind, ProtocolError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors a handler reports instead of a response
///
/// The server turns these into an `Error: <message>` response.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Inference(#[from] InferenceError),

    #[error("{0}")]
    Internal(String),
}

/// Produces the response for one kind of event
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle the `data` payload of a validated event from `agent_id`
    async fn handle(&self, agent_id: &str, data: &Value) -> Result<String, HandlerError>;
}

/// Maps event kinds to their handlers
///
/// Built before the server starts and shared read-only afterwards.
#[derive(Default, Clone)]
pub struct DispatchTable {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in `state_change` thought handler
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.register(EventKind::StateChange, Arc::new(ThoughtHandler::default()));
        table
    }

    /// Register a handler, returning the one it replaces
    pub fn register(
        &mut self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> Option<Arc<dyn EventHandler>> {
        self.handlers.insert(kind, handler)
    }

    /// Find the handler for a wire `event_type`
    ///
    /// Unknown names and known kinds without a handler both resolve to
    /// [`ProtocolError::UnknownEventType`].
    pub fn lookup(&self, event_type: &str) -> Result<Arc<dyn EventHandler>, ProtocolError> {
        EventKind::parse(event_type)
            .and_then(|kind| self.handlers.get(&kind).cloned())
            .ok_or_else(|| ProtocolError::UnknownEventType(event_type.to_string()))
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds, in declaration order
    pub fn kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
