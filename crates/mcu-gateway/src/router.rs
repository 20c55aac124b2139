//! Event routing
//!
//! Maps event names to handlers. Registering a name that already has a
//! handler replaces it: the last registration wins and the replaced handler
//! is handed back to the caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use mcu_engine::ControllerError;
use serde_json::Value;
use tracing::{debug, warn};

use crate::session::Session;

/// Handles one named event.
///
/// `payload` is `None` when the inbound message carried no `data`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, session: &Session, payload: Option<Value>) -> Result<(), HandlerError>;
}

/// Event name to handler mapping.
#[derive(Clone, Default)]
pub struct EventRouter {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`, returning the handler it replaces.
    pub fn register<H>(&mut self, event: impl Into<String>, handler: H) -> Option<Arc<dyn EventHandler>>
    where
        H: EventHandler + 'static,
    {
        let event = event.into();
        let previous = self.handlers.insert(event.clone(), Arc::new(handler));
        if previous.is_some() {
            warn!("Handler for event '{}' replaced", event);
        }
        previous
    }

    pub fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Registered event names, sorted.
    pub fn events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        events.sort_unstable();
        events
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler registered for `event` to completion.
    ///
    /// Returns `Ok(false)` when no handler is registered; the message is dropped.
    pub async fn dispatch(
        &self,
        session: &Session,
        event: &str,
        payload: Option<Value>,
    ) -> Result<bool, HandlerError> {
        let Some(handler) = self.handlers.get(event) else {
            debug!("No handler for event '{}'", event);
            return Ok(false);
        };
        handler.handle(session, payload).await?;
        Ok(true)
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("events", &self.events())
            .finish()
    }
}

/// Handler failures. Reported to the client, never fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("event '{event}' expects {expected} as data")]
    InvalidPayload {
        event: &'static str,
        expected: &'static str,
    },
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error("engine task failed: {0}")]
    EngineTask(String),
}
