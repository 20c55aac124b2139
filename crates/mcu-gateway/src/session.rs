//! Session management
//!
//! A [`Session`] binds one connection to the engine for the lifetime of that
//! connection. The engine is process-wide, so only one session may be active
//! at a time; [`SessionSlot`] enforces this by handing out a single
//! [`SessionLease`] and rejecting further claims until it is dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::connection::ConnectionHandle;
use crate::engine::EngineHandle;
use crate::protocol::EventMessage;
use crate::router::EventRouter;

/// The live binding between a connection and the engine.
///
/// Passed to every handler; handlers reach the engine and the client only
/// through it.
#[derive(Debug, Clone)]
pub struct Session {
    connection: ConnectionHandle,
    engine: Arc<EngineHandle>,
    router: Arc<EventRouter>,
    connected_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        connection: ConnectionHandle,
        engine: Arc<EngineHandle>,
        router: Arc<EventRouter>,
    ) -> Self {
        Self {
            connection,
            engine,
            router,
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        self.connection.id()
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Send an event to the client. A closed connection is logged, not reported.
    pub fn emit(&self, event: &str, data: Option<Value>) {
        let message = match data {
            Some(data) => EventMessage::with_data(event, data),
            None => EventMessage::new(event),
        };
        self.send(message);
    }

    pub fn send(&self, message: EventMessage) {
        if let Err(e) = self.connection.send(message) {
            debug!("Session {} could not send event: {}", self.id(), e);
        }
    }

    /// Send a `log` event.
    pub fn log(&self, text: impl Into<String>) {
        self.send(EventMessage::log(text));
    }

    /// Dispatch an inbound event through the session's router.
    pub async fn dispatch(
        &self,
        event: &str,
        payload: Option<Value>,
    ) -> Result<bool, crate::router::HandlerError> {
        self.router.dispatch(self, event, payload).await
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.connected_at
    }
}

#[derive(Debug, Clone)]
struct ActiveSession {
    id: String,
    addr: SocketAddr,
    since: DateTime<Utc>,
}

/// Guards the single active session.
#[derive(Debug, Default)]
pub struct SessionSlot {
    active: Mutex<Option<ActiveSession>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for a new session.
    ///
    /// Fails with [`SessionError::Busy`] while another lease is alive; the
    /// existing session is never disturbed.
    pub fn try_claim(
        self: &Arc<Self>,
        id: impl Into<String>,
        addr: SocketAddr,
    ) -> Result<SessionLease, SessionError> {
        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            return Err(SessionError::Busy {
                id: current.id.clone(),
                addr: current.addr,
            });
        }

        let id = id.into();
        *active = Some(ActiveSession {
            id: id.clone(),
            addr,
            since: Utc::now(),
        });
        info!("Session {} claimed by {}", id, addr);
        Ok(SessionLease {
            slot: Arc::clone(self),
            id,
        })
    }

    pub fn is_idle(&self) -> bool {
        self.active.lock().is_none()
    }

    /// ID and peer address of the active session.
    pub fn active(&self) -> Option<(String, SocketAddr)> {
        self.active
            .lock()
            .as_ref()
            .map(|s| (s.id.clone(), s.addr))
    }

    fn release(&self, id: &str) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|s| s.id == id) {
            if let Some(session) = active.take() {
                let held = Utc::now() - session.since;
                info!(
                    "Session {} released after {}s",
                    session.id,
                    held.num_seconds()
                );
            }
        }
    }
}

/// Ownership of the active-session slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct SessionLease {
    slot: Arc<SessionSlot>,
    id: String,
}

impl SessionLease {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.slot.release(&self.id);
    }
}

/// Session-related errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Another client is connected ({addr}, session {id})")]
    Busy { id: String, addr: SocketAddr },
}
