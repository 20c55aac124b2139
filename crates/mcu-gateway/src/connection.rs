//! Outbound side of a WebSocket connection

use std::net::SocketAddr;

use mcu_engine::{ControllerEvent, EventSink};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error};

use crate::protocol::EventMessage;

/// Handle to a WebSocket connection for sending messages.
///
/// Frames are queued on an unbounded channel drained by the connection's
/// writer task, so sending never blocks and works from blocking threads.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Connection ID
    pub id: String,
    /// Client address
    pub addr: SocketAddr,
    sender: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    pub fn new(id: String, addr: SocketAddr, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self { id, addr, sender }
    }

    /// Send an event to this connection
    pub fn send(&self, event: EventMessage) -> Result<(), ConnectionError> {
        let json = event.encode()?;
        self.send_frame(Message::Text(json))
    }

    /// Queue a raw WebSocket frame
    pub fn send_frame(&self, frame: Message) -> Result<(), ConnectionError> {
        self.sender.send(frame).map_err(|_| ConnectionError::Closed)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl EventSink for ConnectionHandle {
    fn emit(&self, event: ControllerEvent) {
        let message = match EventMessage::try_from(event) {
            Ok(message) => message,
            Err(e) => {
                error!("Failed to serialize engine event: {}", e);
                return;
            }
        };
        if let Err(e) = self.send(message) {
            debug!("Dropping engine event for {}: {}", self.id, e);
        }
    }
}

/// Connection-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}
