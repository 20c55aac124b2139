//! MCU Gateway - WebSocket control plane for the emulator
//!
//! A single client drives the process-wide engine through named events.
//! Inbound `{event, data}` messages are dispatched to registered handlers,
//! engine calls run one at a time on the blocking pool, and captured engine
//! output, halt notifications and state snapshots flow back to the client.

mod connection;
mod engine;
mod gateway;
pub mod handlers;
pub mod protocol;
mod router;
mod session;

pub use connection::{ConnectionError, ConnectionHandle};
pub use engine::EngineHandle;
pub use gateway::{Gateway, GatewayConfig, GatewayError};
pub use protocol::EventMessage;
pub use router::{EventHandler, EventRouter, HandlerError};
pub use session::{Session, SessionError, SessionLease, SessionSlot};
