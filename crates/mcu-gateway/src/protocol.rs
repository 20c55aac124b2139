//! Wire protocol
//!
//! Every frame in either direction is a JSON document `{"event": ..., "data": ...}`
//! where `data` is optional and handler-defined.

use mcu_engine::ControllerEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names sent by the gateway.
pub mod outbound {
    pub const READY: &str = "ready";
    pub const PONG: &str = "pong";
    pub const LOG: &str = "log";
    pub const CONSOLE: &str = "console";
    pub const TEST: &str = "test";
    pub const EXECUTE_STOP: &str = "execute stop";
    pub const MCU_RESUMED: &str = "mcu resumed";
    pub const MCU_STATE: &str = "mcu state";
}

/// Event names accepted from the client.
pub mod inbound {
    pub const PING: &str = "ping";
    pub const TEST: &str = "test";
    pub const COMPILE_ASM: &str = "compile asm";
    pub const COMPILE_C: &str = "compile c";
    pub const EXECUTE_CYCLE: &str = "execute cycle";
    pub const MCU_RESUME: &str = "mcu resume";
}

/// A named event with an optional payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl EventMessage {
    /// An event without payload.
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: None,
        }
    }

    pub fn with_data(event: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            event: event.into(),
            data: Some(data.into()),
        }
    }

    pub fn log(text: impl Into<String>) -> Self {
        Self::with_data(outbound::LOG, text.into())
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl TryFrom<ControllerEvent> for EventMessage {
    type Error = serde_json::Error;

    fn try_from(event: ControllerEvent) -> Result<Self, Self::Error> {
        Ok(match event {
            ControllerEvent::Console(text) => Self::with_data(outbound::CONSOLE, text),
            ControllerEvent::Log(text) => Self::log(text),
            ControllerEvent::Stopped => Self::new(outbound::EXECUTE_STOP),
            ControllerEvent::Resumed => Self::new(outbound::MCU_RESUMED),
            ControllerEvent::State(snapshot) => {
                Self::with_data(outbound::MCU_STATE, serde_json::to_value(snapshot)?)
            }
        })
    }
}
