//! Builtin event handlers

use async_trait::async_trait;
use mcu_engine::{ProgramKind, StepOutcome};
use serde_json::Value;
use tracing::{debug, info};

use crate::protocol::{inbound, outbound, EventMessage};
use crate::router::{EventHandler, EventRouter, HandlerError};
use crate::session::Session;

/// Router with every builtin event registered.
pub fn builtin_router() -> EventRouter {
    let mut router = EventRouter::new();
    router.register(inbound::PING, Ping);
    router.register(inbound::TEST, Echo);
    router.register(
        inbound::COMPILE_ASM,
        CompileProgram::new(ProgramKind::Assembly),
    );
    router.register(inbound::COMPILE_C, CompileProgram::new(ProgramKind::Source));
    router.register(inbound::EXECUTE_CYCLE, ExecuteCycle);
    router.register(inbound::MCU_RESUME, Resume);
    router
}

/// Answers `ping` with `pong`.
pub struct Ping;

#[async_trait]
impl EventHandler for Ping {
    async fn handle(&self, session: &Session, _payload: Option<Value>) -> Result<(), HandlerError> {
        session.send(EventMessage::with_data(outbound::PONG, "pong"));
        Ok(())
    }
}

/// Sends the payload of `test` straight back.
pub struct Echo;

#[async_trait]
impl EventHandler for Echo {
    async fn handle(&self, session: &Session, payload: Option<Value>) -> Result<(), HandlerError> {
        session.emit(outbound::TEST, payload);
        Ok(())
    }
}

/// Loads program text into the engine.
pub struct CompileProgram {
    kind: ProgramKind,
}

impl CompileProgram {
    pub fn new(kind: ProgramKind) -> Self {
        Self { kind }
    }

    fn event(&self) -> &'static str {
        match self.kind {
            ProgramKind::Assembly => inbound::COMPILE_ASM,
            ProgramKind::Source => inbound::COMPILE_C,
        }
    }
}

#[async_trait]
impl EventHandler for CompileProgram {
    async fn handle(&self, session: &Session, payload: Option<Value>) -> Result<(), HandlerError> {
        let Some(Value::String(source)) = payload else {
            return Err(HandlerError::InvalidPayload {
                event: self.event(),
                expected: "program text",
            });
        };

        let accepted = session
            .engine()
            .load_program(source, self.kind, session.connection().clone())
            .await?;

        if accepted {
            session.log(format!("{} program loaded", self.kind));
        } else {
            info!("Session {}: {} compilation failed", session.id(), self.kind);
            session.log(format!("{} compilation failed", self.kind));
        }
        Ok(())
    }
}

/// Runs one engine cycle.
pub struct ExecuteCycle;

#[async_trait]
impl EventHandler for ExecuteCycle {
    async fn handle(&self, session: &Session, _payload: Option<Value>) -> Result<(), HandlerError> {
        let outcome = session.engine().step(session.connection().clone()).await?;
        if outcome == StepOutcome::Ignored {
            debug!("Session {}: cycle requested while halted", session.id());
        }
        Ok(())
    }
}

/// Leaves the halted state.
pub struct Resume;

#[async_trait]
impl EventHandler for Resume {
    async fn handle(&self, session: &Session, _payload: Option<Value>) -> Result<(), HandlerError> {
        if !session.engine().resume(session.connection().clone()).await? {
            debug!("Session {}: resume requested while running", session.id());
        }
        Ok(())
    }
}
