//! Execution controller
//!
//! Owns the engine and the run/halt state machine:
//!
//! ```text
//! Uninitialized --initialize--> Running --step (engine halts)--> Halted
//!                                  ^                               |
//!                                  +------------resume-------------+
//! ```
//!
//! Every engine call goes through [`OutputCapture`]; captured text is emitted
//! as [`ControllerEvent::Console`] before the call's result is acted upon.
//! When the capture cannot be torn down, the call's result is still applied
//! and the capture error is returned afterwards.

use std::ffi::CString;
use std::fmt;

use tracing::{debug, info, warn};

use crate::capture::OutputCapture;
use crate::engine::Engine;
use crate::error::{CaptureError, ControllerError};
use crate::layout::RawState;
use crate::snapshot::{self, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Uninitialized,
    Running,
    Halted,
}

/// Language of a program handed to [`ExecutionController::load_program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    Assembly,
    Source,
}

impl fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramKind::Assembly => f.write_str("assembly"),
            ProgramKind::Source => f.write_str("C"),
        }
    }
}

/// Notifications produced while driving the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Text the engine printed during a call.
    Console(String),
    Log(String),
    Stopped,
    Resumed,
    State(Snapshot),
}

/// Receives controller notifications in the order they happen.
pub trait EventSink {
    fn emit(&self, event: ControllerEvent);
}

impl<F> EventSink for F
where
    F: Fn(ControllerEvent),
{
    fn emit(&self, event: ControllerEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The cycle ran and the engine keeps going.
    Running,
    /// The engine signalled a halt during this cycle.
    Halted,
    /// The engine was already halted; nothing was executed.
    Ignored,
}

/// Drives one engine instance.
pub struct ExecutionController {
    engine: Box<dyn Engine>,
    capture: OutputCapture,
    state: RunState,
    raw: Box<RawState>,
}

impl ExecutionController {
    pub fn new(engine: impl Engine + 'static, capture: OutputCapture) -> Self {
        Self {
            engine: Box::new(engine),
            capture,
            state: RunState::Uninitialized,
            raw: RawState::zeroed(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Reset the engine and mark it running. Valid in every state.
    pub fn initialize(&mut self, sink: &dyn EventSink) -> Result<(), ControllerError> {
        let engine = &mut self.engine;
        let captured = self.capture.run(|| engine.init())?;
        let console = forward_console(sink, captured.text);
        self.state = RunState::Running;
        info!("Engine initialized");
        console?;
        Ok(())
    }

    /// Hand `source` to the engine's assembler or compiler.
    ///
    /// Returns the engine's verdict. The run/halt state is left unchanged.
    pub fn load_program(
        &mut self,
        source: &str,
        kind: ProgramKind,
        sink: &dyn EventSink,
    ) -> Result<bool, ControllerError> {
        self.ensure_initialized()?;
        let text = CString::new(source).map_err(|e| ControllerError::InteriorNul(e.nul_position()))?;

        let engine = &mut self.engine;
        let captured = self.capture.run(|| match kind {
            ProgramKind::Assembly => engine.load_asm(&text),
            ProgramKind::Source => engine.load_c(&text),
        })?;
        let console = forward_console(sink, captured.text);

        if captured.value {
            info!("Loaded {} program ({} bytes)", kind, source.len());
        } else {
            warn!("Engine rejected {} program", kind);
        }
        console?;
        Ok(captured.value)
    }

    /// Execute one cycle.
    ///
    /// While halted this returns [`StepOutcome::Ignored`] without calling the
    /// engine. A cycle that keeps the engine running is followed by a fresh
    /// state copy, emitted as [`ControllerEvent::State`].
    pub fn step(&mut self, sink: &dyn EventSink) -> Result<StepOutcome, ControllerError> {
        match self.state {
            RunState::Uninitialized => return Err(ControllerError::NotInitialized),
            RunState::Halted => {
                debug!("Step ignored, engine is halted");
                return Ok(StepOutcome::Ignored);
            }
            RunState::Running => {}
        }

        let engine = &mut self.engine;
        let captured = self.capture.run(|| engine.execute_cycle())?;
        let console = forward_console(sink, captured.text);

        if !captured.value {
            self.state = RunState::Halted;
            info!("Engine halted");
            sink.emit(ControllerEvent::Stopped);
            sink.emit(ControllerEvent::Log("MCU stopped".to_string()));
            console?;
            return Ok(StepOutcome::Halted);
        }
        console?;

        let snapshot = self.snapshot(sink)?;
        debug!(pc = snapshot.pc, cycles = snapshot.cycles, "Cycle executed");
        sink.emit(ControllerEvent::State(snapshot));
        Ok(StepOutcome::Running)
    }

    /// Leave the halted state. Returns `false` when the engine was not halted.
    pub fn resume(&mut self, sink: &dyn EventSink) -> Result<bool, ControllerError> {
        match self.state {
            RunState::Uninitialized => return Err(ControllerError::NotInitialized),
            RunState::Running => {
                debug!("Resume ignored, engine is running");
                return Ok(false);
            }
            RunState::Halted => {}
        }

        let engine = &mut self.engine;
        let captured = self.capture.run(|| engine.resume())?;
        let console = forward_console(sink, captured.text);

        self.state = RunState::Running;
        info!("Engine resumed");
        sink.emit(ControllerEvent::Resumed);
        console?;
        Ok(true)
    }

    fn snapshot(&mut self, sink: &dyn EventSink) -> Result<Snapshot, ControllerError> {
        let engine = &mut self.engine;
        let raw = &mut *self.raw;
        let captured = self.capture.run(|| engine.state_copy(raw))?;
        forward_console(sink, captured.text)?;
        Ok(snapshot::serialize(&self.raw))
    }

    fn ensure_initialized(&self) -> Result<(), ControllerError> {
        if self.state == RunState::Uninitialized {
            return Err(ControllerError::NotInitialized);
        }
        Ok(())
    }
}

impl fmt::Debug for ExecutionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionController")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Emit captured text as a console event, or hand back the teardown failure.
///
/// Callers apply the call's state change before raising the error.
fn forward_console(
    sink: &dyn EventSink,
    text: Result<String, CaptureError>,
) -> Result<(), CaptureError> {
    let text = text?;
    if !text.is_empty() {
        sink.emit(ControllerEvent::Console(text));
    }
    Ok(())
}
