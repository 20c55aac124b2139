//! MCU engine control
//!
//! Binds the external ATmega328p emulator library and drives it one call at a
//! time: every call runs under an output capture, the run/halt state is
//! tracked by [`ExecutionController`], and the engine's raw state block is
//! translated into a [`Snapshot`] document after each executed cycle.

mod capture;
mod controller;
mod engine;
mod error;
mod ffi;
pub mod layout;
mod snapshot;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use capture::{CaptureSession, Captured, OutputCapture, OutputChannel};
#[cfg(unix)]
pub use capture::StdoutChannel;
pub use controller::{
    ControllerEvent, EventSink, ExecutionController, ProgramKind, RunState, StepOutcome,
};
pub use engine::Engine;
pub use error::{CaptureError, ControllerError, EngineError};
pub use ffi::LibraryEngine;
pub use layout::{RawState, RegionOffsets};
pub use snapshot::{serialize, Snapshot};
