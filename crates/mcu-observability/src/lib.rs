//! MCU Gateway observability
//!
//! Installs the process-wide `tracing` subscriber. Log output goes to stderr:
//! stdout belongs to the emulator engine and is captured around every call.

#![warn(missing_docs)]

pub mod error;
pub mod logging;

pub use error::{ObservabilityError, Result};
pub use logging::LogManager;
