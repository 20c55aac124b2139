//! Engine call contract

use std::ffi::CStr;

use crate::layout::RawState;

/// The operations the emulator exposes.
///
/// Implementations hold process-wide engine state and are not reentrant;
/// callers must never run two calls at the same time.
pub trait Engine: Send {
    /// Reset the engine to its power-on state.
    fn init(&mut self);

    /// Assemble `source` into program memory. Returns `false` on rejection.
    fn load_asm(&mut self, source: &CStr) -> bool;

    /// Compile high-level `source` into program memory. Returns `false` on rejection.
    fn load_c(&mut self, source: &CStr) -> bool;

    /// Execute one instruction. Returns `false` once the engine has halted.
    fn execute_cycle(&mut self) -> bool;

    /// Leave the halted state.
    fn resume(&mut self);

    /// Copy the complete engine state into `out`.
    fn state_copy(&mut self, out: &mut RawState);
}
