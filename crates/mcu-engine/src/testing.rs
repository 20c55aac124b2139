//! Test doubles for the engine boundary.
//!
//! [`ScriptedEngine`] behaves like a tiny emulator whose cycle results are
//! scripted up front; it prints into a [`MemoryChannel`] the way the real
//! engine prints to stdout, and records every call in a [`CallLog`].

use std::collections::VecDeque;
use std::ffi::CStr;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::capture::{CaptureSession, OutputChannel};
use crate::engine::Engine;
use crate::error::CaptureError;
use crate::layout::RawState;

/// In-process output channel.
///
/// Text written while no capture session is open is discarded, like stdout
/// output nobody reads.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    buffer: Arc<Mutex<Option<String>>>,
    fail_finish: Arc<AtomicBool>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, text: &str) {
        if let Some(buffer) = self.buffer.lock().as_mut() {
            buffer.push_str(text);
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.buffer.lock().is_some()
    }

    /// Make the next session's teardown fail; its text is lost.
    pub fn fail_next_finish(&self) {
        self.fail_finish.store(true, Ordering::SeqCst);
    }
}

impl OutputChannel for MemoryChannel {
    fn open(&self) -> Result<Box<dyn CaptureSession + '_>, CaptureError> {
        *self.buffer.lock() = Some(String::new());
        Ok(Box::new(MemorySession {
            buffer: Arc::clone(&self.buffer),
            fail_finish: Arc::clone(&self.fail_finish),
        }))
    }
}

struct MemorySession {
    buffer: Arc<Mutex<Option<String>>>,
    fail_finish: Arc<AtomicBool>,
}

impl CaptureSession for MemorySession {
    fn finish(self: Box<Self>) -> Result<String, CaptureError> {
        let text = self.buffer.lock().take().unwrap_or_default();
        if self.fail_finish.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::Restore(io::Error::new(
                io::ErrorKind::Other,
                "stdout could not be restored",
            )));
        }
        Ok(text)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.buffer.lock().take();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Init,
    LoadAsm(String),
    LoadC(String),
    ExecuteCycle,
    Resume,
    StateCopy,
}

/// Shared record of the calls an engine received.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<EngineCall>>>,
}

impl CallLog {
    fn push(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<EngineCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }
}

/// Engine with scripted cycle results.
#[derive(Debug)]
pub struct ScriptedEngine {
    console: MemoryChannel,
    calls: CallLog,
    cycle_results: VecDeque<bool>,
    load_result: bool,
    cycle_delay: Option<Duration>,
    cycles: u16,
    pc: u16,
    stopped: bool,
}

impl ScriptedEngine {
    pub fn new(console: MemoryChannel) -> Self {
        Self {
            console,
            calls: CallLog::default(),
            cycle_results: VecDeque::new(),
            load_result: true,
            cycle_delay: None,
            cycles: 0,
            pc: 0,
            stopped: false,
        }
    }

    /// Results returned by successive `execute_cycle` calls. Once the
    /// script runs out every cycle keeps running.
    pub fn with_cycle_results(mut self, results: impl IntoIterator<Item = bool>) -> Self {
        self.cycle_results = results.into_iter().collect();
        self
    }

    pub fn with_load_result(mut self, accepted: bool) -> Self {
        self.load_result = accepted;
        self
    }

    /// Block every `execute_cycle` for `delay`, like a long-running program.
    pub fn with_cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    fn load(&mut self, call: EngineCall, language: &str) -> bool {
        self.calls.push(call);
        if !self.load_result {
            self.console
                .write(&format!("syntax error in {} program\n", language));
        }
        self.load_result
    }
}

impl Engine for ScriptedEngine {
    fn init(&mut self) {
        self.calls.push(EngineCall::Init);
        self.cycles = 0;
        self.pc = 0;
        self.stopped = false;
        self.console.write("MCU initialized\n");
    }

    fn load_asm(&mut self, source: &CStr) -> bool {
        let call = EngineCall::LoadAsm(source.to_string_lossy().into_owned());
        self.load(call, "assembly")
    }

    fn load_c(&mut self, source: &CStr) -> bool {
        let call = EngineCall::LoadC(source.to_string_lossy().into_owned());
        self.load(call, "C")
    }

    fn execute_cycle(&mut self) -> bool {
        self.calls.push(EngineCall::ExecuteCycle);
        if let Some(delay) = self.cycle_delay {
            std::thread::sleep(delay);
        }
        let running = self.cycle_results.pop_front().unwrap_or(true);
        if running {
            self.cycles = self.cycles.wrapping_add(1);
            self.pc = self.pc.wrapping_add(1);
        } else {
            self.stopped = true;
            self.console.write("BREAK\n");
        }
        running
    }

    fn resume(&mut self) {
        self.calls.push(EngineCall::Resume);
        self.stopped = false;
    }

    fn state_copy(&mut self, out: &mut RawState) {
        self.calls.push(EngineCall::StateCopy);
        out.sp = 0x0900;
        out.pc = self.pc;
        out.cycles = self.cycles;
        out.stopped = self.stopped;
        out.data_memory[0] = self.cycles as u8;
    }
}
