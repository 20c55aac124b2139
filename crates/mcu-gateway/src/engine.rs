//! Async access to the execution controller
//!
//! Engine calls block for as long as the emulator needs, so they run on the
//! blocking pool. The controller sits behind a mutex: calls are serialized and
//! a handler's call finishes before the next message is read.

use std::sync::Arc;
use std::time::Duration;

use mcu_engine::{ExecutionController, ProgramKind, RunState, StepOutcome};
use parking_lot::Mutex;
use tracing::warn;

use crate::connection::ConnectionHandle;
use crate::router::HandlerError;

/// Shared, serialized handle to the process-wide controller.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    controller: Arc<Mutex<ExecutionController>>,
    slow_call: Duration,
}

impl EngineHandle {
    /// `slow_call` is how long a call may run before a warning is logged.
    /// The call is never abandoned.
    pub fn new(controller: ExecutionController, slow_call: Duration) -> Self {
        Self {
            controller: Arc::new(Mutex::new(controller)),
            slow_call,
        }
    }

    /// Current run state, or `None` while an engine call holds the controller.
    pub fn run_state(&self) -> Option<RunState> {
        self.controller.try_lock().map(|controller| controller.state())
    }

    pub async fn initialize(&self, sink: ConnectionHandle) -> Result<(), HandlerError> {
        self.call("init", move |controller| controller.initialize(&sink))
            .await
    }

    pub async fn load_program(
        &self,
        source: String,
        kind: ProgramKind,
        sink: ConnectionHandle,
    ) -> Result<bool, HandlerError> {
        self.call("load program", move |controller| {
            controller.load_program(&source, kind, &sink)
        })
        .await
    }

    pub async fn step(&self, sink: ConnectionHandle) -> Result<StepOutcome, HandlerError> {
        self.call("execute cycle", move |controller| controller.step(&sink))
            .await
    }

    pub async fn resume(&self, sink: ConnectionHandle) -> Result<bool, HandlerError> {
        self.call("resume", move |controller| controller.resume(&sink))
            .await
    }

    async fn call<T, F>(&self, name: &'static str, f: F) -> Result<T, HandlerError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ExecutionController) -> Result<T, mcu_engine::ControllerError>
            + Send
            + 'static,
    {
        let controller = Arc::clone(&self.controller);
        let mut task = tokio::task::spawn_blocking(move || {
            let mut controller = controller.lock();
            f(&mut controller)
        });

        let joined = match tokio::time::timeout(self.slow_call, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    "Engine call '{}' still running after {}ms",
                    name,
                    self.slow_call.as_millis()
                );
                task.await
            }
        };

        let result = joined.map_err(|e| HandlerError::EngineTask(e.to_string()))?;
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcu_engine::testing::{EngineCall, MemoryChannel, ScriptedEngine};
    use mcu_engine::OutputCapture;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    fn sink() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr = "127.0.0.1:4001".parse().unwrap();
        (ConnectionHandle::new("engine-test".to_string(), addr, tx), rx)
    }

    fn texts(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            out.push(text);
        }
        out
    }

    fn handle(engine: ScriptedEngine, channel: MemoryChannel, slow_call: Duration) -> EngineHandle {
        let controller = ExecutionController::new(engine, OutputCapture::new(Arc::new(channel)));
        EngineHandle::new(controller, slow_call)
    }

    #[tokio::test]
    async fn test_initialize_then_step() {
        let channel = MemoryChannel::new();
        let engine = ScriptedEngine::new(channel.clone());
        let calls = engine.calls();
        let handle = handle(engine, channel, Duration::from_secs(1));
        let (conn, mut rx) = sink();

        assert_eq!(handle.run_state(), Some(RunState::Uninitialized));
        handle.initialize(conn.clone()).await.unwrap();
        assert_eq!(handle.run_state(), Some(RunState::Running));

        let outcome = handle.step(conn).await.unwrap();
        assert_eq!(outcome, StepOutcome::Running);
        assert_eq!(calls.count(&EngineCall::ExecuteCycle), 1);

        let frames = texts(&mut rx);
        assert_eq!(frames[0], r#"{"event":"console","data":"MCU initialized\n"}"#);
        assert!(frames[1].starts_with(r#"{"event":"mcu state""#));
    }

    #[tokio::test]
    async fn test_controller_error_surfaces() {
        let channel = MemoryChannel::new();
        let handle = handle(ScriptedEngine::new(channel.clone()), channel, Duration::from_secs(1));
        let (conn, _rx) = sink();

        let err = handle.step(conn).await.unwrap_err();
        assert!(matches!(err, HandlerError::Controller(_)));
    }

    #[tokio::test]
    async fn test_slow_call_completes() {
        let channel = MemoryChannel::new();
        let handle = handle(ScriptedEngine::new(channel.clone()), channel, Duration::from_nanos(1));
        let (conn, _rx) = sink();

        handle.initialize(conn.clone()).await.unwrap();
        assert!(handle
            .load_program("NOP".to_string(), ProgramKind::Assembly, conn)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_run_state_does_not_wait_for_running_call() {
        let channel = MemoryChannel::new();
        let engine = ScriptedEngine::new(channel.clone()).with_cycle_delay(Duration::from_millis(300));
        let handle = handle(engine, channel, Duration::from_secs(1));
        let (conn, _rx) = sink();
        handle.initialize(conn.clone()).await.unwrap();

        let stepping = tokio::spawn({
            let handle = handle.clone();
            async move { handle.step(conn).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(handle.run_state(), None);
        assert_eq!(stepping.await.unwrap().unwrap(), StepOutcome::Running);
        assert_eq!(handle.run_state(), Some(RunState::Running));
    }
}
