//! Output capture around engine calls
//!
//! The engine reports progress by printing. Each call is wrapped in a capture
//! session that routes that text into a buffer for the duration of the call
//! and hands it back afterwards. A session restores the channel when it is
//! finished or dropped, so a panicking call never leaves output redirected.

use std::sync::Arc;

use crate::error::CaptureError;

/// Somewhere the engine writes text to.
pub trait OutputChannel: Send + Sync {
    /// Start routing engine output into a fresh buffer.
    fn open(&self) -> Result<Box<dyn CaptureSession + '_>, CaptureError>;
}

/// An open redirection. Dropping it restores the channel and discards the text.
pub trait CaptureSession {
    /// Restore the channel and return everything written since `open`.
    fn finish(self: Box<Self>) -> Result<String, CaptureError>;
}

/// Result of a captured call.
///
/// `value` is always present once the call ran; `text` fails on its own when
/// the channel could not be restored or read back.
#[derive(Debug)]
pub struct Captured<T> {
    pub value: T,
    pub text: Result<String, CaptureError>,
}

/// Runs engine calls under capture.
#[derive(Clone)]
pub struct OutputCapture {
    channel: Arc<dyn OutputChannel>,
}

impl OutputCapture {
    pub fn new(channel: Arc<dyn OutputChannel>) -> Self {
        Self { channel }
    }

    /// Run `call` with engine output redirected into a buffer.
    ///
    /// `call` is not invoked when the redirection cannot be set up.
    pub fn run<T>(&self, call: impl FnOnce() -> T) -> Result<Captured<T>, CaptureError> {
        let session = self.channel.open()?;
        let value = call();
        let text = session.finish();
        Ok(Captured { value, text })
    }
}

impl std::fmt::Debug for OutputCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputCapture").finish_non_exhaustive()
    }
}

#[cfg(unix)]
pub use stdout::StdoutChannel;

#[cfg(unix)]
mod stdout {
    use std::fs::File;
    use std::io::{self, Read, Seek, SeekFrom, Write};
    use std::os::unix::io::{AsRawFd, RawFd};

    use parking_lot::{Mutex, MutexGuard};
    use tracing::error;

    use super::{CaptureSession, OutputChannel};
    use crate::error::CaptureError;

    /// Captures everything written to file descriptor 1.
    ///
    /// The descriptor is pointed at an anonymous temporary file while a
    /// session is open, so output of any size can be taken without a reader
    /// thread. Stdout is process-wide; only one session exists at a time.
    #[derive(Debug, Default)]
    pub struct StdoutChannel {
        lock: Mutex<()>,
    }

    impl StdoutChannel {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl OutputChannel for StdoutChannel {
        fn open(&self) -> Result<Box<dyn CaptureSession + '_>, CaptureError> {
            let guard = self.lock.lock();
            let file = tempfile::tempfile().map_err(CaptureError::Redirect)?;
            flush_stdout();

            // SAFETY: plain descriptor syscalls on descriptors we own.
            let saved = unsafe { libc::dup(libc::STDOUT_FILENO) };
            if saved < 0 {
                return Err(CaptureError::Redirect(io::Error::last_os_error()));
            }
            if unsafe { libc::dup2(file.as_raw_fd(), libc::STDOUT_FILENO) } < 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(saved) };
                return Err(CaptureError::Redirect(err));
            }

            Ok(Box::new(StdoutSession {
                saved: Some(saved),
                file,
                _guard: guard,
            }))
        }
    }

    struct StdoutSession<'a> {
        saved: Option<RawFd>,
        file: File,
        _guard: MutexGuard<'a, ()>,
    }

    impl StdoutSession<'_> {
        fn restore(&mut self) -> io::Result<()> {
            let Some(saved) = self.saved.take() else {
                return Ok(());
            };
            flush_stdout();
            // SAFETY: `saved` is the duplicate taken in `open` and is closed exactly once.
            let rc = unsafe { libc::dup2(saved, libc::STDOUT_FILENO) };
            let err = (rc < 0).then(io::Error::last_os_error);
            unsafe { libc::close(saved) };
            match err {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    impl CaptureSession for StdoutSession<'_> {
        fn finish(mut self: Box<Self>) -> Result<String, CaptureError> {
            self.restore().map_err(CaptureError::Restore)?;
            let mut bytes = Vec::new();
            self.file
                .seek(SeekFrom::Start(0))
                .and_then(|_| self.file.read_to_end(&mut bytes))
                .map_err(CaptureError::Read)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }

    impl Drop for StdoutSession<'_> {
        fn drop(&mut self) {
            if let Err(e) = self.restore() {
                error!("Failed to restore stdout after engine call: {}", e);
            }
        }
    }

    /// Push out anything buffered by Rust or C stdio before the descriptor moves.
    fn flush_stdout() {
        let _ = io::stdout().flush();
        // SAFETY: fflush(NULL) flushes every open C output stream.
        unsafe { libc::fflush(std::ptr::null_mut()) };
    }
}
