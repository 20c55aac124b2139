use std::io;
use std::path::PathBuf;

/// Errors raised while binding the engine library.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to load engine library {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("engine library is missing symbol `{name}`: {source}")]
    MissingSymbol {
        name: &'static str,
        #[source]
        source: libloading::Error,
    },
}

/// Errors raised by an output channel.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to redirect engine output: {0}")]
    Redirect(#[source] io::Error),
    #[error("failed to restore engine output: {0}")]
    Restore(#[source] io::Error),
    #[error("failed to read captured output: {0}")]
    Read(#[source] io::Error),
}

/// Errors raised by the execution controller.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("engine has not been initialized")]
    NotInitialized,
    #[error("program text contains a NUL byte at offset {0}")]
    InteriorNul(usize),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}
