//! Observability errors

/// Errors raised while setting up logging
#[derive(Debug, thiserror::Error, Clone)]
pub enum ObservabilityError {
    /// Invalid level or filter directive
    #[error("Configuration error: {message}")]
    Config {
        /// What was rejected
        message: String,
    },

    /// The subscriber could not be installed or updated
    #[error("Logging error: {message}")]
    Logging {
        /// What failed
        message: String,
    },
}

impl ObservabilityError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a logging error
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    /// Error category, for structured log fields
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Logging { .. } => "logging",
        }
    }
}

/// Result alias for this crate
pub type Result<T> = std::result::Result<T, ObservabilityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_and_category() {
        let err = ObservabilityError::config("bad directive");
        assert_eq!(err.to_string(), "Configuration error: bad directive");
        assert_eq!(err.category(), "config");
        assert_eq!(ObservabilityError::logging("x").category(), "logging");
    }
}
