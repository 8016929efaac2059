//! Daemon error types for the vigil background service.
//!
//! This module provides structured errors for daemon operations,
//! with HTTP status code mappings for API responses.

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Daemon errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Process not found.
    #[error("process not found: {name}")]
    ProcessNotFound { name: String },

    /// Process already running.
    #[error("process already running: {name}")]
    ProcessAlreadyRunning { name: String },

    /// Process failed to start.
    #[error("failed to start process '{name}': {reason}")]
    ProcessStartFailed { name: String, reason: String },

    /// Process failed to stop.
    #[error("failed to stop process '{name}': {reason}")]
    ProcessStopFailed { name: String, reason: String },

    /// Descriptor error.
    #[error("descriptor error: {0}")]
    Spec(String),

    /// IO error with context.
    #[error("IO error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// State store error.
    #[error("state store error: {0}")]
    State(String),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a process not found error.
    pub fn process_not_found(name: impl Into<String>) -> Self {
        Self::ProcessNotFound { name: name.into() }
    }

    /// Create a process already running error.
    pub fn process_already_running(name: impl Into<String>) -> Self {
        Self::ProcessAlreadyRunning { name: name.into() }
    }

    /// Create a process start failed error.
    pub fn process_start_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessStartFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a process stop failed error.
    pub fn process_stop_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessStopFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::ProcessNotFound { .. } => 404,
            Self::ProcessAlreadyRunning { .. } => 409,
            Self::InvalidRequest(_) => 400,
            Self::Spec(_) => 422,
            Self::ProcessStartFailed { .. }
            | Self::ProcessStopFailed { .. }
            | Self::Io { .. }
            | Self::State(_)
            | Self::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::process_not_found("api").status_code(), 404);
        assert_eq!(Error::process_already_running("api").status_code(), 409);
        assert_eq!(Error::InvalidRequest("bad".into()).status_code(), 400);
        assert_eq!(Error::Spec("bad".into()).status_code(), 422);
        assert_eq!(
            Error::process_start_failed("api", "spawn failed").status_code(),
            500
        );
    }

    #[test]
    fn test_display_includes_name() {
        let err = Error::process_stop_failed("api", "no such pid");
        assert!(err.to_string().contains("api"));
        assert!(err.to_string().contains("no such pid"));
    }
}
