//! Error types for rl-live.
//!
//! Every fallible operation returns [`Result`]. Errors raised on the background
//! refresh task have no synchronous caller and are delivered to an
//! [`ErrorCallback`] instead.

use thiserror::Error;

use crate::event::RankingResponse;

/// Coarse classification of a [`LiveModelError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Null/empty event id, context or outcome, or an unusable context.
    InvalidArgument,
    /// Degenerate action count or sampler failure.
    Exploration,
    /// Model bytes failed validation during refresh.
    ModelUpdate,
    /// The event sink rejected an append.
    Logging,
    /// Fetching model bytes failed.
    Transport,
    /// Configuration could not be extracted or named an unknown implementation.
    Config,
    /// The background refresh runtime could not be built.
    Runtime,
    /// An operation was attempted before `init`.
    NotInitialized,
    /// `init` was called twice.
    AlreadyInitialized,
}

impl ErrorKind {
    /// Stable numeric code, suitable for FFI or wire reporting.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidArgument => 1,
            ErrorKind::Exploration => 2,
            ErrorKind::ModelUpdate => 3,
            ErrorKind::Logging => 4,
            ErrorKind::Transport => 5,
            ErrorKind::Config => 6,
            ErrorKind::Runtime => 7,
            ErrorKind::NotInitialized => 8,
            ErrorKind::AlreadyInitialized => 9,
        }
    }
}

/// Errors that can occur when initializing or using a live model.
#[derive(Debug, Error)]
pub enum LiveModelError {
    /// An argument was null, empty or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Exploration could not produce a distribution or a draw.
    #[error("exploration error: {0}")]
    Exploration(String),

    /// New model bytes were rejected; the previous model stays active.
    #[error("model update failed: {0}")]
    ModelUpdate(String),

    /// The logger failed to accept an event.
    ///
    /// For decisions, the response computed before the append is preserved.
    #[error("logging failed: {message}")]
    Logging {
        message: String,
        response: Option<Box<RankingResponse>>,
    },

    /// The transport could not deliver model bytes.
    #[error("transport error: {0}")]
    Transport(String),

    /// Error extracting configuration from figment.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// No factory is registered under the configured name.
    #[error("unknown {kind} implementation: {name}")]
    UnknownImplementation { kind: &'static str, name: String },

    /// Error building the refresh runtime.
    #[error("failed to build refresh runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("live model is not initialized")]
    NotInitialized,

    #[error("live model is already initialized")]
    AlreadyInitialized,
}

impl LiveModelError {
    /// Build a logging error with no attached response.
    pub fn logging(message: impl Into<String>) -> Self {
        LiveModelError::Logging {
            message: message.into(),
            response: None,
        }
    }

    /// The coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LiveModelError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            LiveModelError::Exploration(_) => ErrorKind::Exploration,
            LiveModelError::ModelUpdate(_) => ErrorKind::ModelUpdate,
            LiveModelError::Logging { .. } => ErrorKind::Logging,
            LiveModelError::Transport(_) => ErrorKind::Transport,
            LiveModelError::Config(_) | LiveModelError::UnknownImplementation { .. } => {
                ErrorKind::Config
            }
            LiveModelError::Runtime(_) => ErrorKind::Runtime,
            LiveModelError::NotInitialized => ErrorKind::NotInitialized,
            LiveModelError::AlreadyInitialized => ErrorKind::AlreadyInitialized,
        }
    }

    /// Stable numeric code of the error kind.
    pub fn code(&self) -> i32 {
        self.kind().code()
    }

    /// The decision that was computed before a logging failure, if any.
    pub fn response(&self) -> Option<&RankingResponse> {
        match self {
            LiveModelError::Logging {
                response: Some(r), ..
            } => Some(r),
            _ => None,
        }
    }

    /// Consume the error and recover the computed decision, if any.
    pub fn into_response(self) -> Option<RankingResponse> {
        match self {
            LiveModelError::Logging {
                response: Some(r), ..
            } => Some(*r),
            _ => None,
        }
    }
}

/// Result type alias for rl-live operations.
pub type Result<T> = std::result::Result<T, LiveModelError>;

/// Sink for asynchronous failures that have no caller to return to.
///
/// Implemented for any `Fn(&LiveModelError) + Send + Sync` closure.
pub trait ErrorCallback: Send + Sync {
    fn report_error(&self, error: &LiveModelError);
}

impl<F> ErrorCallback for F
where
    F: Fn(&LiveModelError) + Send + Sync,
{
    fn report_error(&self, error: &LiveModelError) {
        self(error)
    }
}

/// Default callback: emit the error through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorCallback;

impl ErrorCallback for TracingErrorCallback {
    fn report_error(&self, error: &LiveModelError) {
        tracing::warn!(kind = ?error.kind(), code = error.code(), %error, "background error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_kind_and_code() {
        let err = LiveModelError::InvalidArgument("event id is empty".into());
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.code(), 1);

        let err = LiveModelError::UnknownImplementation {
            kind: "transport",
            name: "S3".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.to_string(), "unknown transport implementation: S3");
    }

    #[test]
    fn test_logging_error_keeps_response() {
        let mut response = RankingResponse::default();
        response.set_event_id("ev1");
        let err = LiveModelError::Logging {
            message: "queue full".into(),
            response: Some(Box::new(response)),
        };
        assert_eq!(err.response().map(|r| r.event_id()), Some("ev1"));
        let recovered = err.into_response().unwrap();
        assert_eq!(recovered.event_id(), "ev1");

        assert!(LiveModelError::logging("down").into_response().is_none());
    }

    #[test]
    fn test_closure_callback() {
        let count = AtomicUsize::new(0);
        let cb = |_: &LiveModelError| {
            count.fetch_add(1, Ordering::Relaxed);
        };
        cb.report_error(&LiveModelError::Transport("timeout".into()));
        cb.report_error(&LiveModelError::Transport("timeout".into()));
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}
