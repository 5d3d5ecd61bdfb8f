// packages/pool/src/utils/errors.rs
//! Error types for the worker pool
//!
//! Every failure surfaces to the caller through the task handle; nothing is
//! retried automatically. Remote errors arrive as wire records and are mapped
//! back onto this taxonomy where the record names a known kind.

use crate::protocol::ErrorObject;
use thiserror::Error;

/// Convenience result type used across the crate.
pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Debug, Error)]
pub enum PoolError {
    /// The request named a method the worker does not have registered.
    #[error("unknown method \"{0}\"")]
    UnknownMethod(String),

    /// The user's method failed; the original error record is carried along.
    #[error("worker error: {0}")]
    Remote(ErrorObject),

    /// The worker exited (crash, forced kill, or terminate) while the task
    /// was in flight.
    #[error("worker terminated: {0}")]
    WorkerTerminated(String),

    /// The caller cancelled the task.
    #[error("task cancelled")]
    Cancelled,

    /// The caller's deadline elapsed before the task settled.
    #[error("task timed out")]
    TimedOut,

    /// The pool has been shut down; no further tasks are accepted.
    #[error("pool is terminated")]
    PoolTerminated,

    /// Invalid pool or worker configuration.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Transport-level I/O failure (spawn, pipe, or channel).
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Wire encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ErrorObject {
    /// Re-inflate a wire error record into the caller-facing taxonomy.
    pub fn into_pool_error(self) -> PoolError {
        match self.name.as_str() {
            "UnknownMethodError" => {
                // The record's message reads `Unknown method "name"`; recover
                // the bare name when it parses, otherwise keep the message.
                let method = self
                    .message
                    .split('"')
                    .nth(1)
                    .unwrap_or(self.message.as_str())
                    .to_string();
                PoolError::UnknownMethod(method)
            }
            _ => PoolError::Remote(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_method_record_maps_to_variant() {
        let err = ErrorObject::unknown_method("frobnicate").into_pool_error();
        match err {
            PoolError::UnknownMethod(name) => assert_eq!(name, "frobnicate"),
            other => panic!("expected UnknownMethod, got {other:?}"),
        }
    }

    #[test]
    fn test_user_error_record_stays_remote() {
        let record = ErrorObject::new("TypeError", "x is not a number");
        match record.clone().into_pool_error() {
            PoolError::Remote(back) => assert_eq!(back, record),
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[test]
    fn test_display_is_readable() {
        let err = PoolError::Remote(ErrorObject::new("TypeError", "boom"));
        assert_eq!(err.to_string(), "worker error: TypeError: boom");
    }
}
