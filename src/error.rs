//! Error types for the PACE engine.
//!
//! `PaceError` is the single error type surfaced by descriptors, batches and
//! engines. It is `Clone` because a failed request in the future-based engine
//! may be observed by several coalesced waiters at once; transport failures
//! are therefore held behind an `Arc`.
//!
//! ## Error Hierarchy
//!
//! - **`NotReadable`** / **`NotWritable`**: a descriptor was invoked against its
//!   declared capability. Programmer error, never retried.
//! - **`Decode`**: a reply payload does not match the shape a codec expects.
//! - **`BatchReplyMismatch`**: the fragment count of a batch reply does not
//!   match the number of pending requests. The whole batch is discarded.
//! - **`BatchAlreadyOpen`**: a second batching scope was opened on a device.
//! - **`Nack`**: the device rejected a request with the `NACK` sentinel.
//! - **`Device`**: a write was acknowledged through `:SYST:ERR?` with a
//!   non-zero error code.
//! - **`Transport`**: opaque connection failure, propagated unchanged.

use std::sync::Arc;
use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type PaceResult<T> = std::result::Result<T, PaceError>;

#[derive(Error, Debug, Clone)]
pub enum PaceError {
    #[error("Attribute '{0}' is not readable")]
    NotReadable(String),

    #[error("Attribute '{0}' is not writable")]
    NotWritable(String),

    #[error("Cannot decode {expected} from reply '{payload}'")]
    Decode {
        expected: &'static str,
        payload: String,
    },

    #[error("Batch reply mismatch: expected {expected} fragments, received {received}")]
    BatchReplyMismatch { expected: usize, received: usize },

    #[error("A batch is already open on this device")]
    BatchAlreadyOpen,

    #[error("Device rejected request '{request}' (NACK)")]
    Nack { request: String },

    #[error("Device error {code}: {message}")]
    Device { code: i64, message: String },

    #[error("Transport error: {0:#}")]
    Transport(Arc<anyhow::Error>),

    #[error("Unknown module {0}")]
    UnknownModule(u8),

    #[error("Command template '{0}' requires a module id")]
    ModuleRequired(String),

    #[error("Unknown attribute '{0}'")]
    UnknownAttribute(String),

    #[error("Value {value} does not fit attribute type {expected}")]
    TypeMismatch {
        expected: &'static str,
        value: String,
    },

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PaceError {
    /// Wrap a transport-level failure.
    pub fn transport(error: anyhow::Error) -> Self {
        Self::Transport(Arc::new(error))
    }

    pub(crate) fn decode(expected: &'static str, payload: &str) -> Self {
        Self::Decode {
            expected,
            payload: payload.to_string(),
        }
    }

    /// Whether this error was raised by the connection rather than by the
    /// protocol or the caller.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<tokio::task::JoinError> for PaceError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Task(error.to_string())
    }
}

impl From<figment::Error> for PaceError {
    fn from(error: figment::Error) -> Self {
        Self::Config(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_is_shared_between_clones() {
        let error = PaceError::transport(anyhow::anyhow!("connection reset"));
        let clone = error.clone();

        assert!(clone.is_transport());
        assert_eq!(error.to_string(), clone.to_string());
        assert!(error.to_string().contains("connection reset"));
    }

    #[test]
    fn test_device_error_message() {
        let error = PaceError::Device {
            code: -113,
            message: "Undefined header".to_string(),
        };
        assert_eq!(error.to_string(), "Device error -113: Undefined header");
        assert!(!error.is_transport());
    }
}
