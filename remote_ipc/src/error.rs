//! Errors delivered to callers

use ipc::{RemoteError, TransportError};
use std::time::Duration;
use thiserror::Error;

/// Everything a call can end with besides completion
///
/// Calls never return these directly; they arrive through
/// [`CallObserver::error`](crate::CallObserver::error).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// Emitters or the shared listener could not be set up
    #[error("Failed to resolve \"{channel}\" channel's calls map: {reason}")]
    Resolution { channel: String, reason: String },

    /// No terminal response arrived in time
    #[error(
        "Invocation timeout of \"{name}\" method on \"{channel}\" channel with {}ms timeout",
        .timeout.as_millis()
    )]
    Timeout {
        name: String,
        channel: String,
        timeout: Duration,
    },

    /// The responder reported an error
    #[error("{0}")]
    Remote(RemoteError),

    /// The finish signal was rejected
    #[error("Call finished with error: {0}")]
    Finished(RemoteError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A value could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// The listener the call was waiting on was released
    #[error("Listener released while \"{name}\" call was pending")]
    Released { name: String },
}

impl CallError {
    /// Returns the peer's error for remote failures and rejected finishes
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            CallError::Remote(error) | CallError::Finished(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }
}
