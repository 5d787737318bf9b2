//! Server error types.

use thiserror::Error;
use tether_core::{ResourceError, TransportError};

/// Failures surfaced by [`NetServer`](crate::NetServer).
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// An operation needs a running server.
    #[error("the server has not been started")]
    NotStarted,

    /// `start` was called on a running server.
    #[error("the server is already running")]
    AlreadyStarted,

    /// `start` was called after `shutdown`.
    #[error("the server has been shut down")]
    Stopped,

    /// A connection failed while sending.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Resource text did not compile.
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_address() {
        let err = ServerError::Bind {
            addr: "localhost:1337".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        let text = err.to_string();
        assert!(text.contains("localhost:1337"));
        assert!(text.contains("in use"));
    }

    #[test]
    fn transport_is_transparent() {
        let err: ServerError = TransportError::Closed.into();
        assert_eq!(err.to_string(), TransportError::Closed.to_string());
    }

    #[test]
    fn not_started_display() {
        assert_eq!(
            ServerError::NotStarted.to_string(),
            "the server has not been started"
        );
    }
}
