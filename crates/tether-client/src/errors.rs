//! Client error types.

use tether_core::{ResourceError, TransportError};
use thiserror::Error;

/// Failures surfaced by [`NetClient`](crate::NetClient).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The host name did not resolve.
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        /// `host:port` that was looked up.
        addr: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// No resolved address accepted the connection.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// `host:port` that was dialled.
        addr: String,
        /// Last failure seen.
        #[source]
        source: std::io::Error,
    },

    /// The server sent nothing during the handshake.
    #[error("the server did not answer the handshake")]
    ServerSilent,

    /// The server's first message did not ask for an identity.
    #[error("the server opened with '{event}' instead of asking who we are")]
    Unprompted {
        /// Event id of the server's first message.
        event: String,
    },

    /// The server refused the session.
    #[error("the server sent '{event}': {reason}")]
    Rejected {
        /// `rejected` or `disallowed`.
        event: String,
        /// Reason given by the server, empty when absent.
        reason: String,
    },

    /// `start` was called before `set_local_identity`.
    #[error("no local identity has been set")]
    MissingIdentity,

    /// `start` was called while a session is active.
    #[error("the client is already connected")]
    AlreadyConnected,

    /// An operation needs an active session.
    #[error("the client is not connected")]
    NotConnected,

    /// Resource text did not compile.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// The connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ClientError {
    /// Misuse of the API rather than a runtime condition. Never softened by
    /// the release build mode.
    pub fn is_invariant(&self) -> bool {
        matches!(
            self,
            Self::MissingIdentity | Self::AlreadyConnected | Self::NotConnected
        )
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
