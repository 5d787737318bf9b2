//! Server and client session settings.

use serde::{Deserialize, Serialize};

/// Server-side session engine settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Accept several sessions carrying the same identity id.
    pub allow_multiple_sessions: bool,
    /// How long a new peer has to answer `connecting`, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// How long addressed sends wait for an answer when one is requested.
    pub response_timeout_ms: u64,
    /// Largest accepted frame, in bytes.
    pub max_frame_bytes: usize,
    /// Capacity of the inbound message feed used by `wait_for_message`.
    pub inbound_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            allow_multiple_sessions: false,
            handshake_timeout_ms: 2_000,
            response_timeout_ms: 2_000,
            max_frame_bytes: 1024 * 1024,
            inbound_buffer: 64,
        }
    }
}

/// Client-side session engine settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Bound on each handshake read, in seconds. `None` waits forever.
    pub socket_timeout_secs: Option<u64>,
    /// Bound on establishing the TCP connection, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            socket_timeout_secs: Some(5),
            connect_timeout_ms: 5_000,
        }
    }
}
