//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::BuildMode;
use tether_settings::TetherSettings;

/// Configuration for the tether server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"localhost"`).
    pub host: String,
    /// Port to bind (default `1337`, `0` for auto-assign).
    pub port: u16,
    /// Failure policy for grammar errors.
    pub mode: BuildMode,
    /// Accept several sessions with the same identity id.
    pub allow_multiple_sessions: bool,
    /// How long a new peer has to answer `connecting`, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// How long `request_to` waits for an answer, in milliseconds.
    pub response_timeout_ms: u64,
    /// Largest accepted frame in bytes.
    pub max_frame_bytes: usize,
    /// Capacity of the inbound feed behind `wait_for_message`.
    pub inbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&TetherSettings::default())
    }
}

impl ServerConfig {
    /// Server view of the loaded settings.
    pub fn from_settings(settings: &TetherSettings) -> Self {
        Self {
            host: settings.connection.host.clone(),
            port: settings.connection.port,
            mode: settings.mode,
            allow_multiple_sessions: settings.server.allow_multiple_sessions,
            handshake_timeout_ms: settings.server.handshake_timeout_ms,
            response_timeout_ms: settings.server.response_timeout_ms,
            max_frame_bytes: settings.server.max_frame_bytes,
            inbound_buffer: settings.server.inbound_buffer,
        }
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Handshake bound as a duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Response bound as a duration.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}
