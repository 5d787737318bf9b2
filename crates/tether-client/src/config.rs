//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::BuildMode;
use tether_settings::TetherSettings;

/// Configuration for the tether client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Host used by `start_from_settings`.
    pub host: String,
    /// Port used by `start_from_settings`.
    pub port: u16,
    /// Failure policy for connect and grammar errors.
    pub mode: BuildMode,
    /// Bound on handshake reads and on `request`. `None` waits forever.
    pub socket_timeout: Option<Duration>,
    /// Bound on establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Largest accepted frame in bytes, matching the server's limit.
    pub max_frame_bytes: usize,
    /// Capacity of the inbound feed behind `wait_for_message`.
    pub inbound_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_settings(&TetherSettings::default())
    }
}

impl ClientConfig {
    /// Client view of the loaded settings.
    pub fn from_settings(settings: &TetherSettings) -> Self {
        Self {
            host: settings.connection.host.clone(),
            port: settings.connection.port,
            mode: settings.mode,
            socket_timeout: settings.client.socket_timeout_secs.map(Duration::from_secs),
            connect_timeout: Duration::from_millis(settings.client.connect_timeout_ms),
            max_frame_bytes: settings.server.max_frame_bytes,
            inbound_buffer: settings.server.inbound_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 1337);
        assert_eq!(cfg.socket_timeout, Some(Duration::from_secs(5)));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn unbounded_socket_timeout() {
        let mut settings = TetherSettings::default();
        settings.client.socket_timeout_secs = None;
        settings.mode = BuildMode::Release;
        let cfg = ClientConfig::from_settings(&settings);
        assert!(cfg.socket_timeout.is_none());
        assert_eq!(cfg.mode, BuildMode::Release);
    }
}
