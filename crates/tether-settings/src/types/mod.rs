//! Settings types.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a
//! partial JSON file fills the rest from compiled defaults.

pub mod session;

pub use session::{ClientSettings, ServerSettings};

use serde::{Deserialize, Serialize};
use tether_core::BuildMode;

use crate::errors::{Result, SettingsError};
use crate::loader::SOCKET_TIMEOUT_SECS;

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Failure policy: `debug` surfaces errors, `release` logs and degrades.
    pub mode: BuildMode,
    /// Where the server binds and the client connects.
    pub connection: ConnectionDetails,
    /// Server session engine.
    pub server: ServerSettings,
    /// Client session engine.
    pub client: ClientSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TetherSettings {
    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.connection.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "connection.host must not be empty".into(),
            ));
        }
        if self.server.max_frame_bytes == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxFrameBytes must be positive".into(),
            ));
        }
        if self.server.inbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "server.inboundBuffer must be positive".into(),
            ));
        }
        let socket_timeout = self.client.socket_timeout_secs;
        if let Some(secs) = socket_timeout.filter(|s| !SOCKET_TIMEOUT_SECS.contains(s)) {
            return Err(SettingsError::InvalidValue(format!(
                "client.socketTimeoutSecs must be within {}..={}, got {secs}",
                SOCKET_TIMEOUT_SECS.start(),
                SOCKET_TIMEOUT_SECS.end()
            )));
        }
        Ok(())
    }
}

/// Host and port pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionDetails {
    /// Host name or address.
    pub host: String,
    /// TCP port. `0` binds an ephemeral port on the server.
    pub port: u16,
}

impl Default for ConnectionDetails {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1337,
        }
    }
}

impl ConnectionDetails {
    /// `host:port` form accepted by socket APIs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Also write logs to this file, truncated on start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_path: None,
        }
    }
}
