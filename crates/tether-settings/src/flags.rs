//! Named configuration flags scoped to the server, the client, or both.
//!
//! Flags are an alternative to the JSON file for embedding applications that
//! configure tether programmatically. They are folded into
//! [`TetherSettings`] by [`TetherSettings::apply_flags`]; the session engines
//! never read a flag store directly.
//!
//! Recognized flags:
//!
//! | identifier              | scope  | options            |
//! |-------------------------|--------|--------------------|
//! | `allowMultipleSessions` | server | none               |
//! | `debug` / `release`     | server | none               |
//! | `logPath`               | server | exactly one path   |
//! | `connection_details`    | either | host, port         |
//! | `socketTimeout`         | client | one integer, 1..=3600 |

use serde::{Deserialize, Serialize};
use tether_core::BuildMode;
use tracing::{info, warn};

use crate::errors::{Result, SettingsError};
use crate::loader::{SOCKET_TIMEOUT_SECS, parse_socket_timeout};
use crate::types::TetherSettings;

/// Flag that allows several sessions with the same identity id.
pub const ALLOW_MULTIPLE_SESSIONS: &str = "allowMultipleSessions";
/// Flag selecting the development failure policy.
pub const DEBUG: &str = "debug";
/// Flag selecting the deployment failure policy.
pub const RELEASE: &str = "release";
/// Flag naming the log file.
pub const LOG_PATH: &str = "logPath";
/// Flag carrying `[host, port]`.
pub const CONNECTION_DETAILS: &str = "connection_details";
/// Flag carrying the client handshake read bound in seconds.
pub const SOCKET_TIMEOUT: &str = "socketTimeout";

/// Which engine a flag applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigTarget {
    /// Server only.
    Server,
    /// Client only.
    Client,
    /// Both server and client.
    Global,
}

/// A named flag with optional string options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFlag {
    /// Flag name.
    pub identifier: String,
    /// Positional options.
    #[serde(default)]
    pub options: Vec<String>,
}

impl ConfigFlag {
    /// Flag without options.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            options: Vec::new(),
        }
    }

    /// Flag with options.
    pub fn with_options<I, S>(identifier: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifier: identifier.into(),
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    /// Append an option.
    pub fn add_option(&mut self, option: impl Into<String>) {
        self.options.push(option.into());
    }
}

/// Server and client flag lists.
#[derive(Clone, Debug, Default)]
pub struct FlagStore {
    server: Vec<ConfigFlag>,
    client: Vec<ConfigFlag>,
}

impl FlagStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a flag. `Global` adds it to both scopes.
    pub fn set_flag(&mut self, target: ConfigTarget, flag: ConfigFlag) {
        info!(
            ?target,
            identifier = %flag.identifier,
            options = flag.options.len(),
            "loading flag"
        );
        match target {
            ConfigTarget::Server => self.server.push(flag),
            ConfigTarget::Client => self.client.push(flag),
            ConfigTarget::Global => {
                self.client.push(flag.clone());
                self.server.push(flag);
            }
        }
    }

    /// Add several flags to the same target.
    pub fn set_flags(&mut self, target: ConfigTarget, flags: impl IntoIterator<Item = ConfigFlag>) {
        for flag in flags {
            self.set_flag(target, flag);
        }
    }

    /// Remove every flag named `name` from the target scope(s).
    pub fn remove_flag(&mut self, target: ConfigTarget, name: &str) {
        info!(?target, identifier = name, "unloading flag");
        let keep = |f: &ConfigFlag| f.identifier != name;
        match target {
            ConfigTarget::Server => self.server.retain(keep),
            ConfigTarget::Client => self.client.retain(keep),
            ConfigTarget::Global => {
                self.server.retain(keep);
                self.client.retain(keep);
            }
        }
    }

    /// First flag named `name` in `scope`. `Global` looks in the server
    /// scope first, then the client scope.
    pub fn flag(&self, scope: ConfigTarget, name: &str) -> Option<&ConfigFlag> {
        match scope {
            ConfigTarget::Server => find(&self.server, name),
            ConfigTarget::Client => find(&self.client, name),
            ConfigTarget::Global => find(&self.server, name).or_else(|| find(&self.client, name)),
        }
    }

    /// Whether a flag named `name` is set in `scope`.
    pub fn has_flag(&self, scope: ConfigTarget, name: &str) -> bool {
        self.flag(scope, name).is_some()
    }

    /// Flags of one scope. `Global` yields the server scope.
    pub fn flags(&self, scope: ConfigTarget) -> &[ConfigFlag] {
        match scope {
            ConfigTarget::Server | ConfigTarget::Global => &self.server,
            ConfigTarget::Client => &self.client,
        }
    }
}

fn find<'a>(flags: &'a [ConfigFlag], name: &str) -> Option<&'a ConfigFlag> {
    flags.iter().find(|f| f.identifier == name)
}

impl TetherSettings {
    /// Fold recognized flags into these settings.
    ///
    /// Malformed `socketTimeout` and `logPath` flags are logged and ignored;
    /// `socketTimeout` must lie within [`SOCKET_TIMEOUT_SECS`]. A malformed
    /// `connection_details` flag is an error, and so are settings that no
    /// longer validate once the flags are folded in.
    pub fn apply_flags(&mut self, flags: &FlagStore) -> Result<()> {
        if flags.has_flag(ConfigTarget::Server, ALLOW_MULTIPLE_SESSIONS) {
            self.server.allow_multiple_sessions = true;
        }

        // `release` wins when both are present.
        if flags.has_flag(ConfigTarget::Server, DEBUG) {
            self.mode = BuildMode::Debug;
        }
        if flags.has_flag(ConfigTarget::Server, RELEASE) {
            self.mode = BuildMode::Release;
        }

        if let Some(flag) = flags.flag(ConfigTarget::Server, LOG_PATH) {
            match flag.options.as_slice() {
                [path] => self.logging.log_path = Some(path.clone()),
                _ => warn!(
                    options = flag.options.len(),
                    "logPath flag needs exactly one option, ignoring"
                ),
            }
        }

        if let Some(flag) = flags.flag(ConfigTarget::Client, SOCKET_TIMEOUT) {
            match flag.options.as_slice() {
                [secs] => match parse_socket_timeout(secs) {
                    Some(secs) => self.client.socket_timeout_secs = Some(secs),
                    None => warn!(
                        value = %secs,
                        "socketTimeout flag option is not a whole number of seconds within {}..={}, ignoring",
                        SOCKET_TIMEOUT_SECS.start(),
                        SOCKET_TIMEOUT_SECS.end()
                    ),
                },
                _ => warn!(
                    options = flag.options.len(),
                    "socketTimeout flag needs exactly one option, ignoring"
                ),
            }
        }

        if let Some(flag) = flags.flag(ConfigTarget::Global, CONNECTION_DETAILS) {
            let [host, port] = flag.options.as_slice() else {
                return Err(SettingsError::InvalidValue(format!(
                    "connection_details needs host and port, got {} options",
                    flag.options.len()
                )));
            };
            let port = port.trim().parse::<u16>().map_err(|_| {
                SettingsError::InvalidValue(format!("connection_details port '{port}' is not a port"))
            })?;
            self.connection.host.clone_from(host);
            self.connection.port = port;
        }

        self.validate()
    }
}
