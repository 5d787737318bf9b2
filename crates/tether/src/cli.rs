//! Command line surface and its translation into configuration flags.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tether_settings::flags::{
    ALLOW_MULTIPLE_SESSIONS, CONNECTION_DETAILS, LOG_PATH, RELEASE, SOCKET_TIMEOUT,
};
use tether_settings::{ConfigFlag, ConfigTarget, FlagStore, TetherSettings};

/// tether messaging server and client.
#[derive(Parser, Debug)]
#[command(name = "tether", about = "tether messaging server and client")]
pub struct Cli {
    /// Settings file (defaults to `~/.tether/settings.json`).
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// What to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the server with the operator console on stdin.
    Serve {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
        /// Accept several sessions with the same identity id.
        #[arg(long)]
        allow_multiple_sessions: bool,
        /// Log and swallow grammar failures instead of surfacing them.
        #[arg(long)]
        release: bool,
        /// Also write logs to this file.
        #[arg(long)]
        log_path: Option<PathBuf>,
    },

    /// Connect to a server and send every stdin line as a resource.
    Connect {
        /// Name presented to the server.
        #[arg(long)]
        name: String,
        /// Server host.
        #[arg(long)]
        host: Option<String>,
        /// Server port.
        #[arg(long)]
        port: Option<u16>,
        /// Handshake read bound in seconds.
        #[arg(long)]
        socket_timeout: Option<u64>,
    },

    /// Start a local server and client and deliver a greeting.
    Demo,
}

impl Command {
    /// Flags equivalent to the command line options.
    ///
    /// `host` and `port` travel together as `connection_details`, so a lone
    /// `--port` borrows the host from `settings` and vice versa.
    pub fn flags(&self, settings: &TetherSettings) -> FlagStore {
        let mut store = FlagStore::new();
        match self {
            Self::Serve {
                host,
                port,
                allow_multiple_sessions,
                release,
                log_path,
            } => {
                set_connection_details(&mut store, settings, host.as_deref(), *port);
                if *allow_multiple_sessions {
                    store.set_flag(ConfigTarget::Server, ConfigFlag::new(ALLOW_MULTIPLE_SESSIONS));
                }
                if *release {
                    store.set_flag(ConfigTarget::Server, ConfigFlag::new(RELEASE));
                }
                if let Some(path) = log_path {
                    store.set_flag(
                        ConfigTarget::Server,
                        ConfigFlag::with_options(LOG_PATH, [path.display().to_string()]),
                    );
                }
            }
            Self::Connect {
                host,
                port,
                socket_timeout,
                ..
            } => {
                set_connection_details(&mut store, settings, host.as_deref(), *port);
                if let Some(secs) = socket_timeout {
                    store.set_flag(
                        ConfigTarget::Client,
                        ConfigFlag::with_options(SOCKET_TIMEOUT, [secs.to_string()]),
                    );
                }
            }
            Self::Demo => {}
        }
        store
    }
}

fn set_connection_details(
    store: &mut FlagStore,
    settings: &TetherSettings,
    host: Option<&str>,
    port: Option<u16>,
) {
    if host.is_none() && port.is_none() {
        return;
    }
    let host = host.unwrap_or(&settings.connection.host);
    let port = port.unwrap_or(settings.connection.port);
    store.set_flag(
        ConfigTarget::Global,
        ConfigFlag::with_options(CONNECTION_DETAILS, [host.to_string(), port.to_string()]),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::BuildMode;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tether").chain(args.iter().copied())).unwrap()
    }

    fn applied(args: &[&str]) -> TetherSettings {
        let cli = parse(args);
        let mut settings = TetherSettings::default();
        let flags = cli.command.flags(&settings);
        settings.apply_flags(&flags).unwrap();
        settings
    }

    #[test]
    fn serve_defaults_leave_settings_alone() {
        assert_eq!(applied(&["serve"]), TetherSettings::default());
    }

    #[test]
    fn serve_port_keeps_configured_host() {
        let settings = applied(&["serve", "--port", "4000"]);
        assert_eq!(settings.connection.host, "localhost");
        assert_eq!(settings.connection.port, 4000);
    }

    #[test]
    fn serve_switches() {
        let settings = applied(&[
            "serve",
            "--allow-multiple-sessions",
            "--release",
            "--log-path",
            "/tmp/tether.log",
        ]);
        assert!(settings.server.allow_multiple_sessions);
        assert_eq!(settings.mode, BuildMode::Release);
        assert_eq!(settings.logging.log_path.as_deref(), Some("/tmp/tether.log"));
    }

    #[test]
    fn connect_options() {
        let settings = applied(&[
            "connect",
            "--name",
            "deeton",
            "--host",
            "10.0.0.2",
            "--socket-timeout",
            "9",
        ]);
        assert_eq!(settings.connection.host, "10.0.0.2");
        assert_eq!(settings.connection.port, 1337);
        assert_eq!(settings.client.socket_timeout_secs, Some(9));
    }

    #[test]
    fn zero_socket_timeout_keeps_configured_bound() {
        let settings = applied(&["connect", "--name", "deeton", "--socket-timeout", "0"]);
        assert_eq!(settings.client.socket_timeout_secs, Some(5));
    }

    #[test]
    fn connect_requires_name() {
        let result = Cli::try_parse_from(["tether", "connect"]);
        assert!(result.is_err());
    }

    #[test]
    fn settings_path_is_global() {
        let cli = parse(&["demo", "--settings", "/etc/tether.json"]);
        assert_eq!(cli.settings, Some(PathBuf::from("/etc/tether.json")));
        assert!(matches!(cli.command, Command::Demo));
    }
}
