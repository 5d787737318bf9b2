//! # tether
//!
//! Entry point: `serve` runs a server with the operator console on stdin,
//! `connect` runs an interactive client, `demo` wires both together locally.

#![deny(unsafe_code)]

mod cli;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tether_client::NetClient;
use tether_core::message::events;
use tether_core::{AddressBy, Identity, Message, ResourceEngine};
use tether_server::{DEFAULT_SHUTDOWN_REASON, NetServer, console};
use tether_settings::TetherSettings;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::{Cli, Command};

const DEMO_CLIENT: &str = "demo";
const DEMO_GREETING: &str = "display?text='Hello, World!'";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Settings first: the log level and log file come from them.
    let mut settings = load_settings(cli.settings.as_deref())?;
    let flags = cli.command.flags(&settings);
    settings
        .apply_flags(&flags)
        .context("Invalid command line options")?;
    init_logging(&settings)?;
    tracing::debug!(mode = %settings.mode, address = %settings.connection.address(), "settings loaded");

    match cli.command {
        Command::Serve { .. } => serve(&settings).await,
        Command::Connect { name, .. } => connect(&settings, &name).await,
        Command::Demo => demo(settings).await,
    }
}

fn load_settings(path: Option<&Path>) -> Result<TetherSettings> {
    match path {
        Some(path) => tether_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(tether_settings::load_settings().unwrap_or_default()),
    }
}

fn init_logging(settings: &TetherSettings) -> Result<()> {
    let level = settings.logging.level.as_str();
    match &settings.logging.log_path {
        Some(path) => tether_core::logging::init_subscriber_with_file(level, Path::new(path))
            .with_context(|| format!("Failed to open log file {path}")),
        None => {
            tether_core::logging::init_subscriber(level);
            Ok(())
        }
    }
}

async fn serve(settings: &TetherSettings) -> Result<()> {
    let server = NetServer::from_settings(settings);
    let addr = server.start().await.context("Failed to start server")?;
    tracing::info!("tether listening on {addr}");

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = console::run(&server, stdin, tokio::io::stdout()) => {
            result.context("Console failed")?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
        }
    }

    tracing::info!("Shutting down...");
    server
        .shutdown(DEFAULT_SHUTDOWN_REASON)
        .await
        .context("Failed to shut down")?;
    Ok(())
}

async fn connect(settings: &TetherSettings, name: &str) -> Result<()> {
    let client = NetClient::from_settings(settings);
    client.set_local_identity(Identity::new(name));
    if !client
        .start_from_settings()
        .await
        .context("Failed to connect")?
    {
        bail!("Could not connect to {}", settings.connection.address());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match client.send_resource(line).await {
                    Ok(true) => {}
                    Ok(false) => tracing::warn!(resource = line, "resource dropped"),
                    Err(err) if err.is_invariant() => break,
                    Err(err) => tracing::warn!(error = %err, "could not send resource"),
                }
            }
            next = client.wait_for_message(None) => {
                if !matches!(next, Ok(Some(_))) {
                    tracing::info!("connection closed by server");
                    break;
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn demo(mut settings: TetherSettings) -> Result<()> {
    settings.connection.host = "127.0.0.1".into();
    settings.connection.port = 0;

    let server = NetServer::from_settings(&settings);
    let addr = server.start().await.context("Failed to start demo server")?;

    let client = NetClient::from_settings(&settings);
    client.set_local_identity(Identity::new(DEMO_CLIENT));
    let (shown_tx, mut shown_rx) = tokio::sync::mpsc::unbounded_channel();
    client.on(events::DISPLAY, move |_: &Message| {
        let _ = shown_tx.send(());
    });
    if !client
        .start("127.0.0.1", addr.port())
        .await
        .context("Demo client failed to connect")?
    {
        bail!("Demo client could not connect to {addr}");
    }

    let greeting = ResourceEngine::parse_resource(DEMO_GREETING)?;
    let sent = server
        .send_to(AddressBy::Name, DEMO_CLIENT, greeting)
        .await
        .context("Failed to send greeting")?;
    if !sent {
        bail!("Demo client is not registered");
    }
    let shown = tokio::time::timeout(Duration::from_secs(5), shown_rx.recv())
        .await
        .context("Demo client never displayed the greeting")?;
    if shown.is_none() {
        bail!("Demo client stopped listening");
    }

    client.disconnect().await;
    server
        .shutdown(DEFAULT_SHUTDOWN_REASON)
        .await
        .context("Failed to shut down demo server")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_settings_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"connection": {{"port": 4242}}, "server": {{"allowMultipleSessions": true}}}}"#).unwrap();

        let settings = load_settings(Some(file.path())).unwrap();
        assert_eq!(settings.connection.port, 4242);
        assert!(settings.server.allow_multiple_sessions);
    }

    #[test]
    fn broken_settings_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ not json").unwrap();
        assert!(load_settings(Some(file.path())).is_err());
    }

    #[tokio::test]
    async fn demo_delivers_greeting() {
        demo(TetherSettings::default()).await.unwrap();
    }
}
