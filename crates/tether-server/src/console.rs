//! Operator console.
//!
//! Line-oriented commands against a running [`NetServer`]. Every failure is
//! reported as an output line; nothing here can stop the engine.

use tether_core::{Identifier, ResourceEngine};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::server::NetServer;

const PREFIX: &str = "[Console]";

/// Commands understood by [`execute`], with their usage.
pub const COMMANDS: &[(&str, &str)] = &[
    ("commands", "list the available commands"),
    ("broadcast.resource <resource>", "compile <resource> and broadcast it to every client"),
    ("server.clients", "list the connected clients"),
];

/// Run one console line and return the output lines.
pub async fn execute(server: &NetServer, line: &str) -> Vec<String> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    debug!(command, "console command");

    match command {
        "commands" => COMMANDS
            .iter()
            .map(|(usage, about)| format!("{PREFIX} {usage} - {about}"))
            .collect(),
        "broadcast.resource" => broadcast_resource(server, rest).await,
        "server.clients" => list_clients(server),
        other => vec![format!("{PREFIX} no command '{other}'")],
    }
}

/// Read commands from `input` until EOF, writing replies to `output`.
pub async fn run<R, W>(server: &NetServer, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        for reply in execute(server, &line).await {
            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
        }
        output.flush().await?;
    }
    Ok(())
}

async fn broadcast_resource(server: &NetServer, resource: &str) -> Vec<String> {
    if resource.is_empty() {
        return vec![format!("{PREFIX} usage: broadcast.resource <resource>")];
    }
    let message = match ResourceEngine::parse_resource(resource) {
        Ok(message) => message,
        Err(err) => return vec![format!("{PREFIX} failed to parse resource ({err})")],
    };
    match server.broadcast(message).await {
        Ok(reached) => vec![format!("{PREFIX} broadcast '{resource}' to {reached} client(s)")],
        Err(err) => vec![format!("{PREFIX} broadcast failed ({err})")],
    }
}

fn list_clients(server: &NetServer) -> Vec<String> {
    let clients = server.clients();
    if clients.is_empty() {
        return vec![format!("{PREFIX} There is nobody connected.")];
    }
    clients
        .iter()
        .map(|client| {
            let connected = client.connection().is_some_and(|conn| !conn.is_closed());
            format!(
                "{PREFIX} {} - {} Connected: {connected}",
                client.name(),
                client.id()
            )
        })
        .collect()
}
