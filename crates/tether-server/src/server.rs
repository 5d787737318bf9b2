//! `NetServer`: accept loop, handshake, addressing and broadcast.
//!
//! Every accepted socket runs in its own task:
//!
//! ```text
//! accepted -> send `connecting` (wantsResponse) -> wait for identity
//!          -> rejected   (no reply, or reply without identity)
//!          -> disallowed (duplicate id, single-session mode)
//!          -> rejected   (server already shutting down)
//!          -> connected  (registered, receive loop until close)
//! ```
//!
//! The receive loop hands answers to pending requests, publishes every
//! other message on the inbound feed and dispatches it to the handlers
//! registered with [`NetServer::on`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tether_core::{
    AddressBy, Connection, EventTable, Identifier, Identity, Message, ResourceEngine,
    TransportError,
};
use tether_settings::TetherSettings;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::lifecycle::Lifecycle;
use crate::registry::{Registration, SessionRegistry};

/// Reason sent with `rejected` when the peer never identified itself.
pub const NO_CREDENTIALS: &str = "no credentials supplied.";
/// Reason sent with `disallowed` for a duplicate session.
pub const MULTIPLE_SESSIONS_DISALLOWED: &str = "Multiple sessions for the same user is disallowed";
/// Reason used when the process shuts the server down.
pub const DEFAULT_SHUTDOWN_REASON: &str = "Server is closing";
/// Reason sent with `rejected` to a peer that finishes its handshake after
/// shutdown began.
pub const SERVER_CLOSING: &str = "server is shutting down";

/// An inbound message and the registered identity that sent it.
#[derive(Clone, Debug)]
pub struct MessageInfo {
    /// The message, with `identity` set to `sender`.
    pub message: Message,
    /// The sender as registered during its handshake.
    pub sender: Identity,
}

#[derive(Debug)]
enum Handshake {
    Connected(Identity),
    Rejected,
    Disallowed,
    Closing,
    Dropped,
}

struct Shared {
    config: ServerConfig,
    registry: SessionRegistry,
    events: RwLock<Arc<EventTable>>,
    inbound: broadcast::Sender<MessageInfo>,
    lifecycle: Lifecycle,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// The tether server. Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct NetServer {
    shared: Arc<Shared>,
}

impl NetServer {
    /// Create a server that is not yet listening.
    pub fn new(config: ServerConfig) -> Self {
        let (inbound, _) = broadcast::channel(config.inbound_buffer.max(1));
        Self {
            shared: Arc::new(Shared {
                config,
                registry: SessionRegistry::new(),
                events: RwLock::new(Arc::new(EventTable::new())),
                inbound,
                lifecycle: Lifecycle::default(),
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// Create a server from loaded settings.
    pub fn from_settings(settings: &TetherSettings) -> Self {
        Self::new(ServerConfig::from_settings(settings))
    }

    /// The configuration the server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Bind the configured address and start accepting peers.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port `0` was requested.
    pub async fn start(&self) -> Result<SocketAddr> {
        self.shared.lifecycle.begin_start()?;

        let addr = self.shared.config.bind_address();
        let bound = match TcpListener::bind(&addr).await {
            Ok(listener) => listener.local_addr().map(|local| (listener, local)),
            Err(err) => Err(err),
        };
        let (listener, local) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                self.shared.lifecycle.abort_start();
                return Err(ServerError::Bind { addr, source });
            }
        };

        *self.shared.local_addr.lock() = Some(local);
        info!(%local, mode = %self.shared.config.mode, "server started");

        let acceptor = tokio::spawn(accept_loop(Arc::clone(&self.shared), listener));
        self.shared.lifecycle.running(acceptor);
        Ok(local)
    }

    /// Whether the server is accepting peers.
    pub fn is_started(&self) -> bool {
        self.shared.lifecycle.is_running()
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    /// Notify every peer with `shutdown?reason='<reason>'`, then close all
    /// connections and stop accepting.
    ///
    /// The registry is drained and closed first, so a handshake finishing
    /// concurrently is rejected rather than registered after the notice
    /// went out. When the notice cannot be compiled (e.g. the reason
    /// contains a quote) connections are closed without it. Calling this
    /// twice is a no-op.
    pub async fn shutdown(&self, reason: &str) -> Result<()> {
        let Some(acceptor) = self.shared.lifecycle.begin_stop()? else {
            return Ok(());
        };

        let clients = self.shared.registry.close();
        let resource = format!("shutdown?reason='{reason}'");
        match ResourceEngine::parse_resource(&resource) {
            Ok(notice) => {
                let notified = deliver(&clients, &notice).await;
                debug!(notified, "sent shutdown notice");
            }
            Err(err) => {
                warn!(error = %err, "could not build shutdown notice, closing connections");
            }
        }

        for client in &clients {
            if let Some(conn) = client.connection() {
                conn.close().await;
            }
        }

        self.shared.lifecycle.stop_tasks(Some(acceptor)).await;
        info!(clients = clients.len(), reason, "server shut down");
        Ok(())
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Register a handler for inbound messages with `event_id`.
    ///
    /// Handlers run in the sender's receive loop. The message's `identity`
    /// is the sender's registered identity, connection included.
    pub fn on<F>(&self, event_id: impl Into<String>, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let mut events = self.shared.events.write();
        Arc::make_mut(&mut events).add(event_id, handler);
    }

    /// Next inbound message from any registered peer.
    ///
    /// Only messages received after the call are observed. `None` waits
    /// without bound; an elapsed timeout yields `Ok(None)`.
    pub async fn wait_for_message(&self, timeout: Option<Duration>) -> Result<Option<MessageInfo>> {
        self.ensure_started()?;
        let mut feed = self.shared.inbound.subscribe();
        let token = self.shared.lifecycle.token();

        let next = async {
            loop {
                match feed.recv().await {
                    Ok(info) => return Some(info),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "inbound feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        let next = async {
            tokio::select! {
                () = token.cancelled() => None,
                info = next => info,
            }
        };

        Ok(match timeout {
            Some(limit) => tokio::time::timeout(limit, next).await.ok().flatten(),
            None => next.await,
        })
    }

    // ── Addressing ──────────────────────────────────────────────────

    /// Fire-and-forget to the first peer matching `value` by `by`.
    ///
    /// `wantsResponse` is cleared. Returns `Ok(false)` when nobody matches.
    pub async fn send_to(&self, by: AddressBy, value: &str, message: Message) -> Result<bool> {
        self.ensure_started()?;
        let Some(conn) = self.lookup(by, value) else {
            return Ok(false);
        };
        self.send_via(&conn, message).await?;
        Ok(true)
    }

    /// Send to the first peer matching `value` by `by` and wait up to the
    /// configured response timeout for its answer.
    ///
    /// Returns `Ok(None)` when nobody matches or nobody answers in time.
    pub async fn request_to(
        &self,
        by: AddressBy,
        value: &str,
        message: Message,
    ) -> Result<Option<Message>> {
        self.ensure_started()?;
        let Some(conn) = self.lookup(by, value) else {
            return Ok(None);
        };
        let reply = conn
            .request(message, Some(self.shared.config.response_timeout()))
            .await?;
        match &reply {
            Some(reply) => info!(event_id = %reply.event_id, "received response"),
            None => debug!(by = %by, value, "no response before timeout"),
        }
        Ok(reply)
    }

    /// Fire-and-forget on a specific connection. `wantsResponse` is cleared.
    pub async fn send_via(&self, connection: &Connection, mut message: Message) -> Result<()> {
        message.wants_response = false;
        connection.send(&message).await?;
        Ok(())
    }

    /// Fire-and-forget to every registered peer. Returns how many were reached.
    pub async fn trigger_event(&self, mut message: Message) -> Result<usize> {
        self.ensure_started()?;
        message.wants_response = false;
        Ok(deliver(&self.shared.registry.snapshot(), &message).await)
    }

    /// Send to every registered peer, keeping `wantsResponse` as set.
    ///
    /// A broadcast cannot collect answers; asking for one only logs a
    /// warning. Returns how many peers were reached.
    pub async fn broadcast(&self, message: Message) -> Result<usize> {
        self.ensure_started()?;
        let targets = self.shared.registry.snapshot();
        if message.wants_response {
            warn!(
                recipients = targets.len(),
                "cannot fetch {} responses from a broadcast (wantsResponse is set)",
                targets.len()
            );
        }
        let reached = deliver(&targets, &message).await;
        debug!(event_id = %message.event_id, recipients = targets.len(), reached, "broadcast message");
        Ok(reached)
    }

    // ── Registry ────────────────────────────────────────────────────

    /// Snapshot of the connected identities, in registration order.
    pub fn clients(&self) -> Vec<Identity> {
        self.shared.registry.snapshot()
    }

    /// Number of connected identities.
    pub fn client_count(&self) -> usize {
        self.shared.registry.len()
    }

    fn lookup(&self, by: AddressBy, value: &str) -> Option<Arc<Connection>> {
        let Some(identity) = self.shared.registry.find(by, value) else {
            warn!(by = %by, value, "no connected client matches");
            return None;
        };
        identity.connection
    }

    fn ensure_started(&self) -> Result<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(ServerError::NotStarted)
        }
    }
}

impl std::fmt::Debug for NetServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetServer")
            .field("local_addr", &self.local_addr())
            .field("started", &self.is_started())
            .field("clients", &self.client_count())
            .finish_non_exhaustive()
    }
}

/// Send `message` to every identity's connection, skipping failures.
async fn deliver(targets: &[Identity], message: &Message) -> usize {
    let mut reached = 0;
    for target in targets {
        let Some(conn) = target.connection() else {
            continue;
        };
        match conn.send(message).await {
            Ok(()) => reached += 1,
            Err(err) => warn!(name = %target.name, error = %err, "failed to send to client"),
        }
    }
    reached
}

// ── Connection tasks ────────────────────────────────────────────────────────

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    let token = shared.lifecycle.token();
    loop {
        let accepted = tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted socket");
                let _ = tokio::spawn(handle_connection(Arc::clone(&shared), stream));
            }
            Err(err) => warn!(error = %err, "accept failed"),
        }
    }
    debug!("acceptor stopped");
}

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream) {
    let conn = match Connection::new(stream, shared.config.max_frame_bytes) {
        Ok(conn) => Arc::new(conn),
        Err(err) => {
            warn!(error = %err, "failed to set up accepted connection");
            return;
        }
    };

    let token = shared.lifecycle.token();
    let outcome = tokio::select! {
        () = token.cancelled() => Handshake::Dropped,
        outcome = handshake(&shared, &conn) => outcome,
    };

    match outcome {
        Handshake::Connected(identity) => receive_loop(&shared, &conn, &identity).await,
        Handshake::Rejected | Handshake::Disallowed | Handshake::Closing => conn.close().await,
        Handshake::Dropped => {
            let _ = shared.registry.remove_connection(conn.id());
            conn.close().await;
        }
    }
}

async fn handshake(shared: &Shared, conn: &Arc<Connection>) -> Handshake {
    let peer = conn.peer();
    if let Err(err) = conn.send(&Message::connecting()).await {
        debug!(%peer, error = %err, "peer left before the handshake");
        return Handshake::Dropped;
    }

    let reply = match conn.recv_timeout(shared.config.handshake_timeout()).await {
        Ok(reply) => reply,
        Err(err) if err.is_recoverable() => {
            warn!(%peer, error = %err, "malformed handshake reply");
            None
        }
        Err(err) => {
            debug!(%peer, error = %err, "peer left during the handshake");
            return Handshake::Dropped;
        }
    };

    let Some(identity) = reply.and_then(|m| m.identity) else {
        info!(%peer, "rejected client without credentials");
        send_quietly(conn, &Message::rejected(NO_CREDENTIALS)).await;
        return Handshake::Rejected;
    };

    let identity = identity.attach(Arc::clone(conn));
    let registration = shared
        .registry
        .register(identity.clone(), shared.config.allow_multiple_sessions);
    match registration {
        Registration::Duplicate => {
            info!(%peer, name = %identity.name, id = %identity.id, "disallowed duplicate session");
            send_quietly(conn, &Message::disallowed(MULTIPLE_SESSIONS_DISALLOWED)).await;
            Handshake::Disallowed
        }
        Registration::Closed => {
            info!(%peer, name = %identity.name, "rejected client, server is shutting down");
            send_quietly(conn, &Message::rejected(SERVER_CLOSING)).await;
            Handshake::Closing
        }
        Registration::Accepted => {
            info!(%peer, name = %identity.name, id = %identity.id, "accepted client");
            if let Err(err) = conn.send(&Message::connected()).await {
                debug!(%peer, error = %err, "peer left before it was told it connected");
                return Handshake::Dropped;
            }
            Handshake::Connected(identity)
        }
    }
}

async fn receive_loop(shared: &Shared, conn: &Arc<Connection>, identity: &Identity) {
    let token = shared.lifecycle.token();
    loop {
        let received = tokio::select! {
            () = token.cancelled() => break,
            received = conn.recv() => received,
        };
        match received {
            Ok(message) => {
                let Some(mut message) = conn.route(message) else {
                    continue;
                };
                message.identity = Some(identity.clone());
                let _ = shared.inbound.send(MessageInfo {
                    message: message.clone(),
                    sender: identity.clone(),
                });
                let events = Arc::clone(&*shared.events.read());
                let _ = events.dispatch(&message);
            }
            Err(err) if err.is_recoverable() => {
                warn!(name = %identity.name, error = %err, "skipping malformed packet");
            }
            Err(TransportError::Closed) => break,
            Err(err) => {
                warn!(name = %identity.name, error = %err, "connection failed");
                break;
            }
        }
    }

    let _ = shared.registry.remove_connection(conn.id());
    conn.close().await;
    info!(name = %identity.name, id = %identity.id, "client disconnected");
}

async fn send_quietly(conn: &Connection, message: &Message) {
    if let Err(err) = conn.send(message).await {
        debug!(peer = %conn.peer(), event_id = %message.event_id, error = %err, "send failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn start_binds_ephemeral_port() {
        let server = NetServer::new(local_config());
        assert!(!server.is_started());
        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));
        assert!(server.is_started());
        server.shutdown("test over").await.unwrap();
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let server = NetServer::new(local_config());
        let _ = server.start().await.unwrap();
        assert_matches!(server.start().await, Err(ServerError::AlreadyStarted));
        server.shutdown("test over").await.unwrap();
    }

    #[tokio::test]
    async fn restart_after_shutdown_fails() {
        let server = NetServer::new(local_config());
        let _ = server.start().await.unwrap();
        server.shutdown("bye").await.unwrap();
        assert!(!server.is_started());
        assert_matches!(server.start().await, Err(ServerError::Stopped));
    }

    #[tokio::test]
    async fn operations_before_start_fail() {
        let server = NetServer::new(local_config());
        assert_matches!(
            server.send_to(AddressBy::Name, "x", Message::display("hi")).await,
            Err(ServerError::NotStarted)
        );
        assert_matches!(
            server.broadcast(Message::display("hi")).await,
            Err(ServerError::NotStarted)
        );
        assert_matches!(
            server.wait_for_message(Some(Duration::from_millis(10))).await,
            Err(ServerError::NotStarted)
        );
        assert_matches!(server.shutdown("x").await, Err(ServerError::NotStarted));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let server = NetServer::new(ServerConfig {
            port,
            ..local_config()
        });
        assert_matches!(server.start().await, Err(ServerError::Bind { .. }));
        assert!(!server.is_started());
    }

    #[tokio::test]
    async fn wait_for_message_times_out() {
        let server = NetServer::new(local_config());
        let _ = server.start().await.unwrap();
        let got = server
            .wait_for_message(Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(got.is_none());
        server.shutdown("test over").await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let server = NetServer::new(local_config());
        let _ = server.start().await.unwrap();
        server.shutdown("first").await.unwrap();
        server.shutdown("second").await.unwrap();
    }

    #[tokio::test]
    async fn handshake_finishing_during_shutdown_is_rejected() {
        use tether_core::connection::DEFAULT_MAX_FRAME_BYTES;
        use tether_core::message::events;

        let server = NetServer::new(local_config());
        let addr = server.start().await.unwrap();
        let peer = Connection::connect(addr, DEFAULT_MAX_FRAME_BYTES).await.unwrap();
        let greeting = peer.recv().await.unwrap();
        assert_eq!(greeting.event_id, events::CONNECTING);

        // Shutdown has drained the registry but not yet cancelled the tasks.
        assert!(server.shared.registry.close().is_empty());
        peer.send(&Message::identify(Identity::new("late"))).await.unwrap();

        let verdict = peer
            .recv_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(verdict.event_id, events::REJECTED);
        assert_eq!(verdict.property_str("reason"), Some(SERVER_CLOSING));
        assert_eq!(server.client_count(), 0);
        server.shutdown("test over").await.unwrap();
    }

    #[tokio::test]
    async fn empty_registry_broadcast_reaches_nobody() {
        let server = NetServer::new(local_config());
        let _ = server.start().await.unwrap();
        assert_eq!(server.broadcast(Message::display("hi")).await.unwrap(), 0);
        assert_eq!(server.trigger_event(Message::display("hi")).await.unwrap(), 0);
        assert!(
            !server
                .send_to(AddressBy::Name, "nobody", Message::display("hi"))
                .await
                .unwrap()
        );
        server.shutdown("test over").await.unwrap();
    }
}
