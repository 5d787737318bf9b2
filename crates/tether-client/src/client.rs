//! `NetClient`: connect, answer the handshake, then listen.
//!
//! ```text
//! Idle -> Connecting -> read first message, dispatch it
//!                    -> no wantsResponse: fail (server never asked who we are)
//!                    -> send `identify` -> read verdict
//!                    -> rejected / disallowed: fail, back to Idle
//!                    -> anything else: Active, listener loop until close
//! ```
//!
//! Only one `start` can hold `Connecting` at a time; a concurrent one fails
//! with [`ClientError::AlreadyConnected`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tether_core::message::events;
use tether_core::{Connection, EventTable, Identity, Message, TransportError};
use tether_settings::TetherSettings;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::errors::{ClientError, Result};

struct Session {
    conn: Arc<Connection>,
    listener: JoinHandle<()>,
}

enum Link {
    Idle,
    Connecting,
    Active(Session),
}

/// Holds [`Link::Connecting`] for one `start`. Dropping it without
/// [`activate`](Self::activate) frees the slot, including when the
/// `start` future is cancelled.
struct Reservation<'a> {
    link: &'a Mutex<Link>,
    active: bool,
}

impl Reservation<'_> {
    fn activate(mut self, session: Session) {
        *self.link.lock() = Link::Active(session);
        self.active = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.active {
            return;
        }
        let mut link = self.link.lock();
        if matches!(*link, Link::Connecting) {
            *link = Link::Idle;
        }
    }
}

struct Shared {
    config: ClientConfig,
    identity: Mutex<Option<Identity>>,
    events: RwLock<Arc<EventTable>>,
    inbound: broadcast::Sender<Message>,
    link: Mutex<Link>,
}

/// The tether client. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct NetClient {
    shared: Arc<Shared>,
}

impl NetClient {
    /// Create a disconnected client with the default handlers installed:
    /// `connected` and `shutdown` are logged, `display` prints its `text`.
    pub fn new(config: ClientConfig) -> Self {
        let (inbound, _) = broadcast::channel(config.inbound_buffer.max(1));
        let mut table = EventTable::new();
        table.add(events::CONNECTED, |_: &Message| info!("connected to server"));
        table.add(events::DISPLAY, |message: &Message| {
            if let Some(text) = message.property_str("text") {
                println!("{text}");
            }
        });
        table.add(events::SHUTDOWN, |message: &Message| {
            let reason = message.property_str("reason").unwrap_or_default();
            info!(reason, "server is shutting down");
        });

        Self {
            shared: Arc::new(Shared {
                config,
                identity: Mutex::new(None),
                events: RwLock::new(Arc::new(table)),
                inbound,
                link: Mutex::new(Link::Idle),
            }),
        }
    }

    /// Create a client from loaded settings.
    pub fn from_settings(settings: &TetherSettings) -> Self {
        Self::new(ClientConfig::from_settings(settings))
    }

    /// The configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Identity sent when the server asks who we are.
    pub fn set_local_identity(&self, identity: Identity) {
        *self.shared.identity.lock() = Some(identity);
    }

    /// The identity set with [`set_local_identity`](Self::set_local_identity).
    pub fn local_identity(&self) -> Option<Identity> {
        self.shared.identity.lock().clone()
    }

    /// Register a handler for inbound messages with `event_id`. Handlers for
    /// one id run in registration order on the listener task.
    pub fn on<F>(&self, event_id: impl Into<String>, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let mut events = self.shared.events.write();
        Arc::make_mut(&mut events).add(event_id, handler);
    }

    // ── Connecting ──────────────────────────────────────────────────

    /// Connect to `host:port` and complete the handshake.
    ///
    /// In [`tether_core::BuildMode::Debug`] every failure is an `Err`. In
    /// [`tether_core::BuildMode::Release`] runtime failures are logged and reported as
    /// `Ok(false)`. A missing local identity, an active session or another
    /// `start` still in progress is always an `Err`.
    pub async fn start(&self, host: &str, port: u16) -> Result<bool> {
        let Some(identity) = self.local_identity() else {
            return Err(ClientError::MissingIdentity);
        };
        let reservation = self.reserve()?;

        let settled = self
            .shared
            .config
            .mode
            .settle(self.connect(host, port, identity, reservation).await)?;
        Ok(settled.is_some())
    }

    /// [`start`](Self::start) against the configured host and port.
    pub async fn start_from_settings(&self) -> Result<bool> {
        let ClientConfig { host, port, .. } = &self.shared.config;
        self.start(host, *port).await
    }

    /// Claim the link for a new session. A closed session left behind by
    /// the server is discarded.
    fn reserve(&self) -> Result<Reservation<'_>> {
        let mut link = self.shared.link.lock();
        match &*link {
            Link::Connecting => return Err(ClientError::AlreadyConnected),
            Link::Active(session) if !session.conn.is_closed() => {
                return Err(ClientError::AlreadyConnected);
            }
            Link::Idle | Link::Active(_) => {}
        }
        *link = Link::Connecting;
        Ok(Reservation {
            link: &self.shared.link,
            active: false,
        })
    }

    async fn connect(
        &self,
        host: &str,
        port: u16,
        identity: Identity,
        reservation: Reservation<'_>,
    ) -> Result<()> {
        let addr = format!("{host}:{port}");
        let stream = open_stream(&addr, self.shared.config.connect_timeout).await?;
        let conn = Arc::new(Connection::new(stream, self.shared.config.max_frame_bytes)?);
        debug!(peer = %conn.peer(), "socket open, waiting for server");

        let verdict = match self.handshake(&conn, identity).await {
            Ok(verdict) => verdict,
            Err(err) => {
                conn.close().await;
                return Err(err);
            }
        };
        info!(peer = %conn.peer(), event_id = %verdict.event_id, "handshake complete");

        let listener = tokio::spawn(listen(Arc::clone(&self.shared), Arc::clone(&conn)));
        reservation.activate(Session { conn, listener });

        self.dispatch(&verdict);
        Ok(())
    }

    async fn handshake(&self, conn: &Connection, identity: Identity) -> Result<Message> {
        let timeout = self.shared.config.socket_timeout;
        let first = read_next(conn, timeout).await?.ok_or(ClientError::ServerSilent)?;
        self.dispatch(&first);
        if !first.wants_response {
            return Err(ClientError::Unprompted {
                event: first.event_id,
            });
        }

        conn.send(&Message::identify(identity)).await?;
        let verdict = read_next(conn, timeout).await?.ok_or(ClientError::ServerSilent)?;
        match verdict.event_id.as_str() {
            events::REJECTED | events::DISALLOWED => Err(ClientError::Rejected {
                reason: verdict.property_str("reason").unwrap_or_default().to_string(),
                event: verdict.event_id,
            }),
            events::CONNECTED => Ok(verdict),
            other => {
                debug!(event_id = other, "server skipped `connected`, treating as accepted");
                Ok(verdict)
            }
        }
    }

    fn dispatch(&self, message: &Message) {
        let table = Arc::clone(&*self.shared.events.read());
        let _ = table.dispatch(message);
    }

    // ── Session ─────────────────────────────────────────────────────

    /// Whether a session is active.
    pub fn is_connected(&self) -> bool {
        matches!(&*self.shared.link.lock(), Link::Active(s) if !s.conn.is_closed())
    }

    /// Fire-and-forget. `wantsResponse` is cleared.
    pub async fn send(&self, mut message: Message) -> Result<()> {
        let conn = self.connection()?;
        message.wants_response = false;
        conn.send(&message).await?;
        Ok(())
    }

    /// Compile `resource` and send it. Returns `Ok(false)` when the build
    /// mode swallowed a grammar error.
    pub async fn send_resource(&self, resource: &str) -> Result<bool> {
        let Some(message) = Message::from_resource(resource, self.shared.config.mode)? else {
            return Ok(false);
        };
        self.send(message).await?;
        Ok(true)
    }

    /// Send with `wantsResponse` set and wait up to the socket timeout for
    /// the server's answer. `Ok(None)` when none arrives in time.
    pub async fn request(&self, message: Message) -> Result<Option<Message>> {
        let conn = self.connection()?;
        Ok(conn.request(message, self.shared.config.socket_timeout).await?)
    }

    /// Next inbound message after this call. `None` waits without bound; an
    /// elapsed timeout or a closed session yields `Ok(None)`.
    pub async fn wait_for_message(&self, timeout: Option<Duration>) -> Result<Option<Message>> {
        let conn = self.connection()?;
        let mut feed = self.shared.inbound.subscribe();
        let closed = conn.closed_token();

        let next = async {
            loop {
                match feed.recv().await {
                    Ok(message) => return Some(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "inbound feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        let next = async {
            tokio::select! {
                () = closed.cancelled() => None,
                message = next => message,
            }
        };

        Ok(match timeout {
            Some(limit) => tokio::time::timeout(limit, next).await.ok().flatten(),
            None => next.await,
        })
    }

    /// Close the session and wait for the listener to stop. No-op when
    /// disconnected or while a `start` is still connecting.
    pub async fn disconnect(&self) {
        let session = {
            let mut link = self.shared.link.lock();
            match std::mem::replace(&mut *link, Link::Idle) {
                Link::Active(session) => session,
                other => {
                    *link = other;
                    return;
                }
            }
        };
        session.conn.close().await;
        if let Err(err) = session.listener.await {
            warn!(error = %err, "listener task failed");
        }
        info!(peer = %session.conn.peer(), "disconnected");
    }

    fn connection(&self) -> Result<Arc<Connection>> {
        match &*self.shared.link.lock() {
            Link::Active(session) if !session.conn.is_closed() => Ok(Arc::clone(&session.conn)),
            Link::Idle | Link::Connecting | Link::Active(_) => Err(ClientError::NotConnected),
        }
    }
}

impl std::fmt::Debug for NetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetClient")
            .field("identity", &self.local_identity())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

/// Resolve `addr` and connect to the first address that accepts.
async fn open_stream(addr: &str, connect_timeout: Duration) -> Result<TcpStream> {
    let resolved: Vec<_> = tokio::net::lookup_host(addr)
        .await
        .map_err(|source| ClientError::Resolve {
            addr: addr.to_string(),
            source,
        })?
        .collect();

    let mut last = std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved");
    for candidate in resolved {
        match tokio::time::timeout(connect_timeout, TcpStream::connect(candidate)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(err)) => last = err,
            Err(_elapsed) => {
                last = std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out");
            }
        }
        debug!(%candidate, error = %last, "connect attempt failed");
    }
    Err(ClientError::Connect {
        addr: addr.to_string(),
        source: last,
    })
}

async fn read_next(conn: &Connection, timeout: Option<Duration>) -> Result<Option<Message>> {
    let message = match timeout {
        Some(limit) => conn.recv_timeout(limit).await?,
        None => Some(conn.recv().await?),
    };
    Ok(message)
}

async fn listen(shared: Arc<Shared>, conn: Arc<Connection>) {
    loop {
        match conn.recv().await {
            Ok(message) => {
                let Some(message) = conn.route(message) else {
                    continue;
                };
                let _ = shared.inbound.send(message.clone());
                let table = Arc::clone(&*shared.events.read());
                let _ = table.dispatch(&message);
            }
            Err(err) if err.is_recoverable() => {
                warn!(error = %err, "skipping malformed packet");
            }
            Err(TransportError::Closed) => break,
            Err(err) => {
                warn!(error = %err, "connection failed");
                break;
            }
        }
    }
    conn.close().await;
    debug!(peer = %conn.peer(), "listener stopped");
}
