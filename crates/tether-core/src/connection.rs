//! Framed message transport over TCP.
//!
//! Each message travels as one length-delimited frame (4-byte big-endian
//! length, then compact JSON). Writes are serialized by a mutex so frames
//! never interleave; reads are owned by whichever loop listens on the
//! connection.
//!
//! A loop that reads a connection continuously must pass every message
//! through [`Connection::route`] so that a pending [`Connection::request`]
//! receives its answer.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::errors::TransportError;
use crate::message::Message;

/// Largest frame accepted when no limit is configured (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// One end of a framed TCP connection.
pub struct Connection {
    id: Uuid,
    peer: SocketAddr,
    writer: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    reader: tokio::sync::Mutex<FramedRead<OwnedReadHalf, LengthDelimitedCodec>>,
    closed: CancellationToken,
    /// Waiter for the answer to the in-flight request.
    pending: parking_lot::Mutex<Option<oneshot::Sender<Message>>>,
    /// At most one request in flight per connection.
    request_gate: tokio::sync::Mutex<()>,
    /// Messages written.
    pub sent_messages: AtomicU64,
    /// Messages read and decoded.
    pub received_messages: AtomicU64,
}

impl Connection {
    /// Wrap an established stream.
    pub fn new(stream: TcpStream, max_frame_bytes: usize) -> Result<Self, TransportError> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        let codec = || {
            LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_bytes)
                .new_codec()
        };

        Ok(Self {
            id: Uuid::now_v7(),
            peer,
            writer: tokio::sync::Mutex::new(FramedWrite::new(write, codec())),
            reader: tokio::sync::Mutex::new(FramedRead::new(read, codec())),
            closed: CancellationToken::new(),
            pending: parking_lot::Mutex::new(None),
            request_gate: tokio::sync::Mutex::new(()),
            sent_messages: AtomicU64::new(0),
            received_messages: AtomicU64::new(0),
        })
    }

    /// Open a TCP connection to `addr`.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        max_frame_bytes: usize,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream, max_frame_bytes)
    }

    /// Unique id of this connection, local to the process.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether [`close`](Self::close) has been called or the peer went away.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the connection closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Write one message as a frame.
    pub async fn send(&self, message: &Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let payload = serde_json::to_vec(message).map_err(TransportError::Serialize)?;

        let mut writer = self.writer.lock().await;
        tokio::select! {
            () = self.closed.cancelled() => Err(TransportError::Closed),
            result = writer.send(Bytes::from(payload)) => {
                result?;
                let _ = self.sent_messages.fetch_add(1, Ordering::Relaxed);
                trace!(peer = %self.peer, event_id = %message.event_id, "sent message");
                Ok(())
            }
        }
    }

    /// Read the next message.
    ///
    /// A frame that is not a message yields [`TransportError::Malformed`]
    /// and leaves the connection usable. End of stream closes the connection
    /// and yields [`TransportError::Closed`].
    pub async fn recv(&self) -> Result<Message, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut reader = self.reader.lock().await;
        let frame = tokio::select! {
            () = self.closed.cancelled() => return Err(TransportError::Closed),
            frame = reader.next() => frame,
        };

        match frame {
            None => {
                debug!(peer = %self.peer, "peer closed the connection");
                self.closed.cancel();
                Err(TransportError::Closed)
            }
            Some(Err(err)) => Err(TransportError::Io(err)),
            Some(Ok(bytes)) => {
                let message: Message =
                    serde_json::from_slice(&bytes).map_err(TransportError::Malformed)?;
                let _ = self.received_messages.fetch_add(1, Ordering::Relaxed);
                trace!(peer = %self.peer, event_id = %message.event_id, "received message");
                Ok(message)
            }
        }
    }

    /// Read the next message, giving up after `timeout`.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Send `message` with `wantsResponse` set and wait for the peer's next message.
    ///
    /// The answer is delivered by whichever loop reads this connection via
    /// [`route`](Self::route). Returns `Ok(None)` when `timeout` elapses.
    pub async fn request(
        &self,
        mut message: Message,
        timeout: Option<Duration>,
    ) -> Result<Option<Message>, TransportError> {
        message.wants_response = true;
        let _gate = self.request_gate.lock().await;

        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some(tx);
        if let Err(err) = self.send(&message).await {
            let _ = self.pending.lock().take();
            return Err(err);
        }

        let wait = async {
            tokio::select! {
                reply = rx => reply.ok(),
                () = self.closed.cancelled() => None,
            }
        };
        let reply = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.ok().flatten(),
            None => wait.await,
        };
        let _ = self.pending.lock().take();

        if reply.is_none() && self.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(reply)
    }

    /// Hand `message` to a pending request, if any.
    ///
    /// Returns the message back when nobody is waiting for it, so the caller
    /// can dispatch it.
    pub fn route(&self, message: Message) -> Option<Message> {
        let waiter = self.pending.lock().take();
        match waiter {
            Some(tx) => tx.send(message).err(),
            None => Some(message),
        }
    }

    /// Whether a request is waiting for an answer.
    pub fn has_pending_request(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Close the connection. Pending reads, writes and requests end with
    /// [`TransportError::Closed`]. Idempotent.
    pub async fn close(&self) {
        self.closed.cancel();
        let _ = self.pending.lock().take();
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.get_mut().shutdown().await {
            trace!(peer = %self.peer, error = %err, "socket shutdown failed");
        }
        debug!(peer = %self.peer, connection_id = %self.id, "connection closed");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
