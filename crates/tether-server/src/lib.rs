//! # tether-server
//!
//! Server side of the tether session engine.
//!
//! - Accept loop with one task per peer for its handshake and receive loop
//! - Handshake: `connecting` → identity → `connected` / `rejected` / `disallowed`
//! - Session registry with first-match addressing by name or id
//! - Fire-and-forget sends, bounded requests and broadcast
//! - Shutdown that closes the registry, notifies peers, then cancels tasks
//! - Operator console for `broadcast.resource` and `server.clients`

#![deny(unsafe_code)]

pub mod config;
pub mod console;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod server;

pub use config::ServerConfig;
pub use errors::{Result, ServerError};
pub use server::{DEFAULT_SHUTDOWN_REASON, MessageInfo, NetServer};
