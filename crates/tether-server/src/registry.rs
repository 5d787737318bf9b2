//! Connected-identity registry.
//!
//! One entry per fully handshaken peer. Every scan and mutation holds the
//! lock for its whole duration; callers receive cloned snapshots and do
//! their I/O after the lock is released. Once [`SessionRegistry::close`]
//! has drained it, the registry refuses every later registration.

use parking_lot::Mutex;
use tether_core::{AddressBy, Identifier, Identity};
use tracing::debug;
use uuid::Uuid;

/// Outcome of [`SessionRegistry::register`].
#[derive(Debug)]
pub enum Registration {
    /// The identity is now addressable.
    Accepted,
    /// Another session already uses the same id.
    Duplicate,
    /// The server is shutting down.
    Closed,
}

#[derive(Debug, Default)]
struct Roster {
    clients: Vec<Identity>,
    closed: bool,
}

/// Registry of connected identities.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    roster: Mutex<Roster>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `identity` unless single-session mode forbids it.
    ///
    /// The closed check, the duplicate check and the insert happen under
    /// one lock.
    pub fn register(&self, identity: Identity, allow_multiple: bool) -> Registration {
        let mut roster = self.roster.lock();
        if roster.closed {
            return Registration::Closed;
        }
        if !allow_multiple && roster.clients.iter().any(|c| c.id == identity.id) {
            return Registration::Duplicate;
        }
        debug!(name = %identity.name, id = %identity.id, "registered client");
        roster.clients.push(identity);
        Registration::Accepted
    }

    /// First identity matching `value` by `by`.
    pub fn find(&self, by: AddressBy, value: &str) -> Option<Identity> {
        self.roster
            .lock()
            .clients
            .iter()
            .find(|c| by.matches(*c, value))
            .cloned()
    }

    /// Remove the entry bound to `connection_id`.
    pub fn remove_connection(&self, connection_id: Uuid) -> Option<Identity> {
        let mut roster = self.roster.lock();
        let index = roster
            .clients
            .iter()
            .position(|c| c.connection().is_some_and(|conn| conn.id() == connection_id))?;
        Some(roster.clients.remove(index))
    }

    /// Copy of every entry, in registration order.
    pub fn snapshot(&self) -> Vec<Identity> {
        self.roster.lock().clients.clone()
    }

    /// Refuse further registrations, then remove and return every entry.
    pub fn close(&self) -> Vec<Identity> {
        let mut roster = self.roster.lock();
        roster.closed = true;
        std::mem::take(&mut roster.clients)
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.roster.lock().closed
    }

    /// Whether an entry with `id` exists.
    pub fn contains_id(&self, id: Uuid) -> bool {
        self.roster.lock().clients.iter().any(|c| c.id == id)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.roster.lock().clients.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.roster.lock().clients.is_empty()
    }
}
