//! Peer identities and addressing.
//!
//! An [`Identity`] is what a client claims during the handshake: a unique id
//! and a display name. Once the server accepts it, the identity also carries
//! the [`Connection`] it arrived on and becomes addressable by name or id.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::connection::Connection;

/// Capability shared by every identity type used to address a peer.
pub trait Identifier: Send + Sync {
    /// The peer's unique identifier.
    fn id(&self) -> Uuid;

    /// The peer's display name.
    fn name(&self) -> &str;

    /// When the identity was created or connected.
    fn connected_at(&self) -> DateTime<Utc>;

    /// Attached connection, present on the server once the handshake completes.
    fn connection(&self) -> Option<&Arc<Connection>>;
}

/// The default identity exchanged during the handshake.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Unique identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Creation time on the sending side.
    #[serde(default = "Utc::now")]
    pub connected_at: DateTime<Utc>,
    /// Connection the identity arrived on. Never serialized.
    #[serde(skip)]
    pub connection: Option<Arc<Connection>>,
}

impl Identity {
    /// Create an identity with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::now_v7(), name)
    }

    /// Create an identity with a known id.
    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            connected_at: Utc::now(),
            connection: None,
        }
    }

    /// Bind the identity to the connection it was received on.
    #[must_use]
    pub fn attach(mut self, connection: Arc<Connection>) -> Self {
        self.connected_at = Utc::now();
        self.connection = Some(connection);
        self
    }

    /// Whether this identity and `other` are bound to the same connection.
    pub fn same_connection(&self, other: &Arc<Connection>) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.id() == other.id())
    }
}

impl Identifier for Identity {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Eq for Identity {}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected_at", &self.connected_at)
            .field("connection", &self.connection.as_ref().map(|c| c.peer()))
            .finish()
    }
}

/// Which identity field an address refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressBy {
    /// Match the display name.
    Name,
    /// Match the string form of the unique id.
    Id,
}

impl AddressBy {
    /// Whether `identity` is addressed by `value`.
    pub fn matches(self, identity: &impl Identifier, value: &str) -> bool {
        match self {
            Self::Name => identity.name() == value,
            Self::Id => identity.id().to_string() == value,
        }
    }
}

impl fmt::Display for AddressBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => f.write_str("name"),
            Self::Id => f.write_str("id"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_identity_has_no_connection() {
        let id = Identity::new("deeton");
        assert_eq!(id.name, "deeton");
        assert!(id.connection.is_none());
    }

    #[test]
    fn fresh_ids_are_unique() {
        assert_ne!(Identity::new("a").id, Identity::new("a").id);
    }

    #[test]
    fn address_by_name() {
        let id = Identity::new("deeton");
        assert!(AddressBy::Name.matches(&id, "deeton"));
        assert!(!AddressBy::Name.matches(&id, "other"));
    }

    #[test]
    fn address_by_id_uses_string_form() {
        let id = Identity::new("deeton");
        let text = id.id.to_string();
        assert!(AddressBy::Id.matches(&id, &text));
        assert!(!AddressBy::Id.matches(&id, "deeton"));
    }

    #[test]
    fn serde_skips_connection_and_uses_camel_case() {
        let id = Identity::with_id(Uuid::nil(), "deeton");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json["name"], "deeton");
        assert_eq!(json["id"], Uuid::nil().to_string());
        assert!(json.get("connectedAt").is_some());
        assert!(json.get("connection").is_none());
    }

    #[test]
    fn deserialize_without_timestamp() {
        let json = format!(r#"{{"id":"{}","name":"x"}}"#, Uuid::nil());
        let id: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(id.name, "x");
        assert!(id.connection.is_none());
    }

    #[test]
    fn equality_ignores_timestamp() {
        let a = Identity::with_id(Uuid::nil(), "a");
        let mut b = a.clone();
        b.connected_at = DateTime::<Utc>::MIN_UTC;
        assert_eq!(a, b);
    }

    #[test]
    fn address_by_display() {
        assert_eq!(AddressBy::Name.to_string(), "name");
        assert_eq!(AddressBy::Id.to_string(), "id");
    }
}
