//! The wire-level message and its builder.
//!
//! A [`Message`] carries an event id, a map of scalar properties, a flag
//! asking the receiver to answer, and optionally the sender's [`Identity`].
//! It serializes to a JSON object with the fields `eventId`, `properties`,
//! `wantsResponse` and `identity`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ResourceError;
use crate::identity::Identity;
use crate::mode::BuildMode;
use crate::resource::engine::ResourceEngine;

/// Property map of a message. Keys are unique; order carries no meaning.
pub type Properties = BTreeMap<String, Value>;

/// Event ids used by the handshake and the connection lifecycle.
pub mod events {
    /// Server to client: asks for the client's identity.
    pub const CONNECTING: &str = "connecting";
    /// Server to client: the handshake succeeded.
    pub const CONNECTED: &str = "connected";
    /// Either direction: the handshake failed. Carries `reason`.
    pub const REJECTED: &str = "rejected";
    /// Server to client: a session with the same id already exists. Carries `reason`.
    pub const DISALLOWED: &str = "disallowed";
    /// Server to clients: the server is going away. Carries `reason`.
    pub const SHUTDOWN: &str = "shutdown";
    /// Application example: print the `text` property.
    pub const DISPLAY: &str = "display";
    /// Client to server: the identity answer to `connecting`.
    pub const IDENTIFY: &str = "identify";
}

/// A discrete message exchanged between peers.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// What this message is about, e.g. `connected` or `display`.
    pub event_id: String,
    /// Key/value arguments.
    #[serde(default)]
    pub properties: Properties,
    /// Whether the sender waits for an answer.
    #[serde(default)]
    pub wants_response: bool,
    /// The sender's identity, when it chose to send one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
}

impl Message {
    /// Message with only an event id.
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            ..Self::default()
        }
    }

    /// Start building a message.
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Compile resource text, applying the build-mode failure policy.
    pub fn from_resource(resource: &str, mode: BuildMode) -> Result<Option<Self>, ResourceError> {
        mode.settle(ResourceEngine::parse_resource(resource))
    }

    /// A property as text, when present and a string.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Whether a property is present.
    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// `connecting`: sent on accept, requests the client's identity.
    pub fn connecting() -> Self {
        Self::builder()
            .with_event_id(events::CONNECTING)
            .wants_response()
            .build()
    }

    /// `connected`: the handshake succeeded.
    pub fn connected() -> Self {
        Self::new(events::CONNECTED)
    }

    /// `rejected` with a reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::builder()
            .with_event_id(events::REJECTED)
            .with_property("reason", reason.into())
            .build()
    }

    /// `disallowed` with a reason.
    pub fn disallowed(reason: impl Into<String>) -> Self {
        Self::builder()
            .with_event_id(events::DISALLOWED)
            .with_property("reason", reason.into())
            .build()
    }

    /// `shutdown` with a reason.
    pub fn shutdown(reason: impl Into<String>) -> Self {
        Self::builder()
            .with_event_id(events::SHUTDOWN)
            .with_property("reason", reason.into())
            .build()
    }

    /// `display` with the text to print.
    pub fn display(text: impl Into<String>) -> Self {
        Self::builder()
            .with_event_id(events::DISPLAY)
            .with_property("text", text.into())
            .build()
    }

    /// `identify`: the client's answer to `connecting`.
    pub fn identify(identity: Identity) -> Self {
        Self::builder()
            .with_event_id(events::IDENTIFY)
            .with_identity(identity)
            .build()
    }
}

/// Fluent construction of a [`Message`].
#[derive(Clone, Debug, Default)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// Set the event id.
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.message.event_id = event_id.into();
        self
    }

    /// Add or replace a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self.message.properties.insert(key.into(), value.into());
        self
    }

    /// Ask the receiver to answer.
    #[must_use]
    pub fn wants_response(mut self) -> Self {
        self.message.wants_response = true;
        self
    }

    /// Attach the sender's identity.
    #[must_use]
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.message.identity = Some(identity);
        self
    }

    /// Finish building.
    pub fn build(self) -> Message {
        self.message
    }
}
