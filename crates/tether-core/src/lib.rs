//! # tether-core
//!
//! Shared vocabulary for the tether server and client:
//!
//! - **Resource compiler**: [`resource::lexer`] turns `event?key=value&key2='literal'`
//!   text into tokens, [`resource::engine`] assembles them into a [`Message`]
//! - **Message model**: [`Message`], [`MessageBuilder`] and the well-known handshake messages
//! - **Identities**: [`Identity`] plus the [`Identifier`] capability and [`AddressBy`] selector
//! - **Event dispatch**: [`EventTable`] mapping event ids to ordered handlers
//! - **Transport**: [`Connection`], a length-delimited JSON framing over TCP
//! - **Errors**: grammar, resource and transport errors via `thiserror`
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod events;
pub mod identity;
pub mod logging;
pub mod message;
pub mod mode;
pub mod resource;

pub use connection::Connection;
pub use errors::{LexError, ResourceError, TransportError};
pub use events::{EventTable, Handler};
pub use identity::{AddressBy, Identifier, Identity};
pub use message::{Message, MessageBuilder, Properties};
pub use mode::BuildMode;
pub use resource::engine::ResourceEngine;
