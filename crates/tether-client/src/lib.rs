//! # tether-client
//!
//! Client side of the tether session engine.
//!
//! - Connect with a bounded dial and an identity answer to `connecting`
//! - Debug/Release failure policy on connect via [`tether_core::BuildMode`]
//! - Listener task that routes answers to pending requests and dispatches
//!   everything else to handlers registered with [`NetClient::on`]

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod errors;

pub use client::NetClient;
pub use config::ClientConfig;
pub use errors::{ClientError, Result};
