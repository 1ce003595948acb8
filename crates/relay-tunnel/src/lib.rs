#![warn(missing_docs)]

//! Relay tunnels: ordered, chunked, credit flow-controlled message streams
//! multiplexed over a single connection to a relay process.
//!
//! A [`Connection`] owns the registry of live tunnels and dispatches relay
//! events to them. Each [`Tunnel`] splits outbound messages into chunks no
//! larger than the negotiated chunk limit, waits for send allowance granted by
//! the peer, reassembles inbound chunks into whole messages, and repays the
//! peer's allowance as the application consumes them.

pub mod allowance;
pub mod chunk;
pub mod config;
pub mod connection;
pub mod deadline;
pub mod error;
pub mod handshake;
pub mod inbound;
pub mod loopback;
pub mod relay;
pub mod signal;
pub mod tunnel;

pub use config::TunnelConfig;
pub use connection::{Connection, IncomingTunnels};
pub use error::{Result, TunnelError};
pub use relay::Relay;
pub use tunnel::Tunnel;

/// Identifier of a tunnel, unique within its owning connection.
pub type TunnelId = u64;
