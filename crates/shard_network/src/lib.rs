//! Shard Network — bootstrap peers and the client that joins a shard.
//!
//! This crate provisions a fixed set of bootstrap hosts for every shard and
//! runs a sharding client that handshakes with the bootstrap hosts of the
//! shard it wants to join.
//!
//! # Architecture
//!
//! - **Identity**: Ed25519 keys; a peer ID is the hex SHA-256 of the public
//!   key. A non-zero seed makes identities reproducible.
//! - **Transport**: plain TCP with a line-based preamble (peer IDs, then the
//!   protocol ID) followed by raw bytes.
//! - **Routing**: inbound streams are dispatched by protocol ID.
//! - **Handshake**: `/shardprotocol/1`, one request and one fixed reply.
//! - **Session**: provisioning and the client run concurrently and meet on a
//!   one-shot channel.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shard_network::{RandomPortSelector, SessionParams, run_session};
//!
//! # async fn example() -> Result<(), shard_network::NetworkError> {
//! let params = SessionParams { seed: 42, ..SessionParams::default() };
//! let report = run_session(params, Arc::new(RandomPortSelector::default())).await?;
//! assert_eq!(report.replies.len(), 3);
//! # Ok(())
//! # }
//! ```

pub mod address_book;
pub mod bootstrap;
pub mod client;
pub mod error;
pub mod handshake;
pub mod host;
pub mod identity;
pub mod ports;
pub mod router;
pub mod session;
pub mod transport;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use address_book::{AddrTtl, AddressBook};
pub use bootstrap::{
    BootstrapManager, BootstrapRegistry, HOSTS_PER_SHARD, ProvisionState, ShardPeerSet,
};
pub use client::{HandshakeReply, ShardClient};
pub use error::NetworkError;
pub use handshake::{GREETING, PROTOCOL_ID};
pub use host::PeerHost;
pub use identity::{Identity, KeySource, PeerId, generate_identity};
pub use ports::{DEFAULT_PORT_RANGE, EphemeralPortSelector, PortSelector, RandomPortSelector};
pub use session::{SessionParams, SessionReport, run_session};
