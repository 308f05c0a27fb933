//! Network error types.

use std::net::SocketAddr;

/// Errors that can occur in the shard_network crate.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Key material could not be drawn or turned into a signing key.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// A host could not bind its listen address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Every port in the configured range has already been handed out.
    #[error("No free port left in {start}..{end}")]
    PortsExhausted { start: u16, end: u16 },

    /// The address book has no (live) address for the requested peer.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// The bootstrap registry has no peer set for the requested shard.
    #[error("Unknown shard: {0}")]
    UnknownShard(u32),

    /// The remote host has no handler for the requested protocol.
    #[error("Protocol {protocol} not supported by {peer}")]
    ProtocolNotSupported { protocol: String, peer: String },

    /// The remote host identified itself with an unexpected peer ID.
    #[error("Dialed {expected} but remote identified as {actual}")]
    PeerIdMismatch { expected: String, actual: String },

    /// The stream negotiation preamble was malformed.
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Provisioning of a shard's bootstrap set failed.
    #[error("Provisioning shard {shard} failed: {source}")]
    Provisioning {
        shard: u32,
        #[source]
        source: Box<NetworkError>,
    },

    /// The provisioning task went away without publishing a registry.
    #[error("Bootstrap registry was never published")]
    Rendezvous,

    /// A background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
