//! Shard handshake — the reachability probe between a sharding client and
//! its bootstrap peers.
//!
//! The client writes [`GREETING`] and half-closes; the bootstrap peer reads
//! everything, writes [`GREETING`] back and closes. The reply is the same
//! constant whatever the client sent.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{info, warn};

use crate::identity::PeerId;
use crate::router::StreamHandler;
use crate::transport::Stream;

/// Sub-protocol ID both sides must agree on.
pub const PROTOCOL_ID: &str = "/shardprotocol/1";

/// The literal greeting sent in both directions.
pub const GREETING: &[u8] = b"Hello, Shard!";

/// The operations the handshake needs from a stream.
#[async_trait]
pub trait HandshakeStream: Send {
    fn remote_peer(&self) -> &PeerId;

    async fn read_to_end(&mut self) -> io::Result<Vec<u8>>;

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Signal end-of-stream to the remote side.
    async fn close(&mut self) -> io::Result<()>;

    /// Tear the stream down abruptly.
    fn reset(&mut self);
}

#[async_trait]
impl HandshakeStream for Stream {
    fn remote_peer(&self) -> &PeerId {
        Stream::remote_peer(self)
    }

    async fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        Stream::read_to_end(self).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Stream::write_all(self, buf).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.close_write().await
    }

    fn reset(&mut self) {
        Stream::reset(self)
    }
}

/// How the responder finished a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderOutcome {
    Closed,
    Reset,
}

/// Serve one inbound handshake stream.
///
/// Any read or write failure resets the stream; the error stays local to
/// this connection.
pub async fn respond<S: HandshakeStream>(mut stream: S) -> ResponderOutcome {
    info!(
        "Bootstrap node got a new incoming connection from {}",
        stream.remote_peer().short()
    );

    match reply(&mut stream).await {
        Ok(()) => {
            if let Err(e) = stream.close().await {
                warn!("Closing handshake stream failed: {e}");
            }
            ResponderOutcome::Closed
        }
        Err(e) => {
            warn!(
                "Handshake with {} failed, resetting stream: {e}",
                stream.remote_peer().short()
            );
            stream.reset();
            ResponderOutcome::Reset
        }
    }
}

async fn reply<S: HandshakeStream>(stream: &mut S) -> io::Result<()> {
    let received = stream.read_to_end().await?;
    info!(
        "Received message from sharding client: {:?}",
        String::from_utf8_lossy(&received)
    );
    stream.write_all(GREETING).await
}

/// The stream handler installed on every bootstrap host.
pub fn responder() -> StreamHandler {
    Arc::new(|stream: Stream| {
        async move {
            respond(stream).await;
        }
        .boxed()
    })
}

/// Run the client side of the handshake and return the peer's reply.
pub async fn initiate<S: HandshakeStream>(stream: &mut S) -> io::Result<Vec<u8>> {
    stream.write_all(GREETING).await?;
    stream.close().await?;
    stream.read_to_end().await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
