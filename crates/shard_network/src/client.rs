//! Sharding client — joins a shard by handshaking with its bootstrap peers.

use std::net::SocketAddr;

use tracing::info;

use crate::address_book::AddrTtl;
use crate::bootstrap::{BootstrapRegistry, ShardPeerSet};
use crate::error::NetworkError;
use crate::handshake::{self, PROTOCOL_ID};
use crate::host::PeerHost;
use crate::identity::PeerId;
use crate::ports::PortSelector;

/// The reply one bootstrap peer gave to the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeReply {
    pub peer_id: PeerId,
    pub addr: SocketAddr,
    pub reply: Vec<u8>,
}

/// A client peer that contacts the bootstrap peers of one shard.
pub struct ShardClient {
    host: PeerHost,
}

impl ShardClient {
    /// Create the client's host, with an identity drawn from `seed`.
    pub async fn start(seed: i64, ports: &dyn PortSelector) -> Result<Self, NetworkError> {
        let host = PeerHost::create(seed, ports).await?;
        info!("Started sharding client with node addr {}", host.listen_addr());
        Ok(Self { host })
    }

    pub fn host(&self) -> &PeerHost {
        &self.host
    }

    pub fn peer_id(&self) -> &PeerId {
        self.host.peer_id()
    }

    /// Record the addresses of a shard's bootstrap peers. They are learned
    /// out of band, so they never expire.
    pub async fn learn_bootstrap_peers(&self, set: &ShardPeerSet) {
        for (peer_id, addr) in set.peer_addrs() {
            self.host.add_peer_addr(peer_id, addr, AddrTtl::Permanent).await;
        }
    }

    /// Handshake with one known peer.
    pub async fn handshake(&self, peer_id: &PeerId) -> Result<HandshakeReply, NetworkError> {
        let mut stream = self.host.new_stream(peer_id, PROTOCOL_ID).await?;
        let reply = handshake::initiate(&mut stream).await?;
        info!(
            "Reply from bootstrap node {}: {:?}",
            peer_id.short(),
            String::from_utf8_lossy(&reply)
        );
        Ok(HandshakeReply {
            peer_id: peer_id.clone(),
            addr: stream.remote_addr(),
            reply,
        })
    }

    /// Learn the bootstrap peers of `shard` and handshake with each of them
    /// in turn. The first failure ends the run.
    pub async fn join_shard(
        &self,
        registry: &BootstrapRegistry,
        shard: u32,
    ) -> Result<Vec<HandshakeReply>, NetworkError> {
        let set = registry
            .shard(shard)
            .ok_or(NetworkError::UnknownShard(shard))?;

        info!("Opening connections to bootstrap nodes of shard {shard}");
        self.learn_bootstrap_peers(set).await;

        let mut replies = Vec::with_capacity(set.hosts().len());
        for host in set.hosts() {
            replies.push(self.handshake(host.peer_id()).await?);
        }
        Ok(replies)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bootstrap::{BootstrapManager, HOSTS_PER_SHARD};
    use crate::handshake::GREETING;
    use crate::ports::EphemeralPortSelector;

    async fn provisioned(shards: u32) -> BootstrapRegistry {
        let mut manager = BootstrapManager::new(0, shards, Arc::new(EphemeralPortSelector));
        manager.provision().await.unwrap();
        manager.into_registry()
    }

    #[tokio::test]
    async fn test_join_shard_handshakes_with_every_peer() {
        let registry = provisioned(3).await;
        let client = ShardClient::start(0, &EphemeralPortSelector).await.unwrap();

        let replies = client.join_shard(&registry, 1).await.unwrap();
        assert_eq!(replies.len(), HOSTS_PER_SHARD);

        let set = registry.shard(1).unwrap();
        for (reply, host) in replies.iter().zip(set.hosts()) {
            assert_eq!(&reply.peer_id, host.peer_id());
            assert_eq!(reply.addr, host.listen_addr());
            assert_eq!(reply.reply, GREETING);
        }
    }

    #[tokio::test]
    async fn test_repeated_handshakes_get_same_reply() {
        let registry = provisioned(1).await;
        let client = ShardClient::start(0, &EphemeralPortSelector).await.unwrap();
        let set = registry.shard(0).unwrap();
        client.learn_bootstrap_peers(set).await;

        let target = set.hosts()[0].peer_id();
        for _ in 0..5 {
            let reply = client.handshake(target).await.unwrap();
            assert_eq!(reply.reply, GREETING);
        }
    }

    #[tokio::test]
    async fn test_learned_peers_are_permanent() {
        let registry = provisioned(1).await;
        let client = ShardClient::start(0, &EphemeralPortSelector).await.unwrap();
        let set = registry.shard(0).unwrap();
        client.learn_bootstrap_peers(set).await;

        for host in set.hosts() {
            assert_eq!(
                client.host().peer_addr(host.peer_id()).await,
                Some(host.listen_addr())
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_shard() {
        let registry = provisioned(2).await;
        let client = ShardClient::start(0, &EphemeralPortSelector).await.unwrap();

        match client.join_shard(&registry, 7).await {
            Err(NetworkError::UnknownShard(7)) => {}
            other => panic!("Expected UnknownShard, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handshake_unknown_peer_fails() {
        let client = ShardClient::start(0, &EphemeralPortSelector).await.unwrap();
        let result = client.handshake(&PeerId::from_string("nobody")).await;
        assert!(matches!(result, Err(NetworkError::PeerNotFound(_))));
    }

    #[tokio::test]
    async fn test_seeded_client_identity_is_reproducible() {
        let a = ShardClient::start(42, &EphemeralPortSelector).await.unwrap();
        let b = ShardClient::start(42, &EphemeralPortSelector).await.unwrap();
        assert_eq!(a.peer_id(), b.peer_id());
    }
}
