//! Bootstrap manager — provisions the rendezvous hosts for every shard.
//!
//! Provisioning is strictly sequential: shard by shard, host by host. Each
//! host gets the handshake responder installed right after it is bound, and a
//! shard's peer set is only published once all of its hosts exist. Any failure
//! aborts the whole run.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tracing::info;

use crate::error::NetworkError;
use crate::handshake::{self, PROTOCOL_ID};
use crate::host::PeerHost;
use crate::identity::{KeySource, PeerId};
use crate::ports::PortSelector;

/// Number of bootstrap hosts provisioned per shard.
pub const HOSTS_PER_SHARD: usize = 3;

/// The bootstrap hosts of one shard. Always holds exactly
/// [`HOSTS_PER_SHARD`] hosts.
pub struct ShardPeerSet {
    shard: u32,
    hosts: Vec<PeerHost>,
}

impl ShardPeerSet {
    pub fn shard(&self) -> u32 {
        self.shard
    }

    pub fn hosts(&self) -> &[PeerHost] {
        &self.hosts
    }

    /// `(peer ID, listen address)` for each host, in provisioning order.
    pub fn peer_addrs(&self) -> Vec<(PeerId, SocketAddr)> {
        self.hosts
            .iter()
            .map(|host| (host.peer_id().clone(), host.listen_addr()))
            .collect()
    }
}

/// Shard ID → bootstrap peer set.
#[derive(Default)]
pub struct BootstrapRegistry {
    shards: BTreeMap<u32, ShardPeerSet>,
}

impl BootstrapRegistry {
    /// The peer set for a shard.
    pub fn shard(&self, shard: u32) -> Option<&ShardPeerSet> {
        self.shards.get(&shard)
    }

    /// Number of shards with a published peer set.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Peer sets in shard order.
    pub fn iter(&self) -> impl Iterator<Item = &ShardPeerSet> {
        self.shards.values()
    }

    /// Every provisioned host across all shards.
    pub fn hosts(&self) -> impl Iterator<Item = &PeerHost> {
        self.shards.values().flat_map(|set| set.hosts.iter())
    }
}

/// Where the manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionState {
    Unprovisioned,
    Provisioning { shard: u32 },
    Provisioned,
    Failed,
}

/// Owns the bootstrap registry and drives its provisioning.
pub struct BootstrapManager {
    seed: i64,
    shard_count: u32,
    listen_ip: IpAddr,
    ports: Arc<dyn PortSelector>,
    state: ProvisionState,
    registry: BootstrapRegistry,
}

impl BootstrapManager {
    /// A manager for `shard_count` shards whose host identities are drawn
    /// from `seed` (`0` = secure randomness).
    pub fn new(seed: i64, shard_count: u32, ports: Arc<dyn PortSelector>) -> Self {
        Self {
            seed,
            shard_count,
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ports,
            state: ProvisionState::Unprovisioned,
            registry: BootstrapRegistry::default(),
        }
    }

    /// Bind hosts on `ip` instead of loopback.
    pub fn with_listen_ip(mut self, ip: IpAddr) -> Self {
        self.listen_ip = ip;
        self
    }

    pub fn seed(&self) -> i64 {
        self.seed
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    pub fn state(&self) -> ProvisionState {
        self.state
    }

    /// The registry, once provisioning has completed.
    pub fn registry(&self) -> Option<&BootstrapRegistry> {
        (self.state == ProvisionState::Provisioned).then_some(&self.registry)
    }

    /// Provision [`HOSTS_PER_SHARD`] hosts for every shard.
    ///
    /// Calling this again after a successful run returns the existing
    /// registry. On failure every host created so far is dropped and the
    /// manager ends up in [`ProvisionState::Failed`].
    pub async fn provision(&mut self) -> Result<&BootstrapRegistry, NetworkError> {
        if self.state == ProvisionState::Provisioned {
            return Ok(&self.registry);
        }

        self.registry = BootstrapRegistry::default();
        let mut keys = KeySource::from_seed(self.seed);
        info!(
            "Provisioning {} shards with {} identities",
            self.shard_count,
            if keys.is_deterministic() { "seeded" } else { "random" }
        );

        for shard in 0..self.shard_count {
            self.state = ProvisionState::Provisioning { shard };
            match self.provision_shard(shard, &mut keys).await {
                Ok(set) => {
                    self.registry.shards.insert(shard, set);
                    info!("Initialized bootstrap nodes for shard {shard}");
                }
                Err(e) => {
                    self.state = ProvisionState::Failed;
                    self.registry = BootstrapRegistry::default();
                    return Err(NetworkError::Provisioning {
                        shard,
                        source: Box::new(e),
                    });
                }
            }
        }

        self.state = ProvisionState::Provisioned;
        info!(
            "Initialized and running {} bootstrap nodes across {} shards",
            self.registry.hosts().count(),
            self.shard_count
        );
        Ok(&self.registry)
    }

    /// Consume the manager, yielding the registry it built.
    pub fn into_registry(self) -> BootstrapRegistry {
        self.registry
    }

    async fn provision_shard(
        &self,
        shard: u32,
        keys: &mut KeySource,
    ) -> Result<ShardPeerSet, NetworkError> {
        let mut hosts = Vec::with_capacity(HOSTS_PER_SHARD);
        while hosts.len() < HOSTS_PER_SHARD {
            let identity = keys.next_identity()?;
            let host = PeerHost::listen(identity, self.listen_ip, self.ports.as_ref()).await?;
            host.set_stream_handler(PROTOCOL_ID, handshake::responder()).await;
            info!(
                "Bootstrap node for shard {shard}: {} at {}",
                host.peer_id(),
                host.listen_addr()
            );
            hosts.push(host);
        }
        Ok(ShardPeerSet { shard, hosts })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
