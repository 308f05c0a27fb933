//! Session — provisioning and the sharding client run side by side.
//!
//! The provisioning task publishes the finished registry through a one-shot
//! channel; the client task starts its own host right away but waits on that
//! channel before it contacts any bootstrap peer.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::bootstrap::{BootstrapManager, BootstrapRegistry};
use crate::client::{HandshakeReply, ShardClient};
use crate::error::NetworkError;
use crate::ports::PortSelector;

/// Inputs for one session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Identity seed; `0` selects secure randomness.
    pub seed: i64,
    /// Shard the client joins.
    pub shard_id: u32,
    /// Number of shards to provision.
    pub shard_count: u32,
    /// Address bootstrap hosts bind on.
    pub listen_ip: IpAddr,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            seed: 0,
            shard_id: 1,
            shard_count: 5,
            listen_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }
}

/// What a completed session leaves behind.
///
/// Holding the report keeps every bootstrap host and the client listening.
pub struct SessionReport {
    pub registry: Arc<BootstrapRegistry>,
    pub client: ShardClient,
    pub replies: Vec<HandshakeReply>,
}

/// Provision the bootstrap registry and run the client handshakes against
/// it concurrently.
///
/// A provisioning error takes precedence over the client error it causes.
pub async fn run_session(
    params: SessionParams,
    ports: Arc<dyn PortSelector>,
) -> Result<SessionReport, NetworkError> {
    let (registry_tx, registry_rx) = oneshot::channel();

    let provisioning = tokio::spawn(provision_task(
        params.clone(),
        Arc::clone(&ports),
        registry_tx,
    ));
    let client = tokio::spawn(client_task(params, ports, registry_rx));

    let (provisioned, joined) = tokio::join!(provisioning, client);
    provisioned??;
    joined?
}

async fn provision_task(
    params: SessionParams,
    ports: Arc<dyn PortSelector>,
    registry_tx: oneshot::Sender<Arc<BootstrapRegistry>>,
) -> Result<(), NetworkError> {
    let mut manager = BootstrapManager::new(params.seed, params.shard_count, ports)
        .with_listen_ip(params.listen_ip);
    manager.provision().await?;

    let registry = Arc::new(manager.into_registry());
    if registry_tx.send(registry).is_err() {
        debug!("Client task is gone; bootstrap registry not delivered");
    }
    Ok(())
}

async fn client_task(
    params: SessionParams,
    ports: Arc<dyn PortSelector>,
    registry_rx: oneshot::Receiver<Arc<BootstrapRegistry>>,
) -> Result<SessionReport, NetworkError> {
    let client = ShardClient::start(params.seed, ports.as_ref()).await?;

    let registry = registry_rx.await.map_err(|_| NetworkError::Rendezvous)?;
    let replies = client.join_shard(&registry, params.shard_id).await?;
    info!(
        "Sharding client {} reached all {} bootstrap nodes of shard {}",
        client.peer_id().short(),
        replies.len(),
        params.shard_id
    );

    Ok(SessionReport {
        registry,
        client,
        replies,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
