//! PeerHost — one network endpoint with one identity.
//!
//! A [`PeerHost`] owns:
//! - a TCP listener and the task accepting inbound streams on it
//! - the protocol router that inbound streams are dispatched through
//! - an address book used to resolve peer IDs when opening streams

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::address_book::{AddrTtl, AddressBook};
use crate::error::NetworkError;
use crate::identity::{Identity, PeerId, generate_identity};
use crate::ports::PortSelector;
use crate::router::{ProtocolRouter, StreamHandler};
use crate::transport::{self, Stream};

/// A listening peer endpoint.
///
/// Accepting starts as soon as the host is bound and stops when the host is
/// dropped.
pub struct PeerHost {
    /// Our identity on the network.
    identity: Arc<Identity>,
    /// Address the listener is bound to.
    listen_addr: SocketAddr,
    /// Inbound stream handlers keyed by protocol ID.
    router: Arc<RwLock<ProtocolRouter>>,
    /// Where known remote peers can be reached.
    address_book: Arc<RwLock<AddressBook>>,
    accept_task: JoinHandle<()>,
}

impl PeerHost {
    /// Create a loopback host with an identity generated from `seed` and a
    /// port from `ports`.
    pub async fn create(seed: i64, ports: &dyn PortSelector) -> Result<Self, NetworkError> {
        let identity = generate_identity(seed)?;
        Self::listen(identity, IpAddr::V4(Ipv4Addr::LOCALHOST), ports).await
    }

    /// Bind a host for an existing identity on `ip`, taking the port from
    /// `ports`.
    pub async fn listen(
        identity: Identity,
        ip: IpAddr,
        ports: &dyn PortSelector,
    ) -> Result<Self, NetworkError> {
        let port = ports.next_port()?;
        Self::bind(identity, SocketAddr::new(ip, port)).await
    }

    /// Bind a host for an existing identity on an exact address.
    pub async fn bind(identity: Identity, addr: SocketAddr) -> Result<Self, NetworkError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| NetworkError::Bind { addr, source })?;
        let listen_addr = listener.local_addr()?;

        let identity = Arc::new(identity);
        let router = Arc::new(RwLock::new(ProtocolRouter::new()));
        let accept_task = tokio::spawn(transport::accept_loop(
            listener,
            identity.peer_id().clone(),
            Arc::clone(&router),
        ));

        debug!("Host {} listening on {listen_addr}", identity.peer_id().short());

        Ok(Self {
            identity,
            listen_addr,
            router,
            address_book: Arc::new(RwLock::new(AddressBook::new())),
            accept_task,
        })
    }

    /// Return the host's peer ID.
    pub fn peer_id(&self) -> &PeerId {
        self.identity.peer_id()
    }

    /// Return the host's identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The address the host accepts streams on.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// All addresses the host listens on.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        vec![self.listen_addr]
    }

    /// Install the handler for inbound streams speaking `protocol`.
    pub async fn set_stream_handler(&self, protocol: &str, handler: StreamHandler) {
        self.router.write().await.register(protocol, handler);
    }

    /// Whether a handler is installed for `protocol`.
    pub async fn has_stream_handler(&self, protocol: &str) -> bool {
        self.router.read().await.has_handler(protocol)
    }

    /// Record where a remote peer can be reached.
    pub async fn add_peer_addr(&self, peer_id: PeerId, addr: SocketAddr, ttl: AddrTtl) {
        debug!("Learned address {addr} for {}", peer_id.short());
        self.address_book.write().await.add_addr(peer_id, addr, ttl);
    }

    /// The address recorded for a peer, if it is still valid.
    pub async fn peer_addr(&self, peer_id: &PeerId) -> Option<SocketAddr> {
        self.address_book.read().await.addr_of(peer_id)
    }

    /// Open a stream to a known peer and negotiate `protocol` on it.
    ///
    /// Expired addresses are pruned from the address book first.
    pub async fn new_stream(
        &self,
        peer_id: &PeerId,
        protocol: &str,
    ) -> Result<Stream, NetworkError> {
        let addr = {
            let mut book = self.address_book.write().await;
            let pruned = book.prune_expired();
            if pruned > 0 {
                debug!("Pruned {pruned} expired peer addresses");
            }
            book.addr_of(peer_id)
        }
        .ok_or_else(|| NetworkError::PeerNotFound(peer_id.to_string()))?;

        info!("Opening {protocol} stream to {} at {addr}", peer_id.short());
        transport::dial(addr, self.peer_id(), peer_id, protocol).await
    }
}

impl Drop for PeerHost {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
