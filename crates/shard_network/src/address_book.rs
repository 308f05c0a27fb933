//! Address book — where known remote peers can be reached.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::identity::PeerId;

/// How long an address stays valid after it is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrTtl {
    /// Never expires. Used for bootstrap peers learned out of band.
    Permanent,
    /// Expires after the given duration.
    Temporary(Duration),
}

#[derive(Debug, Clone)]
struct AddrEntry {
    addr: SocketAddr,
    expires_at: Option<DateTime<Utc>>,
}

impl AddrEntry {
    fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expiry| now < expiry)
    }
}

/// Known peer addresses, keyed by peer ID.
#[derive(Debug, Default)]
pub struct AddressBook {
    entries: HashMap<PeerId, AddrEntry>,
}

impl AddressBook {
    /// Create an empty address book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the address for a peer.
    pub fn add_addr(&mut self, peer_id: PeerId, addr: SocketAddr, ttl: AddrTtl) {
        let now = Utc::now();
        let expires_at = match ttl {
            AddrTtl::Permanent => None,
            // A TTL too large to represent never expires in practice.
            AddrTtl::Temporary(ttl) => TimeDelta::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl)),
        };
        self.entries.insert(peer_id, AddrEntry { addr, expires_at });
    }

    /// The address for a peer, if one is recorded and has not expired.
    pub fn addr_of(&self, peer_id: &PeerId) -> Option<SocketAddr> {
        self.entries
            .get(peer_id)
            .filter(|entry| entry.is_live_at(Utc::now()))
            .map(|entry| entry.addr)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn prune_expired(&mut self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live_at(now));
        before - self.entries.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
