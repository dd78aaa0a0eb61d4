//! Peer registry: every participant heard from since startup.
//!
//! Populated by the discovery loop, read by senders that need the ordered
//! peer ring. Entries are never removed: a peer seen once stays known for
//! the life of the process.

use std::net::IpAddr;
use std::sync::Arc;

use classmesh_core::PeerAddress;
use parking_lot::RwLock;

/// Name reported for peers that have not announced one.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Tracked state for a discovered peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Address the first datagram came from.
    pub address: PeerAddress,

    /// Announced display name, if any `NAME:` datagram has arrived.
    pub display_name: Option<String>,
}

/// The peer registry, shared between discovery, messaging and file tasks.
///
/// Keyed on host. Backed by a vector so iteration follows discovery order;
/// the round-robin chunk distribution depends on that order.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<Vec<PeerEntry>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer if its host is new. Returns true on insert.
    ///
    /// For a known host only the name can change, and only if none was
    /// known before.
    pub fn record_peer(&self, address: PeerAddress, display_name: Option<&str>) -> bool {
        let name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        let mut peers = self.peers.write();
        if let Some(entry) = peers.iter_mut().find(|e| e.address.host == address.host) {
            if entry.display_name.is_none() && name.is_some() {
                tracing::debug!(host = %address.host, name = ?name, "peer name learned");
                entry.display_name = name;
            }
            return false;
        }

        tracing::debug!(host = %address.host, name = ?name, "peer recorded");
        peers.push(PeerEntry {
            address,
            display_name: name,
        });
        true
    }

    /// Peer addresses in discovery order.
    pub fn list_peers(&self) -> Vec<PeerAddress> {
        self.peers.read().iter().map(|e| e.address).collect()
    }

    /// Display name of `host`, or [`UNKNOWN_NAME`].
    pub fn name_of(&self, host: IpAddr) -> String {
        self.peers
            .read()
            .iter()
            .find(|e| e.address.host == host)
            .and_then(|e| e.display_name.clone())
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }

    pub fn contains(&self, host: IpAddr) -> bool {
        self.peers.read().iter().any(|e| e.address.host == host)
    }

    /// Snapshot of all entries in discovery order.
    pub fn entries(&self) -> Vec<PeerEntry> {
        self.peers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}
