//! Peer discovery over UDP broadcast.
//!
//! One socket, bound to the discovery port, both sends broadcasts and
//! receives. Replies therefore come back to the listening port, which is
//! what lets a `DISCOVER_PEER` / `PEER_ACK` exchange register both sides.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use classmesh_core::config::NetworkConfig;
use classmesh_core::wire::{MAX_DATAGRAM_BYTES, NAME_PREFIX};
use classmesh_core::{DiscoveryDatagram, MeshError, PeerAddress};
use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::events::EventSink;
use crate::peer::PeerRegistry;

pub struct DiscoveryService {
    socket: Arc<UdpSocket>,
    broadcast_target: SocketAddr,
    registry: PeerRegistry,
    events: EventSink,
    /// Our own addresses. Datagrams from these are our broadcasts looping back.
    local_addrs: Vec<IpAddr>,
    /// Name sent in `NAME:` datagrams, if one has been announced.
    display_name: RwLock<Option<String>>,
}

impl DiscoveryService {
    /// Bind the discovery socket. Must be called inside a tokio runtime.
    pub fn bind(network: &NetworkConfig, registry: PeerRegistry, events: EventSink) -> Result<Self> {
        let bind_addr = network.discovery_bind();
        let socket = make_discovery_socket(bind_addr)
            .with_context(|| format!("failed to create discovery socket on {bind_addr}"))?;
        let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

        let broadcast_target = network.broadcast_target();
        let local_addrs = local_addresses(network.bind_addr, broadcast_target);
        tracing::debug!(?local_addrs, "local addresses for self-filtering");

        Ok(Self {
            socket: Arc::new(socket),
            broadcast_target,
            registry,
            events,
            local_addrs,
            display_name: RwLock::new(None),
        })
    }

    /// Broadcast `DISCOVER_PEER`. Failures go to the event sink.
    pub async fn announce(&self) {
        self.send(&DiscoveryDatagram::Discover, self.broadcast_target)
            .await;
    }

    /// Broadcast `NAME:<name>` and remember the name for replies.
    pub async fn announce_name(&self, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            self.events
                .error(&MeshError::invalid_input("cannot announce an empty name"));
            return;
        }
        if NAME_PREFIX.len() + name.len() > MAX_DATAGRAM_BYTES {
            self.events.error(&MeshError::invalid_input(format!(
                "name of {} bytes does not fit a {MAX_DATAGRAM_BYTES}-byte datagram",
                name.len()
            )));
            return;
        }
        *self.display_name.write() = Some(name.to_string());
        self.send(&DiscoveryDatagram::Name(name.to_string()), self.broadcast_target)
            .await;
    }

    async fn send(&self, datagram: &DiscoveryDatagram, dest: SocketAddr) {
        match self.socket.send_to(&datagram.to_bytes(), dest).await {
            Ok(n) => tracing::trace!(bytes = n, %dest, "discovery datagram sent"),
            Err(e) => self
                .events
                .error(&MeshError::io(format!("discovery send to {dest}"), e)),
        }
    }

    /// Receive datagrams until shutdown. Errors are reported and the loop
    /// continues.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];

        tracing::info!(
            addr = ?self.socket.local_addr().ok(),
            broadcast = %self.broadcast_target,
            "discovery listener starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("discovery listener shutting down");
                    return;
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            self.events.error(&MeshError::io("discovery recv_from", e));
                            continue;
                        }
                    };

                    if self.local_addrs.contains(&from.ip()) {
                        tracing::trace!(%from, "ignoring own datagram");
                        continue;
                    }

                    if len == buf.len() {
                        tracing::debug!(
                            %from,
                            len,
                            "discovery datagram filled the buffer, may be truncated"
                        );
                    }
                    let Some(datagram) = DiscoveryDatagram::parse(&buf[..len]) else {
                        tracing::trace!(%from, len, "ignoring unrelated datagram");
                        continue;
                    };

                    for reply in self.process(datagram, from) {
                        self.send(&reply, from).await;
                    }
                }
            }
        }
    }

    /// Apply one datagram to the registry and return the unicast replies.
    fn process(&self, datagram: DiscoveryDatagram, from: SocketAddr) -> Vec<DiscoveryDatagram> {
        let address = PeerAddress::from(from);
        match datagram {
            DiscoveryDatagram::Discover => {
                if self.registry.record_peer(address, None) {
                    self.events.peer_discovered(from.ip());
                }
                // The ack registers us on their side; the name lets a late
                // joiner learn who we are without waiting for our next
                // broadcast.
                let mut replies = vec![DiscoveryDatagram::Ack];
                if let Some(name) = self.display_name.read().clone() {
                    replies.push(DiscoveryDatagram::Name(name));
                }
                replies
            }
            DiscoveryDatagram::Ack => {
                if self.registry.record_peer(address, None) {
                    self.events.peer_discovered(from.ip());
                }
                Vec::new()
            }
            DiscoveryDatagram::Name(name) => {
                tracing::debug!(%from, %name, "name announcement");
                if self.registry.record_peer(address, Some(&name)) {
                    self.events.peer_discovered(from.ip());
                }
                Vec::new()
            }
        }
    }

    pub fn local_addrs(&self) -> &[IpAddr] {
        &self.local_addrs
    }
}

/// Create a UDP socket that can send to the broadcast address and shares the
/// port with other processes on the same host.
fn make_discovery_socket(bind_addr: SocketAddr) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, Some(Protocol::UDP))
        .context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    if bind_addr.is_ipv4() {
        socket.set_broadcast(true).context("SO_BROADCAST")?;
    }
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket.bind(&bind_addr.into()).context("bind()")?;

    Ok(socket.into())
}

/// Addresses this host sends from.
///
/// A concrete bind address is the only source our datagrams can carry.
/// For a wildcard bind, probe which local address routes towards the
/// broadcast target and add the loopbacks.
fn local_addresses(bind: IpAddr, broadcast_target: SocketAddr) -> Vec<IpAddr> {
    if !bind.is_unspecified() {
        return vec![bind];
    }

    let mut addrs = vec![IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)];
    let probe = std::net::UdpSocket::bind(SocketAddr::new(bind, 0)).and_then(|probe| {
        probe.set_broadcast(true)?;
        probe.connect(broadcast_target)?;
        probe.local_addr()
    });
    match probe {
        Ok(addr) if !addr.ip().is_unspecified() => addrs.push(addr.ip()),
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "local address probe failed"),
    }
    addrs
}
