//! classmesh integration test harness.
//!
//! Every node runs in-process and binds its own loopback alias
//! (127.0.x.y), so several nodes share the same ports the way machines on
//! a LAN would. Each test owns a distinct 127.0.x.0/24 block and never
//! touches another test's addresses.
//!
//! Loopback aliases beyond 127.0.0.1 are routable out of the box on
//! Linux. Elsewhere the tests skip.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use classmesh_core::config::MeshConfig;
use classmesh_core::{ErrorKind, PeerAddress, Role};
use classmesh_services::{ChunkReceived, EventSink, FileComplete, MeshNode, ReceivedMessage};
use parking_lot::Mutex;

mod discovery;
mod files;
mod messaging;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const DISCOVERY_PORT: u16 = 47080;
pub const FILE_PORT: u16 = 47081;
pub const MESSAGE_PORT: u16 = 47082;

/// Whether addresses other than 127.0.0.1 can be bound.
pub fn loopback_aliases_available() -> bool {
    std::net::UdpSocket::bind("127.0.0.2:0").is_ok()
}

pub fn skip_unless_ready() -> bool {
    if loopback_aliases_available() {
        return true;
    }
    eprintln!("SKIP: loopback aliases (127.0.0.2 and up) are not bindable here");
    false
}

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Scratch directory unique to this process and tag.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("classmesh-it-{}-{tag}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Config for a node on `host` whose broadcasts go to `broadcast`.
pub fn node_config(host: &str, broadcast: &str, name: &str, role: Role) -> MeshConfig {
    let mut config = MeshConfig::default();
    config.identity.display_name = name.to_string();
    config.identity.role = role;
    config.network.bind_addr = ip(host);
    config.network.broadcast_addr = ip(broadcast);
    config.network.discovery_port = DISCOVERY_PORT;
    config.network.file_port = FILE_PORT;
    config.network.message_port = MESSAGE_PORT;
    config.transfer.output_dir = scratch_dir(&format!("recv-{host}"));
    config
}

/// Everything a node's event sink saw.
#[derive(Default)]
pub struct Recorder {
    pub peers: Mutex<Vec<IpAddr>>,
    pub messages: Mutex<Vec<ReceivedMessage>>,
    pub chunks: Mutex<Vec<ChunkReceived>>,
    pub completed: Mutex<Vec<FileComplete>>,
    pub errors: Mutex<Vec<ErrorKind>>,
}

impl Recorder {
    pub fn chunk_indices(&self, file_name: &str) -> Vec<u32> {
        let mut indices: Vec<u32> = self
            .chunks
            .lock()
            .iter()
            .filter(|c| c.file_name == file_name)
            .map(|c| c.chunk_index)
            .collect();
        indices.sort_unstable();
        indices
    }
}

pub fn recording_sink() -> (EventSink, Arc<Recorder>) {
    let events = EventSink::new();
    let recorder = Arc::new(Recorder::default());

    let r = recorder.clone();
    events.on_peer_discovered(move |host| r.peers.lock().push(host));
    let r = recorder.clone();
    events.on_message_received(move |m| r.messages.lock().push(m.clone()));
    let r = recorder.clone();
    events.on_file_chunk_received(move |c| r.chunks.lock().push(c.clone()));
    let r = recorder.clone();
    events.on_file_complete(move |f| r.completed.lock().push(f.clone()));
    let r = recorder.clone();
    events.on_error(move |e| r.errors.lock().push(e.kind()));

    (events, recorder)
}

/// A running node plus what it recorded.
pub struct TestNode {
    pub node: MeshNode,
    pub seen: Arc<Recorder>,
    pub host: IpAddr,
}

impl TestNode {
    pub async fn start(host: &str, broadcast: &str, name: &str, role: Role) -> Self {
        let (events, seen) = recording_sink();
        let node = MeshNode::start(node_config(host, broadcast, name, role), events)
            .await
            .unwrap();
        Self {
            node,
            seen,
            host: ip(host),
        }
    }

    /// A node that only ever broadcasts to itself; peers come from
    /// [`introduce`].
    pub async fn isolated(host: &str, name: &str, role: Role) -> Self {
        Self::start(host, host, name, role).await
    }

    pub fn output_dir(&self) -> PathBuf {
        self.node.config().transfer.output_dir.clone()
    }

    pub async fn stop(self) {
        let dir = self.output_dir();
        self.node.shutdown().await;
        let _ = std::fs::remove_dir_all(dir);
    }
}

/// Register every node with every other, in slice order.
pub fn introduce(nodes: &[&TestNode]) {
    for node in nodes {
        for other in nodes {
            if other.host != node.host {
                node.node
                    .registry()
                    .record_peer(PeerAddress::new(other.host, DISCOVERY_PORT), None);
            }
        }
    }
}

/// Poll `condition` every 20 ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Deterministic non-repeating-per-chunk contents.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 4096) % 251) as u8).collect()
}
