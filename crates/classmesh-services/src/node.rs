//! MeshNode: owns every service and background task of one participant.
//!
//! Construction binds all sockets up front so a port conflict fails
//! `start` instead of surfacing later as a background error. The three
//! listener loops share one broadcast shutdown channel.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use classmesh_core::config::MeshConfig;
use classmesh_core::MeshError;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::discovery::DiscoveryService;
use crate::events::EventSink;
use crate::file_transfer::{FileTransferService, SendProgress};
use crate::messaging_service::MessagingService;
use crate::net::Outbound;
use crate::peer::PeerRegistry;
use crate::reassembly::ChunkReassembly;

pub struct MeshNode {
    config: MeshConfig,
    registry: PeerRegistry,
    events: EventSink,
    discovery: Arc<DiscoveryService>,
    messaging: MessagingService,
    files: FileTransferService,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl MeshNode {
    /// Bind all listeners, start their loops, then announce ourselves.
    pub async fn start(config: MeshConfig, events: EventSink) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let network = &config.network;
        let registry = PeerRegistry::new();

        let discovery = Arc::new(DiscoveryService::bind(
            network,
            registry.clone(),
            events.clone(),
        )?);

        let message_bind = network.message_bind();
        let message_listener = TcpListener::bind(message_bind)
            .await
            .with_context(|| format!("failed to bind message listener on {message_bind}"))?;

        let file_bind = network.file_bind();
        let file_listener = TcpListener::bind(file_bind)
            .await
            .with_context(|| format!("failed to bind file listener on {file_bind}"))?;

        let messaging = MessagingService::new(
            network.message_port,
            Outbound::from_network(network),
            events.clone(),
        );
        let files = FileTransferService::new(
            network,
            &config.transfer,
            registry.clone(),
            events.clone(),
            discovery.local_addrs().to_vec(),
        );

        // ── Spawn tasks ──────────────────────────────────────────────────────

        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let discovery_task = {
            let discovery = discovery.clone();
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move { discovery.run(shutdown).await })
        };
        let message_task = {
            let messaging = messaging.clone();
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move { messaging.run(message_listener, shutdown).await })
        };
        let file_task = {
            let files = files.clone();
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move { files.run(file_listener, shutdown).await })
        };

        let node = Self {
            config,
            registry,
            events,
            discovery,
            messaging,
            files,
            shutdown_tx,
            tasks: vec![discovery_task, message_task, file_task],
        };

        node.announce().await;
        node.announce_name(&node.config.identity.display_name).await;

        tracing::info!(
            name = %node.config.identity.display_name,
            role = %node.config.identity.role,
            bind = %node.config.network.bind_addr,
            "mesh node started"
        );
        Ok(node)
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn reassembly(&self) -> &ChunkReassembly {
        self.files.reassembly()
    }

    /// Broadcast `DISCOVER_PEER`.
    pub async fn announce(&self) {
        self.discovery.announce().await;
    }

    /// Broadcast `NAME:<name>`.
    pub async fn announce_name(&self, name: &str) {
        self.discovery.announce_name(name).await;
    }

    /// Send one text message to `host` under our display name.
    pub async fn send_message(&self, host: IpAddr, text: &str) -> bool {
        self.messaging
            .send_message(host, text, &self.config.identity.display_name)
            .await
    }

    /// Send `text` to every known peer. Returns how many accepted it.
    pub async fn broadcast_message(&self, text: &str) -> usize {
        if text.trim().is_empty() {
            self.events
                .error(&MeshError::invalid_input("cannot send an empty message"));
            return 0;
        }
        let peers = self.registry.list_peers();
        if peers.is_empty() {
            self.events
                .error(&MeshError::invalid_input("no peers to message"));
            return 0;
        }

        let sends = peers.iter().map(|p| self.send_message(p.host, text));
        let delivered = futures::future::join_all(sends)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();
        tracing::info!(delivered, peers = peers.len(), "message broadcast");
        delivered
    }

    /// Send a file to the current peer list under our role and name.
    pub async fn send_file(&self, path: &Path, on_progress: Option<SendProgress<'_>>) -> bool {
        let peers = self.registry.list_peers();
        self.files
            .send_file(
                path,
                &peers,
                self.config.identity.role,
                &self.config.identity.display_name,
                on_progress,
            )
            .await
    }

    /// Stop every listener loop and wait for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "node task ended abnormally");
            }
        }
        tracing::info!("mesh node stopped");
    }
}
