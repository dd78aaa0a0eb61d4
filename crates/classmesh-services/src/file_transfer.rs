//! File transfer: chunking, round-robin distribution, receive and relay.
//!
//! A file is split into fixed-size chunks; chunk `i` goes to
//! `peers[i mod len(peers)]` over its own TCP connection. Not every peer
//! receives every chunk directly. For student-originated files each
//! receiver forwards what it got to everyone else, one hop only. Teacher
//! files are never relayed, so a teacher file reaches a peer in full only
//! if round-robin placement happens to hand it every chunk. That asymmetry
//! is kept as-is.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use classmesh_core::config::{NetworkConfig, TransferConfig};
use classmesh_core::wire::{chunk_count, encode_chunk_frame, split_frame, MAX_HEADER_BYTES};
use classmesh_core::{MeshError, PeerAddress, Role, TransferHeader};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::events::{ChunkReceived, EventSink, FileComplete, Progress};
use crate::net::{Outbound, RECEIVE_TIMEOUT};
use crate::peer::PeerRegistry;
use crate::reassembly::{write_completed, ChunkOutcome, ChunkReassembly};

/// Per-chunk progress callback passed to [`FileTransferService::send_file`].
pub type SendProgress<'a> = &'a (dyn Fn(&Progress) + Send + Sync);

#[derive(Clone)]
pub struct FileTransferService {
    port: u16,
    outbound: Outbound,
    chunk_size: usize,
    max_chunk_bytes: u64,
    output_dir: PathBuf,
    registry: PeerRegistry,
    reassembly: ChunkReassembly,
    events: EventSink,
    /// Never relay to ourselves.
    local_addrs: Arc<Vec<IpAddr>>,
}

impl FileTransferService {
    pub fn new(
        network: &NetworkConfig,
        transfer: &TransferConfig,
        registry: PeerRegistry,
        events: EventSink,
        local_addrs: Vec<IpAddr>,
    ) -> Self {
        Self {
            port: network.file_port,
            outbound: Outbound::from_network(network),
            chunk_size: transfer.chunk_size.max(1),
            max_chunk_bytes: transfer.max_chunk_bytes,
            output_dir: transfer.output_dir.clone(),
            registry,
            reassembly: ChunkReassembly::new(),
            events,
            local_addrs: Arc::new(local_addrs),
        }
    }

    pub fn reassembly(&self) -> &ChunkReassembly {
        &self.reassembly
    }

    // ── Sending ──────────────────────────────────────────────────────────────

    /// Send `path` across `peers` round-robin. Returns false, after
    /// reporting the error, on the first failure; chunks already sent are
    /// not recalled.
    pub async fn send_file(
        &self,
        path: &Path,
        peers: &[PeerAddress],
        role: Role,
        sender_name: &str,
        on_progress: Option<SendProgress<'_>>,
    ) -> bool {
        match self
            .try_send_file(path, peers, role, sender_name, on_progress)
            .await
        {
            Ok(total) => {
                tracing::info!(
                    path = %path.display(),
                    chunks = total,
                    peers = peers.len(),
                    %role,
                    "file sent"
                );
                true
            }
            Err(e) => {
                self.events.error(&e);
                false
            }
        }
    }

    async fn try_send_file(
        &self,
        path: &Path,
        peers: &[PeerAddress],
        role: Role,
        sender_name: &str,
        on_progress: Option<SendProgress<'_>>,
    ) -> Result<u32, MeshError> {
        if peers.is_empty() {
            return Err(MeshError::invalid_input("no peers to send to"));
        }
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| MeshError::invalid_input(format!("{}: {e}", path.display())))?;
        if !metadata.is_file() {
            return Err(MeshError::invalid_input(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                MeshError::invalid_input(format!("{} has no usable file name", path.display()))
            })?
            .to_string();

        // Refuse files with too many chunks before reading them.
        let total_chunks = chunk_count(metadata.len(), self.chunk_size)?;

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| MeshError::io(format!("read {}", path.display()), e))?;
        if chunk_count(data.len() as u64, self.chunk_size)? != total_chunks {
            return Err(MeshError::invalid_input(format!(
                "{} changed size while being read",
                path.display()
            )));
        }

        tracing::debug!(
            %file_name,
            bytes = data.len(),
            chunks = total_chunks,
            "sending file"
        );

        for index in 0..total_chunks {
            let target = assign_target(index, peers);
            let slice = chunk_slice(&data, index as usize, self.chunk_size);
            let header = TransferHeader {
                file_name: file_name.clone(),
                chunk_id: index,
                total_chunks,
                chunk_size: slice.len() as u64,
                role,
                sender_name: sender_name.to_string(),
                relayed: false,
            };
            let frame = encode_chunk_frame(&header, slice)?;
            self.outbound
                .send_once(target.service_addr(self.port), &frame)
                .await?;

            tracing::debug!(chunk = index, to = %target.host, bytes = slice.len(), "chunk sent");
            if let Some(report) = on_progress {
                report(&Progress::new(file_name.as_str(), index + 1, total_chunks));
            }
        }

        Ok(total_chunks)
    }

    // ── Receiving ────────────────────────────────────────────────────────────

    /// Accept chunk connections until shutdown.
    pub async fn run(&self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            addr = ?listener.local_addr().ok(),
            output_dir = %self.output_dir.display(),
            "file chunk listener starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("file chunk listener shutting down");
                    return;
                }

                accepted = listener.accept() => {
                    let (stream, from) = match accepted {
                        Ok(r) => r,
                        Err(e) => {
                            self.events.error(&MeshError::io("file accept", e));
                            continue;
                        }
                    };

                    let svc = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = svc.handle_connection(stream, from).await {
                            svc.events.error(&e);
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, from: SocketAddr) -> Result<(), MeshError> {
        let (header, payload) =
            tokio::time::timeout(RECEIVE_TIMEOUT, read_chunk_frame(&mut stream, self.max_chunk_bytes))
                .await
                .map_err(|_| {
                    MeshError::framing(format!("{from} went silent before finishing a chunk"))
                })??;
        self.accept_chunk(header, payload, from.ip()).await
    }

    /// Store a chunk, finish the file if it was the last one, and relay it
    /// if the origin role calls for that.
    pub async fn accept_chunk(
        &self,
        header: TransferHeader,
        payload: Bytes,
        sender_host: IpAddr,
    ) -> Result<(), MeshError> {
        let outcome = self.reassembly.insert(&header, payload.clone())?;

        self.events.file_chunk_received(&ChunkReceived {
            file_name: header.file_name.clone(),
            chunk_index: header.chunk_id,
            total_chunks: header.total_chunks,
            bytes: payload.clone(),
            sender_host,
            role: header.role,
            sender_name: header.sender_name.clone(),
        });

        match outcome {
            ChunkOutcome::Pending { received, total } => {
                self.events
                    .progress(&Progress::new(header.file_name.as_str(), received, total));
            }
            ChunkOutcome::Complete(file) => {
                self.events.progress(&Progress::new(
                    header.file_name.as_str(),
                    file.total_chunks,
                    file.total_chunks,
                ));
                match write_completed(&self.output_dir, &file).await {
                    Ok(path) => self.events.file_complete(&FileComplete {
                        size_bytes: file.data.len() as u64,
                        file_name: file.file_name,
                        sender_name: file.sender_name,
                        path,
                    }),
                    Err(e) => self.events.error(&e),
                }
            }
        }

        if header.role.relays() && !header.relayed {
            self.relay(&header, &payload, sender_host).await;
        }
        Ok(())
    }

    /// Forward a chunk to every registered peer except its sender. Returns
    /// how many peers took it.
    async fn relay(&self, header: &TransferHeader, payload: &[u8], source: IpAddr) -> usize {
        let targets: Vec<PeerAddress> = self
            .registry
            .list_peers()
            .into_iter()
            .filter(|p| p.host != source && !self.local_addrs.contains(&p.host))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let frame = match encode_chunk_frame(&header.relayed_copy(), payload) {
            Ok(f) => f,
            Err(e) => {
                self.events.error(&e);
                return 0;
            }
        };

        let sends = targets.iter().map(|target| {
            let addr = target.service_addr(self.port);
            let frame = &frame;
            async move { self.outbound.send_once(addr, frame).await }
        });
        let results = futures::future::join_all(sends).await;

        let mut delivered = 0;
        for result in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => self.events.error(&e),
            }
        }
        tracing::debug!(
            file_name = %header.file_name,
            chunk = header.chunk_id,
            delivered,
            targets = targets.len(),
            "chunk relayed"
        );
        delivered
    }
}

/// Chunk `i` goes to `peers[i mod len(peers)]`. `peers` must be non-empty.
pub fn assign_target(chunk_index: u32, peers: &[PeerAddress]) -> PeerAddress {
    peers[chunk_index as usize % peers.len()]
}

/// Bytes of chunk `index`. Past the end of `data` this is empty, which is
/// how an empty file still yields its single chunk.
fn chunk_slice(data: &[u8], index: usize, chunk_size: usize) -> &[u8] {
    let start = index.saturating_mul(chunk_size).min(data.len());
    let end = start.saturating_add(chunk_size).min(data.len());
    &data[start..end]
}

/// Read one chunk frame: JSON header line, then exactly `chunk_size` bytes.
/// Bytes past the announced size are discarded.
pub async fn read_chunk_frame<R>(
    reader: &mut R,
    max_chunk_bytes: u64,
) -> Result<(TransferHeader, Bytes), MeshError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(4096);
    let mut scratch = [0u8; 8192];

    let (header, mut payload) = loop {
        let n = reader
            .read(&mut scratch)
            .await
            .map_err(|e| MeshError::io("read chunk header", e))?;
        if n == 0 {
            return Err(MeshError::framing(
                "connection closed before header delimiter",
            ));
        }
        buf.extend_from_slice(&scratch[..n]);

        if let Some((head, rest)) = split_frame(&buf) {
            let header = TransferHeader::parse(head)?;
            header.validate(max_chunk_bytes)?;
            break (header, rest.to_vec());
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(MeshError::framing(format!(
                "no header delimiter within {MAX_HEADER_BYTES} bytes"
            )));
        }
    };

    let size = header.chunk_size as usize;
    if payload.len() > size {
        tracing::debug!(extra = payload.len() - size, "discarding bytes past chunk");
        payload.truncate(size);
    }

    let already = payload.len();
    payload.resize(size, 0);
    if let Err(e) = reader.read_exact(&mut payload[already..]).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(MeshError::framing(format!(
                "truncated chunk {} of '{}': expected {} bytes",
                header.chunk_id, header.file_name, size
            )));
        }
        return Err(MeshError::io("read chunk payload", e));
    }

    Ok((header, Bytes::from(payload)))
}

/// "N bytes" below 1 KiB, whole KB above.
pub fn format_size(bytes: u64) -> String {
    if bytes >= 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{bytes} bytes")
    }
}
