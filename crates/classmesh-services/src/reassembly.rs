//! Chunk reassembly: per-file accumulation of out-of-order chunks.
//!
//! Chunks are keyed strictly by index, never by arrival order. A transfer
//! is removed the moment its last missing index arrives; the caller then
//! owns the reconstructed bytes.
//!
//! A second upload reusing a file name while the first is still incomplete
//! merges into the same accumulator. The first transfer's `total_chunks`
//! is kept.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use classmesh_core::{MeshError, TransferHeader};
use dashmap::DashMap;

/// In-progress reassembly state for one file name.
#[derive(Debug)]
struct InFlightTransfer {
    chunks: BTreeMap<u32, Bytes>,
    total_chunks: u32,
    sender_name: String,
    started_at: Instant,
}

impl InFlightTransfer {
    fn new(header: &TransferHeader) -> Self {
        Self {
            chunks: BTreeMap::new(),
            total_chunks: header.total_chunks,
            sender_name: header.sender_name.clone(),
            started_at: Instant::now(),
        }
    }

    fn received(&self) -> u32 {
        self.chunks.len() as u32
    }

    fn is_complete(&self) -> bool {
        self.received() == self.total_chunks
    }

    /// `chunks[0] || chunks[1] || ... || chunks[total - 1]`.
    fn concat(&self) -> Vec<u8> {
        let size = self.chunks.values().map(Bytes::len).sum();
        let mut data = Vec::with_capacity(size);
        for chunk in self.chunks.values() {
            data.extend_from_slice(chunk);
        }
        data
    }
}

/// A fully reassembled file, handed over to the caller.
#[derive(Debug, Clone)]
pub struct CompletedFile {
    pub file_name: String,
    pub data: Vec<u8>,
    pub total_chunks: u32,
    pub sender_name: String,
}

/// Result of feeding one chunk into the buffer.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Still waiting for more chunks.
    Pending { received: u32, total: u32 },
    /// The chunk completed the file.
    Complete(CompletedFile),
}

/// Tracks files being reassembled from incoming chunks.
///
/// Accumulators for different file names are independent; DashMap shards
/// mean they never contend on a single lock.
#[derive(Debug, Clone, Default)]
pub struct ChunkReassembly {
    active: Arc<DashMap<String, InFlightTransfer>>,
}

impl ChunkReassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one chunk. A repeated index overwrites the earlier bytes.
    pub fn insert(&self, header: &TransferHeader, data: Bytes) -> Result<ChunkOutcome, MeshError> {
        if header.total_chunks == 0 || header.chunk_id >= header.total_chunks {
            return Err(MeshError::framing(format!(
                "chunk {} of {} is out of range",
                header.chunk_id, header.total_chunks
            )));
        }

        let (received, total) = {
            let mut transfer = self
                .active
                .entry(header.file_name.clone())
                .or_insert_with(|| InFlightTransfer::new(header));

            if header.chunk_id >= transfer.total_chunks {
                return Err(MeshError::framing(format!(
                    "chunk {} does not fit in-flight '{}' of {} chunks",
                    header.chunk_id, header.file_name, transfer.total_chunks
                )));
            }
            if header.total_chunks != transfer.total_chunks {
                tracing::warn!(
                    file_name = %header.file_name,
                    in_flight = transfer.total_chunks,
                    incoming = header.total_chunks,
                    "chunk count differs from in-flight transfer of the same name, merging"
                );
            }

            transfer.chunks.insert(header.chunk_id, data);
            (transfer.received(), transfer.total_chunks)
        };

        if received < total {
            return Ok(ChunkOutcome::Pending { received, total });
        }

        // Another task may have completed the same transfer in between.
        match self
            .active
            .remove_if(&header.file_name, |_, t| t.is_complete())
        {
            Some((file_name, transfer)) => {
                tracing::debug!(
                    file_name = %file_name,
                    chunks = transfer.total_chunks,
                    elapsed_ms = transfer.started_at.elapsed().as_millis() as u64,
                    "transfer complete"
                );
                Ok(ChunkOutcome::Complete(CompletedFile {
                    data: transfer.concat(),
                    total_chunks: transfer.total_chunks,
                    sender_name: transfer.sender_name,
                    file_name,
                }))
            }
            None => Ok(ChunkOutcome::Pending { received, total }),
        }
    }

    /// Indices not yet received for `file_name`, or `None` if not in flight.
    pub fn missing_chunks(&self, file_name: &str) -> Option<Vec<u32>> {
        self.active.get(file_name).map(|t| {
            (0..t.total_chunks)
                .filter(|i| !t.chunks.contains_key(i))
                .collect()
        })
    }

    /// `(received, total)` for an in-flight file.
    pub fn progress(&self, file_name: &str) -> Option<(u32, u32)> {
        self.active
            .get(file_name)
            .map(|t| (t.received(), t.total_chunks))
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Final path component of a wire file name, or `None` if nothing usable
/// is left. Keeps received files inside the output directory.
pub fn safe_file_name(name: &str) -> Option<&str> {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next()?.trim();
    match base {
        "" | "." | ".." => None,
        b => Some(b),
    }
}

/// Write a completed file into `output_dir`, creating it if needed.
pub async fn write_completed(output_dir: &Path, file: &CompletedFile) -> Result<PathBuf, MeshError> {
    let name = safe_file_name(&file.file_name).ok_or_else(|| {
        MeshError::framing(format!("unusable file name '{}'", file.file_name))
    })?;

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| MeshError::io(format!("create {}", output_dir.display()), e))?;

    let path = output_dir.join(name);
    tokio::fs::write(&path, &file.data)
        .await
        .map_err(|e| MeshError::io(format!("write {}", path.display()), e))?;
    Ok(path)
}
