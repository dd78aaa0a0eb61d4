//! Event sink: the callback boundary towards whatever presents events.
//!
//! Handlers are optional and may be set or replaced at any time after the
//! node is built. They are called synchronously on the task that detected
//! the event; a UI must marshal onto its own thread itself.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use classmesh_core::{MeshError, Role};
use parking_lot::RwLock;

/// A text message that arrived on the message port.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub text: String,
    pub sender_host: IpAddr,
    pub sender_name: String,
}

/// One chunk accepted by the file listener.
#[derive(Debug, Clone)]
pub struct ChunkReceived {
    pub file_name: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub bytes: Bytes,
    pub sender_host: IpAddr,
    pub role: Role,
    pub sender_name: String,
}

/// A file fully reassembled and written to disk.
#[derive(Debug, Clone)]
pub struct FileComplete {
    pub file_name: String,
    pub size_bytes: u64,
    pub sender_name: String,
    pub path: PathBuf,
}

/// Progress of a send or receive; `label` is the file name.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub label: String,
    pub completed: u32,
    pub total: u32,
    pub percent: f64,
}

impl Progress {
    pub fn new(label: impl Into<String>, completed: u32, total: u32) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            f64::from(completed) * 100.0 / f64::from(total)
        };
        Self {
            label: label.into(),
            completed,
            total,
            percent,
        }
    }
}

pub type PeerDiscoveredHandler = Arc<dyn Fn(IpAddr) + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(&ReceivedMessage) + Send + Sync>;
pub type ChunkHandler = Arc<dyn Fn(&ChunkReceived) + Send + Sync>;
pub type FileCompleteHandler = Arc<dyn Fn(&FileComplete) + Send + Sync>;
pub type ProgressHandler = Arc<dyn Fn(&Progress) + Send + Sync>;
pub type ErrorHandler = Arc<dyn Fn(&MeshError) + Send + Sync>;

/// The full handler set. Unset handlers drop their events.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub peer_discovered: Option<PeerDiscoveredHandler>,
    pub message_received: Option<MessageHandler>,
    pub file_chunk_received: Option<ChunkHandler>,
    pub file_complete: Option<FileCompleteHandler>,
    pub progress: Option<ProgressHandler>,
    pub error: Option<ErrorHandler>,
}

/// Shared, mutable-after-construction handle to the handler set.
#[derive(Clone, Default)]
pub struct EventSink {
    handlers: Arc<RwLock<EventHandlers>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every handler at once.
    pub fn replace(&self, handlers: EventHandlers) {
        *self.handlers.write() = handlers;
    }

    pub fn on_peer_discovered(&self, f: impl Fn(IpAddr) + Send + Sync + 'static) {
        self.handlers.write().peer_discovered = Some(Arc::new(f));
    }

    pub fn on_message_received(&self, f: impl Fn(&ReceivedMessage) + Send + Sync + 'static) {
        self.handlers.write().message_received = Some(Arc::new(f));
    }

    pub fn on_file_chunk_received(&self, f: impl Fn(&ChunkReceived) + Send + Sync + 'static) {
        self.handlers.write().file_chunk_received = Some(Arc::new(f));
    }

    pub fn on_file_complete(&self, f: impl Fn(&FileComplete) + Send + Sync + 'static) {
        self.handlers.write().file_complete = Some(Arc::new(f));
    }

    pub fn on_progress(&self, f: impl Fn(&Progress) + Send + Sync + 'static) {
        self.handlers.write().progress = Some(Arc::new(f));
    }

    pub fn on_error(&self, f: impl Fn(&MeshError) + Send + Sync + 'static) {
        self.handlers.write().error = Some(Arc::new(f));
    }

    // ── Emitters ─────────────────────────────────────────────────────────────
    //
    // Each emitter clones the handler out of the lock before calling it, so a
    // handler may itself replace handlers without deadlocking.

    pub fn peer_discovered(&self, host: IpAddr) {
        tracing::info!(%host, "peer discovered");
        let handler = self.handlers.read().peer_discovered.clone();
        if let Some(h) = handler {
            h(host);
        }
    }

    pub fn message_received(&self, message: &ReceivedMessage) {
        tracing::info!(
            from = %message.sender_host,
            sender_name = %message.sender_name,
            len = message.text.len(),
            "message received"
        );
        let handler = self.handlers.read().message_received.clone();
        if let Some(h) = handler {
            h(message);
        }
    }

    pub fn file_chunk_received(&self, chunk: &ChunkReceived) {
        tracing::debug!(
            file_name = %chunk.file_name,
            chunk = chunk.chunk_index,
            total = chunk.total_chunks,
            bytes = chunk.bytes.len(),
            from = %chunk.sender_host,
            role = %chunk.role,
            "chunk received"
        );
        let handler = self.handlers.read().file_chunk_received.clone();
        if let Some(h) = handler {
            h(chunk);
        }
    }

    pub fn file_complete(&self, file: &FileComplete) {
        tracing::info!(
            file_name = %file.file_name,
            size = %crate::format_size(file.size_bytes),
            sender_name = %file.sender_name,
            path = %file.path.display(),
            "file received and reassembled"
        );
        let handler = self.handlers.read().file_complete.clone();
        if let Some(h) = handler {
            h(file);
        }
    }

    pub fn progress(&self, progress: &Progress) {
        tracing::trace!(
            label = %progress.label,
            completed = progress.completed,
            total = progress.total,
            "progress"
        );
        let handler = self.handlers.read().progress.clone();
        if let Some(h) = handler {
            h(progress);
        }
    }

    pub fn error(&self, error: &MeshError) {
        tracing::warn!(error = %error, kind = ?error.kind(), "reported error");
        let handler = self.handlers.read().error.clone();
        if let Some(h) = handler {
            h(error);
        }
    }
}
