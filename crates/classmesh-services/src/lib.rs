//! classmesh-services: the running parts of a classroom mesh node.
//!
//! Discovery, messaging and file transfer each own one socket; `MeshNode`
//! wires them to a shared peer registry and event sink.

pub mod discovery;
pub mod events;
pub mod file_transfer;
pub mod messaging_service;
pub mod net;
pub mod node;
pub mod peer;
pub mod reassembly;

pub use discovery::DiscoveryService;
pub use events::{
    ChunkReceived, EventHandlers, EventSink, FileComplete, Progress, ReceivedMessage,
};
pub use file_transfer::{assign_target, format_size, FileTransferService, SendProgress};
pub use messaging_service::MessagingService;
pub use net::Outbound;
pub use node::MeshNode;
pub use peer::{PeerEntry, PeerRegistry, UNKNOWN_NAME};
pub use reassembly::{ChunkOutcome, ChunkReassembly, CompletedFile};
