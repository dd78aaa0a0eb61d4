//! classmesh-core: shared types, wire format, errors and configuration.
//! All other classmesh crates depend on this one.

pub mod config;
pub mod error;
pub mod wire;

pub use error::{ErrorKind, MeshError};
pub use wire::{DiscoveryDatagram, MessagePayload, PeerAddress, Role, TransferHeader};
