//! classmesh wire format: everything that crosses a socket.
//!
//! Three framings, all over raw sockets without TLS:
//!
//! - Discovery (UDP broadcast): ASCII tokens `DISCOVER_PEER`, `PEER_ACK`
//!   and `NAME:<utf8 name>`, one per datagram.
//! - Messaging (TCP, one payload per connection): a JSON object
//!   `{"message": .., "sender_name": ..}`.
//! - File chunks (TCP, one chunk per connection): a JSON [`TransferHeader`],
//!   a single `\n`, then exactly `chunk_size` raw bytes. serde_json escapes
//!   control characters inside strings, so the first `\n` always ends the
//!   header.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MeshError;

// ── Constants ────────────────────────────────────────────────────────────────

pub const DEFAULT_DISCOVERY_PORT: u16 = 8080;
pub const DEFAULT_FILE_PORT: u16 = 8081;
pub const DEFAULT_MESSAGE_PORT: u16 = 50008;

/// Size of every chunk except possibly the last.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024; // 1 MiB

/// Upper bound on the JSON header line of a chunk frame.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Upper bound on a message payload.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Receive buffer for discovery datagrams.
pub const MAX_DATAGRAM_BYTES: usize = 1024;

pub const DISCOVER_TOKEN: &[u8] = b"DISCOVER_PEER";
pub const ACK_TOKEN: &[u8] = b"PEER_ACK";
pub const NAME_PREFIX: &[u8] = b"NAME:";

/// Byte that terminates the header of a chunk frame.
pub const HEADER_DELIMITER: u8 = b'\n';

// ── Peer address ─────────────────────────────────────────────────────────────

/// Where a peer was seen. Identity is the host alone; ports are fixed per
/// service and come from configuration when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub host: IpAddr,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self { host, port }
    }

    /// Socket address of this peer's service listening on `port`.
    pub fn service_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.host, port)
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

// ── Discovery ────────────────────────────────────────────────────────────────

/// A parsed discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryDatagram {
    /// "Who is out there?", answered with [`DiscoveryDatagram::Ack`].
    Discover,
    /// Unicast reply to a discover.
    Ack,
    /// Display name announcement.
    Name(String),
}

impl DiscoveryDatagram {
    /// Parse a datagram. Anything unrelated or malformed yields `None`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data == DISCOVER_TOKEN {
            return Some(Self::Discover);
        }
        if data == ACK_TOKEN {
            return Some(Self::Ack);
        }
        let rest = data.strip_prefix(NAME_PREFIX)?;
        let name = std::str::from_utf8(rest).ok()?.trim();
        if name.is_empty() {
            return None;
        }
        Some(Self::Name(name.to_string()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Discover => DISCOVER_TOKEN.to_vec(),
            Self::Ack => ACK_TOKEN.to_vec(),
            Self::Name(name) => {
                let mut out = Vec::with_capacity(NAME_PREFIX.len() + name.len());
                out.extend_from_slice(NAME_PREFIX);
                out.extend_from_slice(name.as_bytes());
                out
            }
        }
    }
}

// ── Roles ────────────────────────────────────────────────────────────────────

/// Who originated a transfer. Decides whether receivers relay chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    #[default]
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    /// Chunks from this role are forwarded by whoever receives them.
    pub fn relays(&self) -> bool {
        matches!(self, Role::Student)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(MeshError::invalid_input(format!("unknown role '{other}'"))),
        }
    }
}

// ── Messaging ────────────────────────────────────────────────────────────────

/// JSON payload of one message connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message: String,
    pub sender_name: String,
}

impl MessagePayload {
    pub fn new(message: impl Into<String>, sender_name: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sender_name: sender_name.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MeshError> {
        serde_json::to_vec(self).map_err(|e| MeshError::framing(format!("message encode: {e}")))
    }

    pub fn decode(data: &[u8]) -> Result<Self, MeshError> {
        serde_json::from_slice(data)
            .map_err(|e| MeshError::framing(format!("invalid message JSON: {e}")))
    }
}

// ── File chunks ──────────────────────────────────────────────────────────────

/// Header sent in front of every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHeader {
    pub file_name: String,
    pub chunk_id: u32,
    pub total_chunks: u32,
    /// Number of raw bytes following the delimiter.
    pub chunk_size: u64,
    pub role: Role,
    pub sender_name: String,
    /// Set on forwarded copies. A relayed chunk is never relayed again.
    /// Omitted from the JSON when false.
    #[serde(default, skip_serializing_if = "is_false")]
    pub relayed: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl TransferHeader {
    /// Check the header against protocol invariants before reading a payload.
    pub fn validate(&self, max_chunk_bytes: u64) -> Result<(), MeshError> {
        if self.file_name.trim().is_empty() {
            return Err(MeshError::framing("empty file_name"));
        }
        if self.total_chunks == 0 {
            return Err(MeshError::framing("total_chunks must be at least 1"));
        }
        if self.chunk_id >= self.total_chunks {
            return Err(MeshError::framing(format!(
                "chunk_id {} out of range for {} chunks",
                self.chunk_id, self.total_chunks
            )));
        }
        if self.chunk_size > max_chunk_bytes {
            return Err(MeshError::framing(format!(
                "chunk_size {} exceeds limit {}",
                self.chunk_size, max_chunk_bytes
            )));
        }
        Ok(())
    }

    /// The copy a receiver forwards to the rest of the mesh.
    pub fn relayed_copy(&self) -> Self {
        Self {
            relayed: true,
            ..self.clone()
        }
    }

    pub fn parse(line: &[u8]) -> Result<Self, MeshError> {
        serde_json::from_slice(line)
            .map_err(|e| MeshError::framing(format!("invalid transfer header: {e}")))
    }
}

/// Build the bytes of one chunk connection: header, delimiter, payload.
pub fn encode_chunk_frame(header: &TransferHeader, payload: &[u8]) -> Result<Vec<u8>, MeshError> {
    if header.chunk_size != payload.len() as u64 {
        return Err(MeshError::framing(format!(
            "header announces {} bytes but payload has {}",
            header.chunk_size,
            payload.len()
        )));
    }
    let json = serde_json::to_vec(header)
        .map_err(|e| MeshError::framing(format!("header encode: {e}")))?;
    let mut frame = Vec::with_capacity(json.len() + 1 + payload.len());
    frame.extend_from_slice(&json);
    frame.push(HEADER_DELIMITER);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Split a buffer at the header delimiter: `(header, payload_so_far)`.
pub fn split_frame(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = buf.iter().position(|b| *b == HEADER_DELIMITER)?;
    Some((&buf[..pos], &buf[pos + 1..]))
}

/// `ceil(len / chunk_size)`, never less than one so empty files still
/// produce a (zero-length) chunk. Fails if the count does not fit the
/// header's `u32` fields.
pub fn chunk_count(len: u64, chunk_size: usize) -> Result<u32, MeshError> {
    let size = chunk_size.max(1) as u64;
    let count = len.div_ceil(size).max(1);
    u32::try_from(count).map_err(|_| {
        MeshError::invalid_input(format!(
            "{len} bytes in {size}-byte chunks needs {count} chunks, more than {}",
            u32::MAX
        ))
    })
}
