//! Error taxonomy for every fallible network operation.
//!
//! Errors are never allowed to escape a listener loop. They are handed to
//! the event sink and the operation degrades to "log + continue".

use std::net::SocketAddr;
use std::time::Duration;

/// Broad classification used by callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connect refused or timed out, socket read/write failure.
    TransientNetwork,
    /// Malformed header, truncated chunk, unparseable payload.
    ProtocolFraming,
    /// Rejected before any network activity (bad path, no peers).
    ApplicationInput,
}

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {}ms talking to {addr}", .after.as_millis())]
    Timeout { addr: SocketAddr, after: Duration },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("protocol framing error: {0}")]
    Framing(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl MeshError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MeshError::Connect { .. } | MeshError::Timeout { .. } | MeshError::Io { .. } => {
                ErrorKind::TransientNetwork
            }
            MeshError::Framing(_) => ErrorKind::ProtocolFraming,
            MeshError::InvalidInput(_) => ErrorKind::ApplicationInput,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        MeshError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn framing(msg: impl Into<String>) -> Self {
        MeshError::Framing(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        MeshError::InvalidInput(msg.into())
    }
}
