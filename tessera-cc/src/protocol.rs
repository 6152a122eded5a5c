//! Server-to-client messages and channel-level errors.
//!
//! Wire format (bincode, standard config):
//! ```text
//! ┌─────────┬────────────────────────────────────────────────┐
//! │ variant │ payload                                        │
//! ├─────────┼────────────────────────────────────────────────┤
//! │ Open    │ connect_version, current_version               │
//! │ Deltas  │ Vec<TransformedWaveletDelta>                   │
//! │ Ack     │ ops_applied, version                           │
//! │ Commit  │ version                                        │
//! └─────────┴────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_model::{HashedVersion, TransformedWaveletDelta};

/// A message from the server side of a document channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// The session starts at `connect_version`; history runs to `current_version`
    Open {
        connect_version: HashedVersion,
        current_version: HashedVersion,
    },
    /// Deltas committed by others (or replayed after a reconnection)
    Deltas(Vec<TransformedWaveletDelta>),
    /// The in-flight delta was applied
    Ack {
        ops_applied: usize,
        version: HashedVersion,
    },
    /// Everything up to `version` is durable
    Commit { version: u64 },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ChannelError::Encoding(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChannelError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ChannelError::Decoding(e.to_string()))?;
        Ok(msg)
    }
}

/// Protocol-level failures. Fatal to the session that sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Open received with missing or inverted versions
    InvalidOpen {
        connect_version: HashedVersion,
        current_version: HashedVersion,
    },
    /// None of the offered reconnection versions is in the history
    NoMatchingSignature(Vec<HashedVersion>),
    /// Submitted delta targets a version the history does not have
    UnknownSignature(HashedVersion),
    /// Submitted delta targets a version past the history head
    VersionAhead { target: u64, current: u64 },
    /// Delta with no operations
    EmptyDelta,
    /// Ack received with nothing in flight
    UnexpectedAck,
    /// Ack does not match the in-flight delta
    AckMismatch {
        expected_ops: usize,
        expected_version: u64,
        ops_applied: usize,
        version: u64,
    },
    /// Server delta older than the inferred server path
    StaleServerDelta { applied_at: u64, latest: u64 },
    /// Server delta does not apply where the in-flight delta was targeted
    VersionMismatch { applied_at: u64, target: u64 },
    /// The session fell behind the fan-out buffer
    Lagged(u64),
    /// The session is not connected
    NotConnected,
    /// The document hub has shut down
    Closed,
    Encoding(String),
    Decoding(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::InvalidOpen {
                connect_version,
                current_version,
            } => write!(
                f,
                "Invalid open: connect version {connect_version}, current version {current_version}"
            ),
            ChannelError::NoMatchingSignature(offered) => {
                write!(f, "No matching signature among {} offered", offered.len())
            }
            ChannelError::UnknownSignature(v) => write!(f, "Unknown signature {v}"),
            ChannelError::VersionAhead { target, current } => {
                write!(f, "Delta targets version {target}, history is at {current}")
            }
            ChannelError::EmptyDelta => write!(f, "Delta has no operations"),
            ChannelError::UnexpectedAck => write!(f, "Ack received with no delta in flight"),
            ChannelError::AckMismatch {
                expected_ops,
                expected_version,
                ops_applied,
                version,
            } => write!(
                f,
                "Ack mismatch: expected {expected_ops} ops at version {expected_version}, \
                 server acked {ops_applied} ops at version {version}"
            ),
            ChannelError::StaleServerDelta { applied_at, latest } => write!(
                f,
                "Server delta at version {applied_at} is older than inferred version {latest}"
            ),
            ChannelError::VersionMismatch { applied_at, target } => write!(
                f,
                "Server delta at version {applied_at} does not match in-flight target {target}"
            ),
            ChannelError::Lagged(n) => write!(f, "Session lagged by {n} events"),
            ChannelError::NotConnected => write!(f, "Session not connected"),
            ChannelError::Closed => write!(f, "Document hub closed"),
            ChannelError::Encoding(e) => write!(f, "Encoding error: {e}"),
            ChannelError::Decoding(e) => write!(f, "Decoding error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {}
