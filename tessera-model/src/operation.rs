//! Wavelet operations.
//!
//! Every operation carries an [`OperationContext`]; the kind is a closed
//! enum so transform and compose match over every variant.

use crate::document::DocOp;
use crate::version::HashedVersion;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an editor (or of a system actor).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Author, timestamp and version accounting of one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    pub creator: ParticipantId,
    /// Milliseconds since the epoch, as supplied by the author
    pub timestamp: u64,
    /// History slots consumed by the operation
    pub version_increment: u64,
    /// Resulting version; only set on the last operation of a committed delta
    pub hashed_version: Option<HashedVersion>,
}

impl OperationContext {
    /// Context for a fresh operation consuming one version.
    pub fn new(creator: ParticipantId, timestamp: u64) -> Self {
        Self {
            creator,
            timestamp,
            version_increment: 1,
            hashed_version: None,
        }
    }
}

/// What an operation does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    NoOp,
    AddParticipant(ParticipantId),
    RemoveParticipant(ParticipantId),
    Blip { blip_id: String, content: DocOp },
    /// Consumes version slots without touching content
    VersionUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveletOperation {
    pub context: OperationContext,
    pub kind: OperationKind,
}

impl WaveletOperation {
    /// Build an operation from its parts.
    pub fn new(context: OperationContext, kind: OperationKind) -> Self {
        Self { context, kind }
    }

    /// An operation that changes nothing but still takes a version.
    pub fn no_op(creator: ParticipantId, timestamp: u64) -> Self {
        Self::new(OperationContext::new(creator, timestamp), OperationKind::NoOp)
    }

    /// `creator` adds `who` to the wavelet.
    pub fn add_participant(creator: ParticipantId, timestamp: u64, who: ParticipantId) -> Self {
        Self::new(
            OperationContext::new(creator, timestamp),
            OperationKind::AddParticipant(who),
        )
    }

    /// `creator` removes `who` from the wavelet.
    pub fn remove_participant(creator: ParticipantId, timestamp: u64, who: ParticipantId) -> Self {
        Self::new(
            OperationContext::new(creator, timestamp),
            OperationKind::RemoveParticipant(who),
        )
    }

    /// Apply `content` to the blip `blip_id`.
    pub fn blip(
        creator: ParticipantId,
        timestamp: u64,
        blip_id: impl Into<String>,
        content: DocOp,
    ) -> Self {
        Self::new(
            OperationContext::new(creator, timestamp),
            OperationKind::Blip {
                blip_id: blip_id.into(),
                content,
            },
        )
    }

    /// Participant who authored the operation.
    pub fn creator(&self) -> &ParticipantId {
        &self.context.creator
    }

    /// Author's clock in milliseconds.
    pub fn timestamp(&self) -> u64 {
        self.context.timestamp
    }

    /// Versions consumed when applied.
    pub fn version_increment(&self) -> u64 {
        self.context.version_increment
    }

    /// Resulting version, set only on the last op of a committed delta.
    pub fn hashed_version(&self) -> Option<&HashedVersion> {
        self.context.hashed_version.as_ref()
    }

    /// Target blip for blip operations.
    pub fn blip_id(&self) -> Option<&str> {
        match &self.kind {
            OperationKind::Blip { blip_id, .. } => Some(blip_id),
            _ => None,
        }
    }

    /// Whether this is a content-free [`OperationKind::VersionUpdate`].
    pub fn is_version_update(&self) -> bool {
        matches!(self.kind, OperationKind::VersionUpdate)
    }

    /// A content-free operation by the same creator at the same time,
    /// consuming `increment` slots.
    pub fn create_version_update_op(
        &self,
        increment: u64,
        hashed_version: Option<HashedVersion>,
    ) -> Self {
        Self {
            context: OperationContext {
                creator: self.context.creator.clone(),
                timestamp: self.context.timestamp,
                version_increment: increment,
                hashed_version,
            },
            kind: OperationKind::VersionUpdate,
        }
    }

    /// Same operation without the resulting-version marker.
    pub fn without_hashed_version(&self) -> Self {
        let mut op = self.clone();
        op.context.hashed_version = None;
        op
    }
}

/// Total version slots consumed by `ops`.
pub fn version_span(ops: &[WaveletOperation]) -> u64 {
    ops.iter().map(WaveletOperation::version_increment).sum()
}
