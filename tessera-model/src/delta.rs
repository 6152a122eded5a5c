//! Deltas: single-author batches of operations.
//!
//! ```text
//!  WaveletDelta                 TransformedWaveletDelta
//!  ┌────────────────────┐       ┌─────────────────────────────┐
//!  │ author             │ apply │ author                      │
//!  │ target: v7:ab12..  │ ────► │ applied_at: 9 (after xform) │
//!  │ ops [o1 o2 o3]     │       │ resulting:  v12:ff03..      │
//!  └────────────────────┘       │ ops [o1' o2' o3'(+version)] │
//!                               └─────────────────────────────┘
//! ```
//!
//! [`DeltaSequence`] is a contiguous run of committed deltas, validated on
//! construction.

use crate::operation::{version_span, ParticipantId, WaveletOperation};
use crate::version::HashedVersion;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaError {
    /// An operation's creator differs from the delta author
    MixedAuthors {
        author: ParticipantId,
        found: ParticipantId,
    },
    /// Some operation does not consume exactly one version slot
    VersionSpan { ops: usize, span: u64 },
    /// The resulting version is lower than the delta's span
    ResultingBelowSpan { resulting: u64, span: u64 },
    /// The recorded applied-at version disagrees with the resulting version
    AppliedAtMismatch { expected: u64, got: u64 },
    /// Canonical content bytes could not be produced
    Encoding(String),
}

impl fmt::Display for DeltaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaError::MixedAuthors { author, found } => {
                write!(f, "Delta by {author} contains an operation by {found}")
            }
            DeltaError::VersionSpan { ops, span } => {
                write!(
                    f,
                    "Delta of {ops} operations spans {span} versions, expected one per operation"
                )
            }
            DeltaError::ResultingBelowSpan { resulting, span } => {
                write!(f, "Resulting version {resulting} is below the delta span {span}")
            }
            DeltaError::AppliedAtMismatch { expected, got } => {
                write!(f, "Delta records applied-at version {got}, expected {expected}")
            }
            DeltaError::Encoding(e) => write!(f, "Delta encoding failed: {e}"),
        }
    }
}

impl std::error::Error for DeltaError {}

/// Every operation must consume exactly one version slot.
fn check_span(ops: &[WaveletOperation]) -> Result<u64, DeltaError> {
    let span = version_span(ops);
    if ops.iter().any(|op| op.version_increment() != 1) {
        return Err(DeltaError::VersionSpan {
            ops: ops.len(),
            span,
        });
    }
    Ok(span)
}

/// A delta as authored by a client, targeted at a base version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WaveletDeltaWire", into = "WaveletDeltaWire")]
pub struct WaveletDelta {
    author: ParticipantId,
    target_version: HashedVersion,
    ops: Vec<WaveletOperation>,
}

#[derive(Serialize, Deserialize)]
struct WaveletDeltaWire {
    author: ParticipantId,
    target_version: HashedVersion,
    ops: Vec<WaveletOperation>,
}

impl TryFrom<WaveletDeltaWire> for WaveletDelta {
    type Error = DeltaError;

    fn try_from(wire: WaveletDeltaWire) -> Result<Self, Self::Error> {
        WaveletDelta::new(wire.author, wire.target_version, wire.ops)
    }
}

impl From<WaveletDelta> for WaveletDeltaWire {
    fn from(delta: WaveletDelta) -> Self {
        Self {
            author: delta.author,
            target_version: delta.target_version,
            ops: delta.ops,
        }
    }
}

impl WaveletDelta {
    /// Build a delta, checking that every operation is by `author` and
    /// consumes one version slot.
    pub fn new(
        author: ParticipantId,
        target_version: HashedVersion,
        ops: Vec<WaveletOperation>,
    ) -> Result<Self, DeltaError> {
        if let Some(op) = ops.iter().find(|op| op.creator() != &author) {
            return Err(DeltaError::MixedAuthors {
                author,
                found: op.creator().clone(),
            });
        }
        check_span(&ops)?;
        Ok(Self {
            author,
            target_version,
            ops,
        })
    }

    /// Participant who authored every operation.
    pub fn author(&self) -> &ParticipantId {
        &self.author
    }

    /// The version the author's operations are based on.
    pub fn target_version(&self) -> &HashedVersion {
        &self.target_version
    }

    /// Operations in application order.
    pub fn ops(&self) -> &[WaveletOperation] {
        &self.ops
    }

    /// Consume the delta, keeping its operations.
    pub fn into_ops(self) -> Vec<WaveletOperation> {
        self.ops
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Version slots consumed by the delta.
    pub fn span(&self) -> u64 {
        version_span(&self.ops)
    }

    /// Version the delta ends at if applied at its target.
    pub fn resulting_version(&self) -> u64 {
        self.target_version.version() + self.span()
    }
}

/// A delta as committed to history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "TransformedWaveletDeltaWire",
    into = "TransformedWaveletDeltaWire"
)]
pub struct TransformedWaveletDelta {
    author: ParticipantId,
    applied_at_version: u64,
    resulting_version: HashedVersion,
    application_timestamp: u64,
    ops: Vec<WaveletOperation>,
}

#[derive(Serialize, Deserialize)]
struct TransformedWaveletDeltaWire {
    author: ParticipantId,
    applied_at_version: u64,
    resulting_version: HashedVersion,
    application_timestamp: u64,
    ops: Vec<WaveletOperation>,
}

impl TryFrom<TransformedWaveletDeltaWire> for TransformedWaveletDelta {
    type Error = DeltaError;

    fn try_from(wire: TransformedWaveletDeltaWire) -> Result<Self, Self::Error> {
        let delta = TransformedWaveletDelta::new(
            wire.author,
            wire.resulting_version,
            wire.application_timestamp,
            wire.ops,
        )?;
        if delta.applied_at_version != wire.applied_at_version {
            return Err(DeltaError::AppliedAtMismatch {
                expected: delta.applied_at_version,
                got: wire.applied_at_version,
            });
        }
        Ok(delta)
    }
}

impl From<TransformedWaveletDelta> for TransformedWaveletDeltaWire {
    fn from(delta: TransformedWaveletDelta) -> Self {
        Self {
            author: delta.author,
            applied_at_version: delta.applied_at_version,
            resulting_version: delta.resulting_version,
            application_timestamp: delta.application_timestamp,
            ops: delta.ops,
        }
    }
}

impl TransformedWaveletDelta {
    /// Build a committed delta. The resulting version is recorded on the
    /// last operation only.
    ///
    /// Fails if an operation does not consume exactly one version slot or
    /// if `resulting_version` is lower than the number of operations.
    pub fn new(
        author: ParticipantId,
        resulting_version: HashedVersion,
        application_timestamp: u64,
        ops: Vec<WaveletOperation>,
    ) -> Result<Self, DeltaError> {
        let span = check_span(&ops)?;
        let applied_at_version = resulting_version.version().checked_sub(span).ok_or(
            DeltaError::ResultingBelowSpan {
                resulting: resulting_version.version(),
                span,
            },
        )?;
        let last = ops.len().saturating_sub(1);
        let ops = ops
            .into_iter()
            .enumerate()
            .map(|(i, mut op)| {
                op.context.hashed_version = (i == last).then(|| resulting_version.clone());
                op
            })
            .collect();
        Ok(Self {
            author,
            applied_at_version,
            resulting_version,
            application_timestamp,
            ops,
        })
    }

    /// Participant who submitted the delta.
    pub fn author(&self) -> &ParticipantId {
        &self.author
    }

    /// The version the delta was applied at.
    pub fn applied_at_version(&self) -> u64 {
        self.applied_at_version
    }

    /// Version and history hash after the delta.
    pub fn resulting_version(&self) -> &HashedVersion {
        &self.resulting_version
    }

    /// Server clock at commit, in milliseconds since the epoch.
    pub fn application_timestamp(&self) -> u64 {
        self.application_timestamp
    }

    /// Transformed operations; the last carries the resulting version.
    pub fn ops(&self) -> &[WaveletOperation] {
        &self.ops
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Version slots consumed; equal to [`Self::len`].
    pub fn span(&self) -> u64 {
        version_span(&self.ops)
    }

    /// Canonical bytes fed into the hash chain: author and operations with
    /// their resulting-version markers stripped.
    pub fn content_bytes(&self) -> Result<Vec<u8>, DeltaError> {
        content_bytes(&self.author, &self.ops)
    }
}

/// Canonical content bytes for `ops` by `author`.
pub fn content_bytes(
    author: &ParticipantId,
    ops: &[WaveletOperation],
) -> Result<Vec<u8>, DeltaError> {
    let stripped: Vec<WaveletOperation> =
        ops.iter().map(WaveletOperation::without_hashed_version).collect();
    bincode::serde::encode_to_vec((author, &stripped), bincode::config::standard())
        .map_err(|e| DeltaError::Encoding(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaSequenceError {
    /// `deltas[index]` does not start where the previous one ended
    NotContiguous { index: usize, expected: u64, got: u64 },
}

impl fmt::Display for DeltaSequenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaSequenceError::NotContiguous {
                index,
                expected,
                got,
            } => write!(
                f,
                "Delta {index} applies at version {got}, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for DeltaSequenceError {}

/// An immutable contiguous run of committed deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaSequence {
    deltas: Vec<TransformedWaveletDelta>,
}

impl DeltaSequence {
    /// Wrap `deltas`, checking each starts where the previous one ended.
    pub fn new(deltas: Vec<TransformedWaveletDelta>) -> Result<Self, DeltaSequenceError> {
        for (i, pair) in deltas.windows(2).enumerate() {
            let expected = pair[0].resulting_version().version();
            let got = pair[1].applied_at_version();
            if expected != got {
                return Err(DeltaSequenceError::NotContiguous {
                    index: i + 1,
                    expected,
                    got,
                });
            }
        }
        Ok(Self { deltas })
    }

    /// A sequence with no deltas and no bounds.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Concatenate sequences, checking contiguity at each seam.
    pub fn join(sequences: Vec<DeltaSequence>) -> Result<Self, DeltaSequenceError> {
        let mut deltas: Vec<TransformedWaveletDelta> = Vec::new();
        for sequence in sequences {
            if let (Some(end), Some(first)) = (deltas.last(), sequence.deltas.first()) {
                let expected = end.resulting_version().version();
                if first.applied_at_version() != expected {
                    return Err(DeltaSequenceError::NotContiguous {
                        index: deltas.len(),
                        expected,
                        got: first.applied_at_version(),
                    });
                }
            }
            deltas.extend(sequence.deltas);
        }
        Ok(Self { deltas })
    }

    /// Sub-range by delta index. Contiguity is inherited.
    ///
    /// # Panics
    ///
    /// If `range` is out of bounds or decreasing, like slice indexing.
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            deltas: self.deltas[range].to_vec(),
        }
    }

    /// Applied-at version of the first delta.
    pub fn start_version(&self) -> Option<u64> {
        self.deltas.first().map(TransformedWaveletDelta::applied_at_version)
    }

    /// Resulting version of the last delta.
    pub fn end_version(&self) -> Option<&HashedVersion> {
        self.deltas.last().map(TransformedWaveletDelta::resulting_version)
    }

    /// Number of deltas.
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Deltas in version order.
    pub fn iter(&self) -> std::slice::Iter<'_, TransformedWaveletDelta> {
        self.deltas.iter()
    }

    pub fn into_vec(self) -> Vec<TransformedWaveletDelta> {
        self.deltas
    }
}

impl IntoIterator for DeltaSequence {
    type Item = TransformedWaveletDelta;
    type IntoIter = std::vec::IntoIter<TransformedWaveletDelta>;

    fn into_iter(self) -> Self::IntoIter {
        self.deltas.into_iter()
    }
}

impl<'a> IntoIterator for &'a DeltaSequence {
    type Item = &'a TransformedWaveletDelta;
    type IntoIter = std::slice::Iter<'a, TransformedWaveletDelta>;

    fn into_iter(self) -> Self::IntoIter {
        self.deltas.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed(author: &str, applied_at: u64, count: usize) -> TransformedWaveletDelta {
        let ops = (0..count)
            .map(|i| WaveletOperation::no_op(author.into(), i as u64))
            .collect();
        let resulting = HashedVersion::new(applied_at + count as u64, vec![applied_at as u8]);
        TransformedWaveletDelta::new(author.into(), resulting, 0, ops).unwrap()
    }

    fn inflated(author: &str, increment: u64) -> WaveletOperation {
        WaveletOperation::no_op(author.into(), 1).create_version_update_op(increment, None)
    }

    #[test]
    fn test_delta_rejects_mixed_authors() {
        let ops = vec![
            WaveletOperation::no_op("alice".into(), 1),
            WaveletOperation::no_op("bob".into(), 2),
        ];
        let err = WaveletDelta::new("alice".into(), HashedVersion::new(0, vec![]), ops).unwrap_err();
        assert!(matches!(err, DeltaError::MixedAuthors { .. }));
    }

    #[test]
    fn test_delta_resulting_version() {
        let ops = vec![
            WaveletOperation::no_op("alice".into(), 1),
            WaveletOperation::no_op("alice".into(), 2),
        ];
        let delta = WaveletDelta::new("alice".into(), HashedVersion::new(5, vec![]), ops).unwrap();
        assert_eq!(delta.len(), 2);
        assert_eq!(delta.resulting_version(), 7);
    }

    #[test]
    fn test_delta_rejects_uneven_version_increments() {
        let v0 = HashedVersion::new(0, vec![]);
        for increment in [0, 3] {
            let err = WaveletDelta::new("alice".into(), v0.clone(), vec![inflated("alice", increment)])
                .unwrap_err();
            assert_eq!(err, DeltaError::VersionSpan { ops: 1, span: increment });
        }

        let ops = vec![inflated("alice", 2), inflated("alice", 0)];
        assert!(matches!(
            TransformedWaveletDelta::new("alice".into(), HashedVersion::new(4, vec![]), 0, ops),
            Err(DeltaError::VersionSpan { ops: 2, span: 2 })
        ));
    }

    #[test]
    fn test_transformed_delta_rejects_resulting_below_span() {
        let ops = vec![WaveletOperation::no_op("alice".into(), 1)];
        let err = TransformedWaveletDelta::new("alice".into(), HashedVersion::new(0, vec![]), 0, ops)
            .unwrap_err();
        assert_eq!(err, DeltaError::ResultingBelowSpan { resulting: 0, span: 1 });
    }

    #[test]
    fn test_decode_validates_committed_delta() {
        let config = bincode::config::standard();
        let wire = TransformedWaveletDeltaWire {
            author: "alice".into(),
            applied_at_version: 0,
            resulting_version: HashedVersion::new(0, vec![1]),
            application_timestamp: 0,
            ops: vec![WaveletOperation::no_op("alice".into(), 1)],
        };
        let bytes = bincode::serde::encode_to_vec(&wire, config).unwrap();
        let decoded: Result<(TransformedWaveletDelta, usize), _> =
            bincode::serde::decode_from_slice(&bytes, config);
        assert!(decoded.is_err());

        let good = committed("alice", 4, 2);
        let bytes = bincode::serde::encode_to_vec(&good, config).unwrap();
        let (back, _): (TransformedWaveletDelta, usize) =
            bincode::serde::decode_from_slice(&bytes, config).unwrap();
        assert_eq!(back.applied_at_version(), 4);
        assert_eq!(back, good);
    }

    #[test]
    fn test_decode_rejects_misplaced_applied_at() {
        let config = bincode::config::standard();
        let wire = TransformedWaveletDeltaWire {
            author: "alice".into(),
            applied_at_version: 1,
            resulting_version: HashedVersion::new(5, vec![1]),
            application_timestamp: 0,
            ops: vec![WaveletOperation::no_op("alice".into(), 1)],
        };
        let bytes = bincode::serde::encode_to_vec(&wire, config).unwrap();
        let decoded: Result<(TransformedWaveletDelta, usize), _> =
            bincode::serde::decode_from_slice(&bytes, config);
        assert!(decoded.is_err());
    }

    #[test]
    fn test_decode_validates_client_delta() {
        let config = bincode::config::standard();
        let wire = WaveletDeltaWire {
            author: "alice".into(),
            target_version: HashedVersion::new(3, vec![1]),
            ops: vec![inflated("alice", 0)],
        };
        let bytes = bincode::serde::encode_to_vec(&wire, config).unwrap();
        let decoded: Result<(WaveletDelta, usize), _> =
            bincode::serde::decode_from_slice(&bytes, config);
        assert!(decoded.is_err());
    }

    #[test]
    fn test_transformed_delta_marks_last_op_only() {
        let delta = committed("alice", 4, 3);
        assert_eq!(delta.applied_at_version(), 4);
        assert!(delta.ops()[0].hashed_version().is_none());
        assert!(delta.ops()[1].hashed_version().is_none());
        assert_eq!(delta.ops()[2].hashed_version(), Some(delta.resulting_version()));
    }

    #[test]
    fn test_content_bytes_ignore_resulting_version() {
        let a = committed("alice", 4, 2);
        let ops: Vec<_> = a.ops().to_vec();
        let b = TransformedWaveletDelta::new("alice".into(), HashedVersion::new(6, vec![99]), 7, ops)
            .unwrap();
        assert_eq!(a.content_bytes().unwrap(), b.content_bytes().unwrap());
        assert_ne!(
            a.content_bytes().unwrap(),
            committed("bob", 4, 2).content_bytes().unwrap()
        );
    }

    #[test]
    fn test_sequence_contiguity() {
        let seq = DeltaSequence::new(vec![committed("a", 0, 2), committed("b", 2, 1)]).unwrap();
        assert_eq!(seq.start_version(), Some(0));
        assert_eq!(seq.end_version().map(HashedVersion::version), Some(3));

        let err = DeltaSequence::new(vec![committed("a", 0, 2), committed("b", 3, 1)]).unwrap_err();
        assert_eq!(
            err,
            DeltaSequenceError::NotContiguous {
                index: 1,
                expected: 2,
                got: 3
            }
        );
    }

    #[test]
    fn test_empty_sequence_has_no_bounds() {
        let seq = DeltaSequence::empty();
        assert!(seq.is_empty());
        assert_eq!(seq.start_version(), None);
        assert!(seq.end_version().is_none());
    }

    #[test]
    fn test_join_checks_seams() {
        let a = DeltaSequence::new(vec![committed("a", 0, 2)]).unwrap();
        let b = DeltaSequence::new(vec![committed("b", 2, 2)]).unwrap();
        let c = DeltaSequence::new(vec![committed("c", 5, 1)]).unwrap();

        let joined = DeltaSequence::join(vec![a.clone(), DeltaSequence::empty(), b.clone()]).unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.end_version().map(HashedVersion::version), Some(4));

        assert!(DeltaSequence::join(vec![a, b, c]).is_err());
    }

    #[test]
    fn test_slice() {
        let seq = DeltaSequence::new(vec![
            committed("a", 0, 1),
            committed("b", 1, 1),
            committed("c", 2, 1),
        ])
        .unwrap();
        let tail = seq.slice(1..3);
        assert_eq!(tail.start_version(), Some(1));
        assert_eq!(tail.len(), 2);
    }

    #[test]
    #[should_panic]
    fn test_slice_out_of_range_panics() {
        let seq = DeltaSequence::new(vec![committed("a", 0, 1)]).unwrap();
        let _ = seq.slice(0..2);
    }
}
