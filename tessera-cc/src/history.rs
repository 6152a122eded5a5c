//! Authoritative per-document delta history.
//!
//! ```text
//!  signatures: v0 ─── v2 ─── v3 ─── v7        (every delta boundary)
//!  store:        [0..2) [2..3) [3..7)          (compressed deltas)
//!  current:                         v7
//! ```
//!
//! Appends must extend the head and carry the resulting version the hash
//! chain predicts; anything else is a caller bug or a corrupted delta.

use crate::storage::{DeltaStats, DeltaStore, MemoryDeltaStore, StoreError};
use std::collections::BTreeMap;
use std::fmt;
use tessera_model::{
    content_bytes, version_span, DeltaError, DeltaSequence, DeltaSequenceError, HashedVersion,
    HashedVersionFactory, ParticipantId, TransformedWaveletDelta, WaveletOperation,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// No delta boundary at this version
    UnknownVersion(u64),
    /// Resulting version does not match the hash chain
    SignatureMismatch {
        expected: HashedVersion,
        got: HashedVersion,
    },
    Store(StoreError),
    Delta(DeltaError),
    Sequence(DeltaSequenceError),
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryError::UnknownVersion(v) => write!(f, "No delta boundary at version {v}"),
            HistoryError::SignatureMismatch { expected, got } => {
                write!(f, "Signature mismatch: expected {expected}, got {got}")
            }
            HistoryError::Store(e) => write!(f, "Store error: {e}"),
            HistoryError::Delta(e) => write!(f, "Delta error: {e}"),
            HistoryError::Sequence(e) => write!(f, "Sequence error: {e}"),
        }
    }
}

impl std::error::Error for HistoryError {}

impl From<StoreError> for HistoryError {
    fn from(e: StoreError) -> Self {
        HistoryError::Store(e)
    }
}

impl From<DeltaError> for HistoryError {
    fn from(e: DeltaError) -> Self {
        HistoryError::Delta(e)
    }
}

impl From<DeltaSequenceError> for HistoryError {
    fn from(e: DeltaSequenceError) -> Self {
        HistoryError::Sequence(e)
    }
}

pub struct DeltaHistory {
    factory: HashedVersionFactory,
    store: Box<dyn DeltaStore>,
    /// Signature at every delta boundary, version zero included
    signatures: BTreeMap<u64, HashedVersion>,
    current: HashedVersion,
}

impl DeltaHistory {
    /// Open a history over `store`, verifying the hash chain of anything
    /// already stored.
    pub fn new(factory: HashedVersionFactory, store: Box<dyn DeltaStore>) -> Result<Self, HistoryError> {
        let zero = factory.version_zero();
        let mut history = Self {
            signatures: BTreeMap::from([(0, zero.clone())]),
            current: zero,
            factory,
            store,
        };

        let stored = history.store.read(0, u64::MAX)?;
        for delta in &stored {
            let expected = history.expected_signature(delta.author(), delta.ops())?;
            if &expected != delta.resulting_version() {
                return Err(HistoryError::SignatureMismatch {
                    expected,
                    got: delta.resulting_version().clone(),
                });
            }
            history.record(expected);
        }
        if !stored.is_empty() {
            log::info!(
                "Recovered {} deltas, history at {}",
                stored.len(),
                history.current
            );
        }
        Ok(history)
    }

    /// A fresh history backed by a [`MemoryDeltaStore`].
    pub fn in_memory(factory: HashedVersionFactory) -> Self {
        let zero = factory.version_zero();
        Self {
            signatures: BTreeMap::from([(0, zero.clone())]),
            current: zero,
            factory,
            store: Box::new(MemoryDeltaStore::new()),
        }
    }

    pub fn factory(&self) -> &HashedVersionFactory {
        &self.factory
    }

    /// The committed delta that applies at `version`, if any.
    pub fn get_delta_starting_at(
        &self,
        version: u64,
    ) -> Result<Option<TransformedWaveletDelta>, HistoryError> {
        if version >= self.current.version() || !self.signatures.contains_key(&version) {
            return Ok(None);
        }
        Ok(self.store.get(version)?)
    }

    /// True iff the chain has exactly this hash at this version.
    pub fn has_signature(&self, signature: &HashedVersion) -> bool {
        self.signatures.get(&signature.version()) == Some(signature)
    }

    pub fn signature_at(&self, version: u64) -> Option<&HashedVersion> {
        self.signatures.get(&version)
    }

    pub fn current_version(&self) -> u64 {
        self.current.version()
    }

    pub fn current_signature(&self) -> &HashedVersion {
        &self.current
    }

    /// Append a committed delta.
    ///
    /// # Panics
    ///
    /// If the delta does not apply at the current version, or does not
    /// consume exactly one version per operation.
    pub fn append(&mut self, delta: TransformedWaveletDelta) -> Result<(), HistoryError> {
        assert_eq!(
            delta.applied_at_version(),
            self.current.version(),
            "delta appended out of order: applies at {}, history head is {}",
            delta.applied_at_version(),
            self.current
        );
        assert_eq!(
            delta.span(),
            delta.len() as u64,
            "delta of {} ops spans {} versions",
            delta.len(),
            delta.span()
        );

        let expected = self.expected_signature(delta.author(), delta.ops())?;
        if &expected != delta.resulting_version() {
            return Err(HistoryError::SignatureMismatch {
                expected,
                got: delta.resulting_version().clone(),
            });
        }
        self.store.append(&delta)?;
        self.record(expected);
        Ok(())
    }

    /// Sign `ops` against the head and append them as a committed delta.
    pub fn commit(
        &mut self,
        author: ParticipantId,
        ops: Vec<WaveletOperation>,
        application_timestamp: u64,
    ) -> Result<TransformedWaveletDelta, HistoryError> {
        let resulting = self.expected_signature(&author, &ops)?;
        let delta = TransformedWaveletDelta::new(author, resulting, application_timestamp, ops)?;
        self.append(delta.clone())?;
        log::debug!(
            "Committed {} ops by {} at {}",
            delta.len(),
            delta.author(),
            delta.resulting_version()
        );
        Ok(delta)
    }

    /// The committed deltas between two delta boundaries.
    pub fn deltas_between(&self, start: u64, end: u64) -> Result<DeltaSequence, HistoryError> {
        for version in [start, end] {
            if !self.signatures.contains_key(&version) {
                return Err(HistoryError::UnknownVersion(version));
            }
        }
        if start >= end {
            return Ok(DeltaSequence::empty());
        }
        Ok(DeltaSequence::new(self.store.read(start, end)?)?)
    }

    /// Drop every delta after `version`, which must be a delta boundary.
    /// Returns the number of deltas removed.
    pub fn truncate(&mut self, version: u64) -> Result<usize, HistoryError> {
        let Some(signature) = self.signatures.get(&version).cloned() else {
            return Err(HistoryError::UnknownVersion(version));
        };
        let removed = self.store.truncate(version);
        self.signatures.retain(|v, _| *v <= version);
        self.current = signature;
        log::warn!("History truncated to {}, {removed} deltas removed", self.current);
        Ok(removed)
    }

    pub fn stats(&self) -> DeltaStats {
        self.store.stats()
    }

    fn expected_signature(
        &self,
        author: &ParticipantId,
        ops: &[WaveletOperation],
    ) -> Result<HashedVersion, HistoryError> {
        let bytes = content_bytes(author, ops)?;
        Ok(self.factory.create(&self.current, &bytes, version_span(ops)))
    }

    fn record(&mut self, signature: HashedVersion) {
        self.signatures.insert(signature.version(), signature.clone());
        self.current = signature;
    }
}

impl fmt::Debug for DeltaHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaHistory")
            .field("current", &self.current)
            .field("boundaries", &self.signatures.len())
            .finish()
    }
}
