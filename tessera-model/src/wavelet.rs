//! Wavelet state: participants plus one document per blip.

use crate::document::{DocOpError, Document};
use crate::operation::{OperationKind, ParticipantId, WaveletOperation};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    DuplicateParticipant(ParticipantId),
    UnknownParticipant(ParticipantId),
    Blip { blip_id: String, error: DocOpError },
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationError::DuplicateParticipant(p) => {
                write!(f, "Participant already present: {p}")
            }
            OperationError::UnknownParticipant(p) => write!(f, "Participant not present: {p}"),
            OperationError::Blip { blip_id, error } => {
                write!(f, "Blip {blip_id} rejected operation: {error}")
            }
        }
    }
}

impl std::error::Error for OperationError {}

/// Materialized state of a wavelet. Versions are tracked by whoever owns it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaveletState {
    participants: BTreeSet<ParticipantId>,
    blips: BTreeMap<String, Document>,
}

impl WaveletState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state holding a single blip.
    pub fn with_blip(blip_id: impl Into<String>, document: Document) -> Self {
        let mut state = Self::new();
        state.blips.insert(blip_id.into(), document);
        state
    }

    /// Apply `op` in place. On error the state is unchanged.
    pub fn apply(&mut self, op: &WaveletOperation) -> Result<(), OperationError> {
        match &op.kind {
            OperationKind::NoOp | OperationKind::VersionUpdate => Ok(()),
            OperationKind::AddParticipant(p) => {
                if !self.participants.insert(p.clone()) {
                    return Err(OperationError::DuplicateParticipant(p.clone()));
                }
                Ok(())
            }
            OperationKind::RemoveParticipant(p) => {
                if !self.participants.remove(p) {
                    return Err(OperationError::UnknownParticipant(p.clone()));
                }
                Ok(())
            }
            OperationKind::Blip { blip_id, content } => {
                let current = self.blips.get(blip_id).cloned().unwrap_or_default();
                let next = current.apply(content).map_err(|error| OperationError::Blip {
                    blip_id: blip_id.clone(),
                    error,
                })?;
                self.blips.insert(blip_id.clone(), next);
                Ok(())
            }
        }
    }

    pub fn apply_all<'a>(
        &mut self,
        ops: impl IntoIterator<Item = &'a WaveletOperation>,
    ) -> Result<(), OperationError> {
        for op in ops {
            self.apply(op)?;
        }
        Ok(())
    }

    pub fn participants(&self) -> &BTreeSet<ParticipantId> {
        &self.participants
    }

    pub fn blip(&self, blip_id: &str) -> Option<&Document> {
        self.blips.get(blip_id)
    }

    /// Markup of a blip, or an empty string if it does not exist.
    pub fn blip_markup(&self, blip_id: &str) -> String {
        self.blip(blip_id).map(Document::to_markup).unwrap_or_default()
    }

    /// Length of a blip document, zero if it does not exist.
    pub fn blip_len(&self, blip_id: &str) -> usize {
        self.blip(blip_id).map_or(0, Document::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocOp;

    #[test]
    fn test_apply_participants() {
        let mut state = WaveletState::new();
        let add = WaveletOperation::add_participant("a".into(), 1, "bob".into());
        state.apply(&add).unwrap();
        assert!(state.participants().contains(&ParticipantId::from("bob")));
        assert_eq!(
            state.apply(&add),
            Err(OperationError::DuplicateParticipant("bob".into()))
        );

        let remove = WaveletOperation::remove_participant("a".into(), 2, "bob".into());
        state.apply(&remove).unwrap();
        assert!(state.apply(&remove).is_err());
    }

    #[test]
    fn test_apply_blip_creates_document() {
        let mut state = WaveletState::new();
        let op = WaveletOperation::blip(
            "a".into(),
            1,
            "b+1",
            DocOp::builder().element_start("p").characters("hi").element_end().finish(),
        );
        state.apply(&op).unwrap();
        assert_eq!(state.blip_markup("b+1"), "<p>hi</p>");
        assert_eq!(state.blip_len("b+1"), 4);
        assert_eq!(state.blip_markup("missing"), "");
    }

    #[test]
    fn test_failed_apply_leaves_state() {
        let doc = Document::parse("<p>abc</p>").unwrap();
        let mut state = WaveletState::with_blip("b+1", doc.clone());
        let bad = WaveletOperation::blip("a".into(), 1, "b+1", DocOp::identity(2));
        assert!(matches!(state.apply(&bad), Err(OperationError::Blip { .. })));
        assert_eq!(state.blip("b+1"), Some(&doc));
    }
}
