//! Operation-level transform and compose.
//!
//! ```text
//!            S
//!     client/ \server
//!          /   \
//!        Sc     Ss
//!  server'\     /client'
//!          \   /
//!           S'
//! ```
//!
//! Blip operations on the same blip delegate to the document op
//! primitive. Participant operations collide only on the same participant.
//! Everything else commutes and passes through unchanged.

use crate::document::DocOpError;
use crate::operation::{OperationKind, WaveletOperation};
use std::fmt;

/// Two operations cannot be reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    message: String,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transform failed: {}", self.message)
    }
}

impl std::error::Error for TransformError {}

impl From<DocOpError> for TransformError {
    fn from(e: DocOpError) -> Self {
        TransformError::new(e.to_string())
    }
}

/// Transform a client operation against a concurrent server operation.
///
/// Returns `(client', server')`. Contexts are preserved; only the kinds
/// change.
pub fn transform(
    client: &WaveletOperation,
    server: &WaveletOperation,
) -> Result<(WaveletOperation, WaveletOperation), TransformError> {
    use OperationKind::*;

    match (&client.kind, &server.kind) {
        (
            Blip {
                blip_id: client_blip,
                content: client_op,
            },
            Blip {
                blip_id: server_blip,
                content: server_op,
            },
        ) if client_blip == server_blip => {
            let (client_op, server_op) = crate::document::DocOp::transform(client_op, server_op)?;
            Ok((
                WaveletOperation::new(
                    client.context.clone(),
                    Blip {
                        blip_id: client_blip.clone(),
                        content: client_op,
                    },
                ),
                WaveletOperation::new(
                    server.context.clone(),
                    Blip {
                        blip_id: server_blip.clone(),
                        content: server_op,
                    },
                ),
            ))
        }
        (AddParticipant(a), AddParticipant(b)) | (RemoveParticipant(a), RemoveParticipant(b))
            if a == b =>
        {
            // Both sides did the same thing; neither needs to do it again.
            Ok((
                client.create_version_update_op(
                    client.version_increment(),
                    client.context.hashed_version.clone(),
                ),
                server.create_version_update_op(
                    server.version_increment(),
                    server.context.hashed_version.clone(),
                ),
            ))
        }
        (AddParticipant(a), RemoveParticipant(b)) | (RemoveParticipant(a), AddParticipant(b))
            if a == b =>
        {
            Err(TransformError::new(format!(
                "concurrent add and remove of participant {a}"
            )))
        }
        _ => Ok((client.clone(), server.clone())),
    }
}

/// Whether `first` followed by `second` can be composed into one operation.
pub fn can_compose(first: &WaveletOperation, second: &WaveletOperation) -> bool {
    match (first.blip_id(), second.blip_id()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Compose two blip operations on the same blip.
///
/// The result carries `second`'s creator and timestamp and consumes a
/// single version slot.
pub fn compose(
    first: &WaveletOperation,
    second: &WaveletOperation,
) -> Result<WaveletOperation, TransformError> {
    match (&first.kind, &second.kind) {
        (
            OperationKind::Blip {
                blip_id,
                content: first_op,
            },
            OperationKind::Blip {
                blip_id: second_blip,
                content: second_op,
            },
        ) if blip_id == second_blip => {
            let mut context = second.context.clone();
            context.version_increment = 1;
            Ok(WaveletOperation::new(
                context,
                OperationKind::Blip {
                    blip_id: blip_id.clone(),
                    content: first_op.compose(second_op)?,
                },
            ))
        }
        _ => Err(TransformError::new(format!(
            "cannot compose {:?} with {:?}",
            first.kind, second.kind
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocOp, Document};
    use crate::operation::ParticipantId;

    fn base() -> Document {
        Document::parse("<blip><p>abc</p></blip>").unwrap()
    }

    fn insert(who: &str, ts: u64, offset: usize, text: &str) -> WaveletOperation {
        WaveletOperation::blip(
            who.into(),
            ts,
            "b+1",
            DocOp::insert_text(base().len(), offset, text),
        )
    }

    fn content(op: &WaveletOperation) -> &DocOp {
        match &op.kind {
            OperationKind::Blip { content, .. } => content,
            other => panic!("not a blip op: {other:?}"),
        }
    }

    #[test]
    fn test_transform_same_blip_converges() {
        let client = insert("alice", 1, 2, "X");
        let server = insert("bob", 2, 3, "Y");
        let (c2, s2) = transform(&client, &server).unwrap();

        let d = base();
        let a = d.apply(content(&server)).unwrap().apply(content(&c2)).unwrap();
        let b = d.apply(content(&client)).unwrap().apply(content(&s2)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.text(), "XaYbc");
        assert_eq!(c2.creator(), &ParticipantId::from("alice"));
        assert_eq!(s2.timestamp(), 2);
    }

    #[test]
    fn test_transform_different_blips_passes_through() {
        let client = insert("alice", 1, 2, "X");
        let server = WaveletOperation::blip("bob".into(), 2, "b+2", DocOp::identity(1));
        let (c2, s2) = transform(&client, &server).unwrap();
        assert_eq!(c2, client);
        assert_eq!(s2, server);
    }

    #[test]
    fn test_transform_same_participant_add() {
        let client = WaveletOperation::add_participant("alice".into(), 1, "carol".into());
        let server = WaveletOperation::add_participant("bob".into(), 2, "carol".into());
        let (c2, s2) = transform(&client, &server).unwrap();
        assert!(c2.is_version_update());
        assert!(s2.is_version_update());
        assert_eq!(s2.creator(), &ParticipantId::from("bob"));
    }

    #[test]
    fn test_transform_add_remove_conflict() {
        let client = WaveletOperation::add_participant("alice".into(), 1, "carol".into());
        let server = WaveletOperation::remove_participant("bob".into(), 2, "carol".into());
        assert!(transform(&client, &server).is_err());
    }

    #[test]
    fn test_compose_uses_last_context() {
        let first = insert("alice", 1, 2, "X");
        let len = base().len() + 1;
        let second = WaveletOperation::blip("alice".into(), 5, "b+1", DocOp::insert_text(len, 3, "Y"));
        let composed = compose(&first, &second).unwrap();

        assert_eq!(composed.timestamp(), 5);
        assert_eq!(composed.version_increment(), 1);
        assert_eq!(base().apply(content(&composed)).unwrap().text(), "XYabc");
    }

    #[test]
    fn test_compose_rejects_different_blips() {
        let first = insert("alice", 1, 2, "X");
        let second = WaveletOperation::blip("alice".into(), 2, "b+2", DocOp::identity(1));
        assert!(!can_compose(&first, &second));
        assert!(compose(&first, &second).is_err());
    }
}
