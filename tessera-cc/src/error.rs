//! Crate-level error.

use crate::history::HistoryError;
use crate::protocol::ChannelError;
use std::fmt;
use tessera_model::{DeltaError, TransformError};

/// Any failure surfaced by the concurrency-control layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CcError {
    /// Two operations could not be reconciled
    Transform(TransformError),
    /// Protocol failure; the session must be discarded
    Channel(ChannelError),
    History(HistoryError),
    Delta(DeltaError),
}

impl CcError {
    /// Whether the session that saw this error has to be thrown away.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, CcError::Transform(_) | CcError::Channel(_))
    }
}

impl fmt::Display for CcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CcError::Transform(e) => write!(f, "{e}"),
            CcError::Channel(e) => write!(f, "Channel error: {e}"),
            CcError::History(e) => write!(f, "History error: {e}"),
            CcError::Delta(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CcError {}

impl From<TransformError> for CcError {
    fn from(e: TransformError) -> Self {
        CcError::Transform(e)
    }
}

impl From<ChannelError> for CcError {
    fn from(e: ChannelError) -> Self {
        CcError::Channel(e)
    }
}

impl From<HistoryError> for CcError {
    fn from(e: HistoryError) -> Self {
        CcError::History(e)
    }
}

impl From<DeltaError> for CcError {
    fn from(e: DeltaError) -> Self {
        CcError::Delta(e)
    }
}
