//! Server-side concurrency control for one document.
//!
//! ```text
//!  submit(delta @ v3)
//!        │
//!        ▼
//!  ┌──────────────┐  transform vs [3..5) [5..6)  ┌──────────────┐
//!  │ CC core      │ ───────────────────────────► │ DeltaHistory │
//!  │ (one writer) │ ◄─────────────────────────── │ v0 … v6      │
//!  └──────┬───────┘        commit @ v6           └──────────────┘
//!         │
//!         ▼
//!  Committed(delta [6..8))  or  Duplicate(@ v6)
//! ```
//!
//! The core is a plain single-writer state machine; serialization across
//! submitters is the caller's job (see [`crate::hub`]).

use crate::delta_pair::{DeltaTransformer, OtTransformer};
use crate::error::CcError;
use crate::history::{DeltaHistory, HistoryError};
use crate::protocol::ChannelError;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tessera_model::{
    version_span, DeltaError, DeltaSequence, HashedVersion, HashedVersionFactory, ParticipantId,
    TransformedWaveletDelta, WaveletDelta,
};

/// Core statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreStats {
    pub submitted: u64,
    pub committed: u64,
    pub duplicates: u64,
    pub rejected: u64,
    /// Committed deltas a submission was transformed against
    pub transformed_against: u64,
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The delta was transformed and appended.
    Committed(TransformedWaveletDelta),
    /// The delta was already in history (a ghost or a resubmission); it
    /// transformed to nothing and was not appended.
    Duplicate {
        author: ParticipantId,
        version: HashedVersion,
    },
}

impl SubmitOutcome {
    /// `(ops_applied, version)` to acknowledge to the submitter.
    pub fn ack(&self) -> (usize, HashedVersion) {
        match self {
            SubmitOutcome::Committed(delta) => (delta.len(), delta.resulting_version().clone()),
            SubmitOutcome::Duplicate { version, .. } => (0, version.clone()),
        }
    }

    pub fn committed(&self) -> Option<&TransformedWaveletDelta> {
        match self {
            SubmitOutcome::Committed(delta) => Some(delta),
            SubmitOutcome::Duplicate { .. } => None,
        }
    }
}

/// Where a (re)connecting session starts, plus the history it missed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconnection {
    pub connect_version: HashedVersion,
    pub current_version: HashedVersion,
    pub deltas: DeltaSequence,
}

pub struct ConcurrencyControlCore {
    history: DeltaHistory,
    transformer: Arc<dyn DeltaTransformer>,
    stats: CoreStats,
}

impl ConcurrencyControlCore {
    pub fn new(history: DeltaHistory) -> Self {
        Self::with_transformer(history, Arc::new(OtTransformer))
    }

    pub fn with_transformer(history: DeltaHistory, transformer: Arc<dyn DeltaTransformer>) -> Self {
        Self {
            history,
            transformer,
            stats: CoreStats::default(),
        }
    }

    /// A core over an empty in-memory history.
    pub fn in_memory(factory: HashedVersionFactory) -> Self {
        Self::new(DeltaHistory::in_memory(factory))
    }

    /// Transform `delta` against everything committed since its target
    /// version and append the result.
    pub fn submit(&mut self, delta: WaveletDelta) -> Result<SubmitOutcome, CcError> {
        self.stats.submitted += 1;
        let outcome = self.try_submit(delta);
        match &outcome {
            Ok(SubmitOutcome::Committed(_)) => self.stats.committed += 1,
            Ok(SubmitOutcome::Duplicate { author, version }) => {
                self.stats.duplicates += 1;
                log::info!("Absorbed duplicate delta from {author} at {version}");
            }
            Err(e) => {
                self.stats.rejected += 1;
                log::warn!("Rejected delta: {e}");
            }
        }
        outcome
    }

    fn try_submit(&mut self, delta: WaveletDelta) -> Result<SubmitOutcome, CcError> {
        if delta.is_empty() {
            return Err(ChannelError::EmptyDelta.into());
        }
        let target = delta.target_version().clone();
        let current = self.history.current_version();
        if target.version() > current {
            return Err(ChannelError::VersionAhead {
                target: target.version(),
                current,
            }
            .into());
        }
        if !self.history.has_signature(&target) {
            return Err(ChannelError::UnknownSignature(target).into());
        }

        let author = delta.author().clone();
        let mut ops = delta.into_ops();
        let mut version = target.version();
        while version < current {
            let committed = self
                .history
                .get_delta_starting_at(version)?
                .ok_or(HistoryError::UnknownVersion(version))?;
            let (client, _) = self
                .transformer
                .transform(ops, committed.ops().to_vec())?
                .into_parts();
            ops = client;
            self.stats.transformed_against += 1;
            version = committed.resulting_version().version();
            if ops.is_empty() {
                break;
            }
        }

        if ops.is_empty() {
            return Ok(SubmitOutcome::Duplicate {
                author,
                version: self.history.current_signature().clone(),
            });
        }
        if ops.iter().any(|op| op.version_increment() != 1) {
            return Err(DeltaError::VersionSpan {
                ops: ops.len(),
                span: version_span(&ops),
            }
            .into());
        }
        let committed = self.history.commit(author, ops, now_millis())?;
        Ok(SubmitOutcome::Committed(committed))
    }

    /// Pick the highest offered version the history still has and return
    /// the deltas after it.
    pub fn reconnect(&self, candidates: &[HashedVersion]) -> Result<Reconnection, CcError> {
        let Some(connect_version) = candidates
            .iter()
            .filter(|v| self.history.has_signature(v))
            .max_by_key(|v| v.version())
            .cloned()
        else {
            log::warn!(
                "Refusing reconnection: none of {:?} matches history at {}",
                candidates,
                self.history.current_signature()
            );
            return Err(ChannelError::NoMatchingSignature(candidates.to_vec()).into());
        };

        let current_version = self.history.current_signature().clone();
        let deltas = self
            .history
            .deltas_between(connect_version.version(), current_version.version())?;
        log::debug!(
            "Reconnecting at {connect_version}, {} deltas to replay",
            deltas.len()
        );
        Ok(Reconnection {
            connect_version,
            current_version,
            deltas,
        })
    }

    /// A new session: everything from version zero.
    pub fn open(&self) -> Result<Reconnection, CcError> {
        self.reconnect(&[self.history.factory().version_zero()])
    }

    pub fn history(&self) -> &DeltaHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut DeltaHistory {
        &mut self.history
    }

    pub fn stats(&self) -> &CoreStats {
        &self.stats
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
