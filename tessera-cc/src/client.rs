//! Client-side concurrency control.
//!
//! ```text
//!             on_client_operations            on_server_deltas
//!                     │                              │
//!                     ▼                              ▼
//!  ┌────────────────────────────┐   transform   ┌──────────────────┐
//!  │ OperationQueue             │ ◄───────────► │ server delta     │
//!  │  (merged local ops)        │               └────────┬─────────┘
//!  └─────────────┬──────────────┘                        │
//!                │ take                                  ▼
//!                ▼                              ┌──────────────────┐
//!  ┌────────────────────────────┐   transform   │ server_operations│ ──► receive()
//!  │ unacknowledged (≤ 1)       │ ◄───────────► │  (to the model)  │
//!  └─────────────┬──────────────┘               └──────────────────┘
//!                │ on_success(ack)
//!                ▼
//!  inferred server path: acked deltas not yet confirmed by a foreign
//!  delta or a commit notice; replayed on reconnection if the server
//!  lost them.
//! ```
//!
//! Exactly one delta is in flight at a time. Server deltas are pushed
//! through the in-flight delta and then through every queued item before
//! they reach the local model, so local edits survive.

use crate::delta_pair::{DeltaPair, DeltaTransformer, OtTransformer};
use crate::error::CcError;
use crate::protocol::{ChannelError, ServerMessage};
use crate::queue::OperationQueue;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tessera_model::{HashedVersion, TransformedWaveletDelta, WaveletDelta, WaveletOperation};

/// Outgoing side of a document channel.
pub trait ServerConnection {
    fn send(&mut self, delta: WaveletDelta);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Connect requested, waiting for the server's open
    AwaitingOpen,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AckInfo {
    ops: usize,
    version: HashedVersion,
}

#[derive(Debug, Clone)]
struct AckedDelta {
    delta: WaveletDelta,
    ack: AckInfo,
}

/// Snapshot of how much local work has not reached durable history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnsavedDataInfo {
    /// Operations in the in-flight delta
    pub in_flight_size: usize,
    /// Queued plus in-flight operations
    pub estimated_unacknowledged: usize,
    /// Acked-but-uncommitted plus unacknowledged operations
    pub estimated_uncommitted: usize,
    pub last_ack_version: u64,
    pub last_commit_version: u64,
}

impl UnsavedDataInfo {
    pub fn is_saved(&self) -> bool {
        self.estimated_uncommitted == 0
    }
}

pub struct ConcurrencyControl<C: ServerConnection> {
    state: ConnectionState,
    /// Last server version known to be on the server path
    start_signature: HashedVersion,
    /// Head version announced by the last open, until the first send
    end_of_starting_delta: Option<HashedVersion>,
    inferred_path: VecDeque<AckedDelta>,
    acks: VecDeque<AckInfo>,
    last_commit_version: u64,
    unacknowledged: Option<WaveletDelta>,
    queue: OperationQueue,
    /// Transformed server ops waiting for the local model
    server_operations: VecDeque<WaveletOperation>,
    transformer: Arc<dyn DeltaTransformer>,
    connection: C,
}

impl<C: ServerConnection> ConcurrencyControl<C> {
    pub fn new(start_signature: HashedVersion, connection: C) -> Self {
        Self::with_transformer(start_signature, connection, Arc::new(OtTransformer))
    }

    /// Use `transformer` for both the in-flight delta and the queue.
    pub fn with_transformer(
        start_signature: HashedVersion,
        connection: C,
        transformer: Arc<dyn DeltaTransformer>,
    ) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            start_signature,
            end_of_starting_delta: None,
            inferred_path: VecDeque::new(),
            acks: VecDeque::new(),
            last_commit_version: 0,
            unacknowledged: None,
            queue: OperationQueue::with_transformer(transformer.clone()),
            server_operations: VecDeque::new(),
            transformer,
            connection,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    /// First connection attempt. The server answers with an open.
    pub fn connect(&mut self) {
        self.state = ConnectionState::AwaitingOpen;
    }

    /// The server accepted the session at `connect_version`; history is at
    /// `current_version`.
    pub fn on_open(
        &mut self,
        connect_version: HashedVersion,
        current_version: HashedVersion,
    ) -> Result<(), CcError> {
        if current_version.version() < connect_version.version() {
            return Err(ChannelError::InvalidOpen {
                connect_version,
                current_version,
            }
            .into());
        }

        let start_resend = if self.start_signature == connect_version {
            Some(0)
        } else {
            self.inferred_path
                .iter()
                .position(|acked| acked.ack.version == connect_version)
                .map(|i| i + 1)
        };
        let Some(start_resend) = start_resend else {
            log::warn!(
                "No matching signature on reconnection: open at {connect_version}, \
                 head {current_version}, {self:?}"
            );
            return Err(ChannelError::NoMatchingSignature(self.reconnection_versions()).into());
        };

        let path_len = self.inferred_path.len();
        if start_resend < path_len || (start_resend == path_len && connect_version == current_version)
        {
            self.merge_to_client_queue(start_resend);
        } else {
            log::trace!("All inferred signatures matched on reconnection");
        }

        let start = self.start_signature.version();
        self.acks.retain(|ack| ack.version.version() <= start);
        self.end_of_starting_delta = Some(current_version);
        self.state = ConnectionState::Connected;
        log::debug!("Channel open at {connect_version}");
        self.send_delta()
    }

    pub fn on_disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            log::debug!(
                "Disconnected with {} unacknowledged ops",
                self.unacknowledged.as_ref().map_or(0, WaveletDelta::len)
            );
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Versions to offer the server when reconnecting, oldest first.
    pub fn reconnection_versions(&self) -> Vec<HashedVersion> {
        std::iter::once(self.start_signature.clone())
            .chain(self.inferred_path.iter().map(|acked| acked.ack.version.clone()))
            .collect()
    }

    /// Start a reconnection and return the versions to offer.
    pub fn begin_reconnect(&mut self) -> Vec<HashedVersion> {
        self.state = ConnectionState::AwaitingOpen;
        self.reconnection_versions()
    }

    /// Local edits. They are transformed past any server ops the model has
    /// not consumed yet, queued, and sent if nothing is in flight.
    pub fn on_client_operations(&mut self, ops: Vec<WaveletOperation>) -> Result<(), CcError> {
        let pending = Vec::from(std::mem::take(&mut self.server_operations));
        let (client, server) = self.transformer.transform(ops, pending)?.into_parts();
        self.server_operations = server.into();
        for op in client {
            self.queue.add(op);
        }
        self.send_delta()
    }

    /// The in-flight delta was applied as `ops_applied` operations ending
    /// at `version`.
    pub fn on_success(&mut self, ops_applied: usize, version: HashedVersion) -> Result<(), CcError> {
        let Some(unacked) = self.unacknowledged.as_ref() else {
            return Err(ChannelError::UnexpectedAck.into());
        };
        if unacked.resulting_version() != version.version() || unacked.len() != ops_applied {
            return Err(ChannelError::AckMismatch {
                expected_ops: unacked.len(),
                expected_version: unacked.resulting_version(),
                ops_applied,
                version: version.version(),
            }
            .into());
        }
        if unacked.target_version().version() < self.start_signature.version() {
            log::error!(
                "Ack for delta targeted at {} before start version {}",
                unacked.target_version(),
                self.start_signature
            );
        }

        let ack = AckInfo {
            ops: ops_applied,
            version: version.clone(),
        };
        let Some(unacked) = self.unacknowledged.take() else {
            return Err(ChannelError::UnexpectedAck.into());
        };

        // The model learns its new version through version-update ops, one
        // per acked op, the last carrying the signature.
        let last = unacked.len().saturating_sub(1);
        let version_ops: Vec<WaveletOperation> = unacked
            .ops()
            .iter()
            .enumerate()
            .map(|(i, op)| op.create_version_update_op(1, (i == last).then(|| version.clone())))
            .collect();

        if !unacked.is_empty() {
            self.inferred_path.push_back(AckedDelta {
                delta: unacked,
                ack: ack.clone(),
            });
        }
        self.acks.push_back(ack);

        let version_ops = self.queue.transform(version_ops)?;
        self.server_operations.extend(version_ops);
        self.send_delta()
    }

    pub fn on_server_deltas(&mut self, deltas: Vec<TransformedWaveletDelta>) -> Result<(), CcError> {
        if deltas.is_empty() {
            log::error!("Unexpected empty server deltas");
            return Ok(());
        }
        log::trace!("{} server deltas received", deltas.len());
        for delta in deltas {
            self.transform_operations_and_notify(delta)?;
        }
        self.send_delta()
    }

    /// Everything up to `version` is durable on the server.
    pub fn on_commit(&mut self, version: u64) {
        while let Some(front) = self.inferred_path.front() {
            if front.delta.resulting_version() > version {
                break;
            }
            if let Some(acked) = self.inferred_path.pop_front() {
                self.start_signature = acked.ack.version;
            }
        }
        while self
            .acks
            .front()
            .is_some_and(|ack| ack.version.version() <= version)
        {
            self.acks.pop_front();
        }
        self.last_commit_version = version;
        log::trace!(
            "Commit at {version}, inferred path {}, in flight {}",
            self.inferred_path.len(),
            self.unacknowledged.is_some()
        );
    }

    pub fn on_message(&mut self, message: ServerMessage) -> Result<(), CcError> {
        match message {
            ServerMessage::Open {
                connect_version,
                current_version,
            } => self.on_open(connect_version, current_version),
            ServerMessage::Deltas(deltas) => self.on_server_deltas(deltas),
            ServerMessage::Ack {
                ops_applied,
                version,
            } => self.on_success(ops_applied, version),
            ServerMessage::Commit { version } => {
                self.on_commit(version);
                Ok(())
            }
        }
    }

    /// Next server operation for the local model.
    pub fn receive(&mut self) -> Option<WaveletOperation> {
        self.server_operations.pop_front()
    }

    pub fn peek(&self) -> Option<&WaveletOperation> {
        self.server_operations.front()
    }

    pub fn unsaved_data(&self) -> UnsavedDataInfo {
        let in_flight_size = self.unacknowledged.as_ref().map_or(0, WaveletDelta::len);
        let estimated_unacknowledged = self.queue.estimate_size() + in_flight_size;
        let acked_uncommitted: usize = self.acks.iter().map(|ack| ack.ops).sum();
        UnsavedDataInfo {
            in_flight_size,
            estimated_unacknowledged,
            estimated_uncommitted: acked_uncommitted + estimated_unacknowledged,
            last_ack_version: self
                .acks
                .back()
                .map_or(self.last_commit_version, |ack| ack.version.version()),
            last_commit_version: self.last_commit_version,
        }
    }

    /// Shut down. Returns whether everything sent was committed.
    pub fn close(&mut self) -> bool {
        if !self.queue.is_empty() {
            log::error!("Concurrency control closed with pending operations, data has been lost");
        }
        self.state = ConnectionState::Disconnected;
        self.acks.is_empty() && self.unacknowledged.is_none()
    }

    fn send_delta(&mut self) -> Result<(), CcError> {
        if self.state != ConnectionState::Connected {
            log::trace!("Not ready to send, channel is {:?}", self.state);
            return Ok(());
        }
        if let Some(unacked) = &self.unacknowledged {
            log::trace!(
                "Delta in flight, expected at version {}",
                unacked.target_version()
            );
            return Ok(());
        }
        if self.queue.is_empty() {
            return Ok(());
        }

        self.end_of_starting_delta = None;
        let ops = self.queue.take();
        let Some(author) = ops.first().map(|op| op.creator().clone()) else {
            return Ok(());
        };
        let delta = WaveletDelta::new(author, self.last_signature().clone(), ops)?;
        log::trace!(
            "Sending {} ops targeted at {}",
            delta.len(),
            delta.target_version()
        );
        self.unacknowledged = Some(delta.clone());
        self.connection.send(delta);
        Ok(())
    }

    fn transform_operations_and_notify(
        &mut self,
        server_delta: TransformedWaveletDelta,
    ) -> Result<(), CcError> {
        let latest = self.last_signature().version();
        let applied_at = server_delta.applied_at_version();
        if applied_at < latest {
            return Err(ChannelError::StaleServerDelta { applied_at, latest }.into());
        }
        if self.detect_echo_back(&server_delta)? {
            return Ok(());
        }

        self.inferred_path.clear();
        self.start_signature = server_delta.resulting_version().clone();

        let mut server_ops = server_delta.ops().to_vec();
        if let Some(unacked) = self.unacknowledged.take() {
            let target = unacked.target_version().version();
            if applied_at != target {
                return Err(ChannelError::VersionMismatch { applied_at, target }.into());
            }
            let author = unacked.author().clone();
            let (client, server) = self
                .transformer
                .transform(unacked.into_ops(), server_ops)?
                .into_parts();
            server_ops = server;
            self.unacknowledged = Some(WaveletDelta::new(
                author,
                server_delta.resulting_version().clone(),
                client,
            )?);
        }

        let server_ops = self.queue.transform(server_ops)?;
        self.server_operations.extend(server_ops);
        Ok(())
    }

    /// During the burst of deltas replayed after an open, recognise our
    /// own in-flight delta coming back.
    fn detect_echo_back(&mut self, server_delta: &TransformedWaveletDelta) -> Result<bool, CcError> {
        let Some(end) = &self.end_of_starting_delta else {
            return Ok(false);
        };
        if end.version() <= server_delta.applied_at_version() {
            return Ok(false);
        }
        let reaches_end = end == server_delta.resulting_version();

        let echoed = self
            .unacknowledged
            .as_ref()
            .is_some_and(|unacked| DeltaPair::are_same(unacked.ops(), server_delta.ops()));
        if echoed {
            log::debug!(
                "In-flight delta echoed back at {}",
                server_delta.resulting_version()
            );
            self.on_success(server_delta.len(), server_delta.resulting_version().clone())?;
            return Ok(true);
        }
        if reaches_end {
            self.merge_to_client_queue(self.inferred_path.len());
        }
        Ok(false)
    }

    /// Move inferred deltas from `start` on, and the in-flight delta, back
    /// to the head of the queue for resending.
    fn merge_to_client_queue(&mut self, start: usize) {
        let mut deltas: Vec<WaveletDelta> = if start < self.inferred_path.len() {
            self.inferred_path
                .drain(start..)
                .map(|acked| acked.delta)
                .collect()
        } else {
            Vec::new()
        };
        deltas.extend(self.unacknowledged.take());
        if !deltas.is_empty() {
            log::debug!("Re-queueing {} deltas for resend", deltas.len());
        }
        for delta in deltas.into_iter().rev() {
            self.queue.insert_head(delta.into_ops());
        }
    }

    fn last_signature(&self) -> &HashedVersion {
        self.inferred_path
            .back()
            .map_or(&self.start_signature, |acked| &acked.ack.version)
    }
}

impl<C: ServerConnection> fmt::Debug for ConcurrencyControl<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyControl")
            .field("state", &self.state)
            .field("start_signature", &self.start_signature)
            .field("end_of_starting_delta", &self.end_of_starting_delta)
            .field("last_commit_version", &self.last_commit_version)
            .field("inferred_path", &self.inferred_path.len())
            .field("unacknowledged", &self.unacknowledged.as_ref().map(WaveletDelta::len))
            .field("queue", &self.queue)
            .field("server_operations", &self.server_operations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_model::{DocOp, HashedVersionFactory};

    #[derive(Debug, Default)]
    struct Sent(Vec<WaveletDelta>);

    impl ServerConnection for Sent {
        fn send(&mut self, delta: WaveletDelta) {
            self.0.push(delta);
        }
    }

    const LEN: usize = 7;

    fn factory() -> HashedVersionFactory {
        HashedVersionFactory::new("doc")
    }

    fn insert(who: &str, ts: u64, len: usize, at: usize, text: &str) -> WaveletOperation {
        WaveletOperation::blip(who.into(), ts, "b+1", DocOp::insert_text(len, at, text))
    }

    fn connected() -> (ConcurrencyControl<Sent>, HashedVersion) {
        let v0 = factory().version_zero();
        let mut cc = ConcurrencyControl::new(v0.clone(), Sent::default());
        cc.connect();
        cc.on_open(v0.clone(), v0.clone()).unwrap();
        (cc, v0)
    }

    fn commit_as(
        at: &HashedVersion,
        author: &str,
        ops: Vec<WaveletOperation>,
    ) -> TransformedWaveletDelta {
        let bytes = tessera_model::content_bytes(&author.into(), &ops).unwrap();
        let resulting = factory().create(at, &bytes, tessera_model::version_span(&ops));
        TransformedWaveletDelta::new(author.into(), resulting, 0, ops).unwrap()
    }

    #[test]
    fn test_sends_nothing_until_open() {
        let v0 = factory().version_zero();
        let mut cc = ConcurrencyControl::new(v0.clone(), Sent::default());
        cc.on_client_operations(vec![insert("alice", 1, LEN, 2, "X")]).unwrap();
        assert!(cc.connection().0.is_empty());

        cc.connect();
        assert_eq!(cc.state(), ConnectionState::AwaitingOpen);
        cc.on_open(v0.clone(), v0).unwrap();
        assert_eq!(cc.state(), ConnectionState::Connected);
        assert_eq!(cc.connection().0.len(), 1);
    }

    #[test]
    fn test_one_delta_in_flight() {
        let (mut cc, v0) = connected();
        cc.on_client_operations(vec![insert("alice", 1, LEN, 2, "X")]).unwrap();
        cc.on_client_operations(vec![insert("alice", 2, LEN + 1, 3, "Y")]).unwrap();
        cc.on_client_operations(vec![insert("alice", 3, LEN + 2, 4, "Z")]).unwrap();
        assert_eq!(cc.connection().0.len(), 1);
        assert_eq!(cc.connection().0[0].target_version(), &v0);

        let first = commit_as(&v0, "alice", cc.connection().0[0].ops().to_vec());
        cc.on_success(1, first.resulting_version().clone()).unwrap();

        // The two queued ops go out merged, based on the acked version.
        let sent = &cc.connection().0;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].len(), 1);
        assert_eq!(sent[1].target_version(), first.resulting_version());

        let update = cc.receive().unwrap();
        assert!(update.is_version_update());
        assert_eq!(update.hashed_version(), Some(first.resulting_version()));
        assert!(cc.receive().is_none());
    }

    #[test]
    fn test_server_delta_transformed_past_in_flight() {
        let (mut cc, v0) = connected();
        cc.on_client_operations(vec![insert("alice", 1, LEN, 2, "X")]).unwrap();

        let foreign = commit_as(&v0, "bob", vec![insert("bob", 1, LEN, 3, "Y")]);
        cc.on_server_deltas(vec![foreign.clone()]).unwrap();

        let op = cc.receive().unwrap();
        assert_eq!(op.kind, insert("bob", 1, LEN + 1, 4, "Y").kind);
        assert_eq!(cc.reconnection_versions(), vec![foreign.resulting_version().clone()]);
        assert_eq!(cc.unsaved_data().in_flight_size, 1);

        // The ack now lands one version later.
        let acked = HashedVersion::new(2, vec![1]);
        cc.on_success(1, acked.clone()).unwrap();
        assert_eq!(cc.unsaved_data().last_ack_version, 2);
    }

    #[test]
    fn test_local_ops_transformed_past_pending_server_ops() {
        let (mut cc, v0) = connected();
        let foreign = commit_as(&v0, "bob", vec![insert("bob", 1, LEN, 2, "Y")]);
        cc.on_server_deltas(vec![foreign.clone()]).unwrap();
        assert!(cc.peek().is_some());

        // Authored against the doc without bob's insert.
        cc.on_client_operations(vec![insert("alice", 2, LEN, 4, "X")]).unwrap();
        let sent = &cc.connection().0[0];
        assert_eq!(sent.target_version(), foreign.resulting_version());
        assert_eq!(sent.ops()[0].kind, insert("alice", 2, LEN + 1, 5, "X").kind);

        let pending = cc.receive().unwrap();
        assert_eq!(pending.kind, insert("bob", 1, LEN + 1, 2, "Y").kind);
    }

    #[test]
    fn test_bad_acks_are_rejected() {
        let (mut cc, _) = connected();
        assert!(matches!(
            cc.on_success(1, HashedVersion::new(1, vec![])),
            Err(CcError::Channel(ChannelError::UnexpectedAck))
        ));

        cc.on_client_operations(vec![insert("alice", 1, LEN, 2, "X")]).unwrap();
        assert!(matches!(
            cc.on_success(2, HashedVersion::new(1, vec![])),
            Err(CcError::Channel(ChannelError::AckMismatch { .. }))
        ));
        assert!(matches!(
            cc.on_success(1, HashedVersion::new(4, vec![])),
            Err(CcError::Channel(ChannelError::AckMismatch { .. }))
        ));
    }

    #[test]
    fn test_stale_server_delta_rejected() {
        let (mut cc, v0) = connected();
        let d1 = commit_as(&v0, "bob", vec![insert("bob", 1, LEN, 2, "Y")]);
        cc.on_server_deltas(vec![d1.clone()]).unwrap();
        assert!(matches!(
            cc.on_server_deltas(vec![d1]),
            Err(CcError::Channel(ChannelError::StaleServerDelta { applied_at: 0, latest: 1 }))
        ));
    }

    #[test]
    fn test_invalid_open() {
        let v0 = factory().version_zero();
        let mut cc = ConcurrencyControl::new(v0.clone(), Sent::default());
        let v3 = HashedVersion::new(3, vec![3]);
        assert!(matches!(
            cc.on_open(v3, v0.clone()),
            Err(CcError::Channel(ChannelError::InvalidOpen { .. }))
        ));
        let foreign = HashedVersionFactory::new("other").version_zero();
        assert!(matches!(
            cc.on_open(foreign.clone(), foreign),
            Err(CcError::Channel(ChannelError::NoMatchingSignature(_)))
        ));
    }

    #[test]
    fn test_commit_trims_inferred_path() {
        let (mut cc, v0) = connected();
        cc.on_client_operations(vec![insert("alice", 1, LEN, 2, "X")]).unwrap();
        let d1 = commit_as(&v0, "alice", cc.connection().0[0].ops().to_vec());
        cc.on_success(1, d1.resulting_version().clone()).unwrap();

        assert_eq!(cc.reconnection_versions().len(), 2);
        let info = cc.unsaved_data();
        assert_eq!(info.estimated_uncommitted, 1);
        assert!(!info.is_saved());

        cc.on_commit(1);
        assert_eq!(cc.reconnection_versions(), vec![d1.resulting_version().clone()]);
        let info = cc.unsaved_data();
        assert!(info.is_saved());
        assert_eq!(info.last_commit_version, 1);
        assert!(cc.close());
    }

    #[test]
    fn test_reconnect_resends_unacked_delta() {
        let (mut cc, v0) = connected();
        cc.on_client_operations(vec![insert("alice", 1, LEN, 2, "X")]).unwrap();
        cc.on_disconnect();

        // Server never saw it.
        assert_eq!(cc.begin_reconnect(), vec![v0.clone()]);
        cc.on_open(v0.clone(), v0.clone()).unwrap();

        let sent = &cc.connection().0;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
    }

    #[test]
    fn test_reconnect_recognises_echo() {
        let (mut cc, v0) = connected();
        cc.on_client_operations(vec![insert("alice", 1, LEN, 2, "X")]).unwrap();
        let echoed = commit_as(&v0, "alice", cc.connection().0[0].ops().to_vec());
        cc.on_disconnect();

        // Server applied it before the connection dropped.
        cc.begin_reconnect();
        cc.on_open(v0.clone(), echoed.resulting_version().clone()).unwrap();
        cc.on_server_deltas(vec![echoed.clone()]).unwrap();

        assert_eq!(cc.connection().0.len(), 1);
        assert_eq!(cc.unsaved_data().in_flight_size, 0);
        assert!(cc.receive().unwrap().is_version_update());
        assert_eq!(
            cc.reconnection_versions(),
            vec![v0, echoed.resulting_version().clone()]
        );
    }

    #[test]
    fn test_on_message_dispatch() {
        let v0 = factory().version_zero();
        let mut cc = ConcurrencyControl::new(v0.clone(), Sent::default());
        cc.connect();
        cc.on_message(ServerMessage::Open {
            connect_version: v0.clone(),
            current_version: v0.clone(),
        })
        .unwrap();
        cc.on_client_operations(vec![insert("alice", 1, LEN, 2, "X")]).unwrap();
        let d1 = commit_as(&v0, "alice", cc.connection().0[0].ops().to_vec());
        cc.on_message(ServerMessage::Ack {
            ops_applied: 1,
            version: d1.resulting_version().clone(),
        })
        .unwrap();
        cc.on_message(ServerMessage::Commit { version: 1 }).unwrap();
        assert!(cc.unsaved_data().is_saved());
    }
}
