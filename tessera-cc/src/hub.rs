//! Per-document hub actor and the registry of hubs.
//!
//! Architecture:
//! ```text
//! Session A ──┐                ┌───────────────────────────┐
//!             ├── mpsc ──────► │ hub task (one per doc)    │
//! Session B ──┘   commands     │  ConcurrencyControlCore   │
//!                              │  └── DeltaHistory         │
//!                              └─────────────┬─────────────┘
//!                                            │ HubEvent
//!                                            ▼
//!                                      BroadcastGroup
//!                               ┌────────────┼────────────┐
//!                               ▼            ▼            ▼
//!                           Session A    Session B    Session C
//! ```
//!
//! The hub task is the only writer of its document's history, so commits
//! are totally ordered without locks. Opens subscribe to the fan-out inside
//! the task, so a session sees every event after its open exactly once.
//! Different documents run on different tasks, fully in parallel.
//!
//! Reference: Kleppmann, Designing Data-Intensive Applications, Chapter 9

use std::collections::HashMap;
use std::sync::Arc;
use tessera_model::{
    HashedVersion, HashedVersionFactory, ParticipantId, TransformedWaveletDelta, WaveletDelta,
};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::broadcast::{BroadcastGroup, BroadcastStats};
use crate::error::CcError;
use crate::history::DeltaHistory;
use crate::protocol::{ChannelError, ServerMessage};
use crate::server::{ConcurrencyControlCore, CoreStats, Reconnection, SubmitOutcome};
use crate::storage::DeltaStats;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Fan-out events buffered per session
    pub broadcast_capacity: usize,
    /// Commands buffered per document
    pub command_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
            command_capacity: 64,
        }
    }
}

impl HubConfig {
    /// Small buffers for tests.
    pub fn for_testing() -> Self {
        Self {
            broadcast_capacity: 16,
            command_capacity: 8,
        }
    }
}

/// What the hub tells its sessions after each submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    Committed {
        origin: Option<Uuid>,
        delta: TransformedWaveletDelta,
    },
    /// A submission was already in history and was not appended
    Duplicate {
        origin: Option<Uuid>,
        version: HashedVersion,
    },
}

impl HubEvent {
    /// The channel messages this event means for `session`.
    pub fn messages_for(&self, session: Uuid) -> Vec<ServerMessage> {
        match self {
            HubEvent::Committed { origin, delta } => {
                let version = delta.resulting_version().clone();
                let commit = ServerMessage::Commit {
                    version: version.version(),
                };
                if *origin == Some(session) {
                    vec![
                        ServerMessage::Ack {
                            ops_applied: delta.len(),
                            version,
                        },
                        commit,
                    ]
                } else {
                    vec![ServerMessage::Deltas(vec![delta.clone()]), commit]
                }
            }
            HubEvent::Duplicate { origin, version } if *origin == Some(session) => {
                vec![ServerMessage::Ack {
                    ops_applied: 0,
                    version: version.clone(),
                }]
            }
            HubEvent::Duplicate { .. } => Vec::new(),
        }
    }
}

/// Snapshot of a hub.
#[derive(Debug, Clone)]
pub struct HubStats {
    pub current_version: HashedVersion,
    pub core: CoreStats,
    pub history: DeltaStats,
    pub broadcast: BroadcastStats,
}

/// A session's view of the document at open time plus its event stream.
pub struct Subscription {
    pub reconnection: Reconnection,
    pub events: broadcast::Receiver<Arc<HubEvent>>,
}

type Reply<T> = oneshot::Sender<Result<T, CcError>>;

enum Command {
    Submit {
        origin: Option<Uuid>,
        delta: WaveletDelta,
        reply: Reply<SubmitOutcome>,
    },
    Open {
        session: Uuid,
        participant: ParticipantId,
        /// None opens from version zero
        candidates: Option<Vec<HashedVersion>>,
        reply: Reply<Subscription>,
    },
    Leave {
        session: Uuid,
    },
    Truncate {
        version: u64,
        reply: Reply<usize>,
    },
    Stats {
        reply: oneshot::Sender<(HashedVersion, CoreStats, DeltaStats)>,
    },
}

/// Handle to one document's hub task.
pub struct DocumentHub {
    id: Uuid,
    commands: mpsc::Sender<Command>,
    group: Arc<BroadcastGroup>,
}

impl DocumentHub {
    /// Spawn the hub task for `history`. Must be called inside a tokio
    /// runtime. The task ends when every handle is dropped.
    pub fn spawn(id: Uuid, history: DeltaHistory, config: &HubConfig) -> Self {
        Self::spawn_core(id, ConcurrencyControlCore::new(history), config)
    }

    pub fn spawn_core(id: Uuid, core: ConcurrencyControlCore, config: &HubConfig) -> Self {
        let (commands, rx) = mpsc::channel(config.command_capacity);
        let group = Arc::new(BroadcastGroup::new(config.broadcast_capacity));
        log::info!(
            "Document hub {id} started at {}",
            core.history().current_signature()
        );
        tokio::spawn(run_hub(id, core, rx, group.clone()));
        Self {
            id,
            commands,
            group,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn group(&self) -> &Arc<BroadcastGroup> {
        &self.group
    }

    /// Submit a delta. `origin` is the submitting session, if any; the
    /// outcome is also broadcast so the origin sees its ack in order.
    pub async fn submit(
        &self,
        origin: Option<Uuid>,
        delta: WaveletDelta,
    ) -> Result<SubmitOutcome, CcError> {
        self.request(|reply| Command::Submit {
            origin,
            delta,
            reply,
        })
        .await?
    }

    /// Open a new session from version zero.
    pub async fn open(
        &self,
        session: Uuid,
        participant: ParticipantId,
    ) -> Result<Subscription, CcError> {
        self.request(|reply| Command::Open {
            session,
            participant,
            candidates: None,
            reply,
        })
        .await?
    }

    /// Reopen a session at the best of `candidates`.
    pub async fn reconnect(
        &self,
        session: Uuid,
        participant: ParticipantId,
        candidates: Vec<HashedVersion>,
    ) -> Result<Subscription, CcError> {
        self.request(|reply| Command::Open {
            session,
            participant,
            candidates: Some(candidates),
            reply,
        })
        .await?
    }

    pub async fn leave(&self, session: Uuid) -> Result<(), CcError> {
        self.commands
            .send(Command::Leave { session })
            .await
            .map_err(|_| CcError::from(ChannelError::Closed))
    }

    /// Roll history back to `version`.
    pub async fn truncate(&self, version: u64) -> Result<usize, CcError> {
        self.request(|reply| Command::Truncate { version, reply })
            .await?
    }

    pub async fn stats(&self) -> Result<HubStats, CcError> {
        let (current_version, core, history) =
            self.request(|reply| Command::Stats { reply }).await?;
        Ok(HubStats {
            current_version,
            core,
            history,
            broadcast: self.group.stats().await,
        })
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CcError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ChannelError::Closed)?;
        Ok(rx.await.map_err(|_| ChannelError::Closed)?)
    }
}

async fn run_hub(
    id: Uuid,
    mut core: ConcurrencyControlCore,
    mut commands: mpsc::Receiver<Command>,
    group: Arc<BroadcastGroup>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Submit {
                origin,
                delta,
                reply,
            } => {
                let result = core.submit(delta);
                if let Ok(outcome) = &result {
                    let event = match outcome {
                        SubmitOutcome::Committed(delta) => HubEvent::Committed {
                            origin,
                            delta: delta.clone(),
                        },
                        SubmitOutcome::Duplicate { version, .. } => HubEvent::Duplicate {
                            origin,
                            version: version.clone(),
                        },
                    };
                    group.broadcast(Arc::new(event));
                }
                let _ = reply.send(result);
            }
            Command::Open {
                session,
                participant,
                candidates,
                reply,
            } => {
                let result = match &candidates {
                    Some(candidates) => core.reconnect(candidates),
                    None => core.open(),
                };
                let result = match result {
                    Ok(reconnection) => {
                        log::debug!(
                            "Session {session} ({participant}) opened at {}",
                            reconnection.connect_version
                        );
                        let events = group.add_session(session, participant).await;
                        Ok(Subscription {
                            reconnection,
                            events,
                        })
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Leave { session } => {
                if group.remove_session(&session).await.is_some() {
                    log::debug!("Session {session} left document {id}");
                }
            }
            Command::Truncate { version, reply } => {
                let result = core.history_mut().truncate(version).map_err(CcError::from);
                let _ = reply.send(result);
            }
            Command::Stats { reply } => {
                let _ = reply.send((
                    core.history().current_signature().clone(),
                    core.stats().clone(),
                    core.history().stats(),
                ));
            }
        }
    }
    log::info!(
        "Document hub {id} stopped at {}",
        core.history().current_signature()
    );
}

/// Maps document ids to running hubs.
pub struct HubRegistry {
    hubs: RwLock<HashMap<Uuid, Arc<DocumentHub>>>,
    config: HubConfig,
    factory: HashedVersionFactory,
}

impl HubRegistry {
    pub fn new(config: HubConfig, factory: HashedVersionFactory) -> Self {
        Self {
            hubs: RwLock::new(HashMap::new()),
            config,
            factory,
        }
    }

    /// Get the hub for `doc_id`, spawning one over an empty in-memory
    /// history if there is none.
    pub async fn get_or_create(&self, doc_id: Uuid) -> Arc<DocumentHub> {
        // Fast path: read lock
        {
            let hubs = self.hubs.read().await;
            if let Some(hub) = hubs.get(&doc_id) {
                return hub.clone();
            }
        }

        let mut hubs = self.hubs.write().await;
        // Double-check after acquiring write lock
        if let Some(hub) = hubs.get(&doc_id) {
            return hub.clone();
        }

        let history = DeltaHistory::in_memory(self.factory.clone());
        let hub = Arc::new(DocumentHub::spawn(doc_id, history, &self.config));
        hubs.insert(doc_id, hub.clone());
        hub
    }

    pub async fn get(&self, doc_id: &Uuid) -> Option<Arc<DocumentHub>> {
        self.hubs.read().await.get(doc_id).cloned()
    }

    /// Forget a hub. Its task stops once the last handle is dropped.
    pub async fn remove(&self, doc_id: &Uuid) -> Option<Arc<DocumentHub>> {
        self.hubs.write().await.remove(doc_id)
    }

    pub async fn document_count(&self) -> usize {
        self.hubs.read().await.len()
    }

    pub async fn active_documents(&self) -> Vec<Uuid> {
        self.hubs.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_model::{DocOp, WaveletOperation};

    fn hub() -> DocumentHub {
        let history = DeltaHistory::in_memory(HashedVersionFactory::new("doc"));
        DocumentHub::spawn(Uuid::new_v4(), history, &HubConfig::for_testing())
    }

    fn delta(who: &str, target: HashedVersion, at: usize) -> WaveletDelta {
        let op = WaveletOperation::blip(who.into(), 1, "b+1", DocOp::insert_text(7, at, "X"));
        WaveletDelta::new(who.into(), target, vec![op]).unwrap()
    }

    #[test]
    fn test_messages_for_origin_and_others() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let committed = TransformedWaveletDelta::new(
            "alice".into(),
            HashedVersion::new(1, vec![1]),
            0,
            vec![WaveletOperation::no_op("alice".into(), 0)],
        )
        .unwrap();
        let event = HubEvent::Committed {
            origin: Some(me),
            delta: committed.clone(),
        };

        assert_eq!(
            event.messages_for(me),
            vec![
                ServerMessage::Ack {
                    ops_applied: 1,
                    version: committed.resulting_version().clone()
                },
                ServerMessage::Commit { version: 1 },
            ]
        );
        assert_eq!(
            event.messages_for(other),
            vec![
                ServerMessage::Deltas(vec![committed]),
                ServerMessage::Commit { version: 1 },
            ]
        );

        let dup = HubEvent::Duplicate {
            origin: Some(me),
            version: HashedVersion::new(1, vec![1]),
        };
        assert_eq!(dup.messages_for(me).len(), 1);
        assert!(dup.messages_for(other).is_empty());
    }

    #[tokio::test]
    async fn test_submit_broadcasts_outcome() {
        let hub = hub();
        let session = Uuid::new_v4();
        let mut sub = hub.open(session, "alice".into()).await.unwrap();
        let v0 = sub.reconnection.connect_version.clone();
        assert_eq!(sub.reconnection.current_version, v0);

        let outcome = hub.submit(Some(session), delta("alice", v0, 2)).await.unwrap();
        let event = sub.events.recv().await.unwrap();
        assert_eq!(
            *event,
            HubEvent::Committed {
                origin: Some(session),
                delta: outcome.committed().unwrap().clone()
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_submission_not_broadcast() {
        let hub = hub();
        let mut sub = hub.open(Uuid::new_v4(), "alice".into()).await.unwrap();
        let bogus = HashedVersion::new(4, vec![]);
        assert!(hub.submit(None, delta("alice", bogus, 2)).await.is_err());
        assert!(matches!(
            sub.events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(hub.stats().await.unwrap().core.rejected, 1);
    }

    #[tokio::test]
    async fn test_reconnect_and_truncate() {
        let hub = hub();
        let sub = hub.open(Uuid::new_v4(), "alice".into()).await.unwrap();
        let v0 = sub.reconnection.connect_version;
        let d1 = hub.submit(None, delta("alice", v0.clone(), 2)).await.unwrap();
        let v1 = d1.ack().1;

        let again = hub
            .reconnect(Uuid::new_v4(), "alice".into(), vec![v0.clone(), v1.clone()])
            .await
            .unwrap();
        assert_eq!(again.reconnection.connect_version, v1);
        assert!(again.reconnection.deltas.is_empty());

        assert_eq!(hub.truncate(0).await.unwrap(), 1);
        let refused = hub.reconnect(Uuid::new_v4(), "alice".into(), vec![v1]).await;
        assert!(matches!(
            refused,
            Err(CcError::Channel(ChannelError::NoMatchingSignature(_)))
        ));

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.current_version, v0);
        assert_eq!(stats.broadcast.active_sessions, 2);
    }

    #[tokio::test]
    async fn test_leave_removes_session() {
        let hub = hub();
        let session = Uuid::new_v4();
        let _sub = hub.open(session, "alice".into()).await.unwrap();
        assert!(hub.group().has_session(&session).await);
        hub.leave(session).await.unwrap();
        // Leave is fire-and-forget; a round trip orders it.
        hub.stats().await.unwrap();
        assert!(!hub.group().has_session(&session).await);
    }

    #[tokio::test]
    async fn test_registry_get_or_create() {
        let registry = HubRegistry::new(HubConfig::for_testing(), HashedVersionFactory::default());
        let doc = Uuid::new_v4();

        let a = registry.get_or_create(doc).await;
        let b = registry.get_or_create(doc).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.document_count().await, 1);
        assert!(registry.get(&doc).await.is_some());

        let other = Uuid::new_v4();
        registry.get_or_create(other).await;
        let docs = registry.active_documents().await;
        assert!(docs.contains(&doc) && docs.contains(&other));

        assert!(registry.remove(&doc).await.is_some());
        assert!(registry.get(&doc).await.is_none());
        assert_eq!(registry.document_count().await, 1);
    }
}
