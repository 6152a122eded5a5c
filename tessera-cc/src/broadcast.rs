//! Fan-out of hub events to every session of a document.
//!
//! Uses a tokio broadcast channel: one send reaches all subscribers, each
//! of which buffers up to `capacity` events. A session that falls further
//! behind than that lags and has to reconnect.
//!
//! Filtering (acks to the origin, deltas to everyone else) is the
//! receiver's job, see [`HubEvent::messages_for`].
//!
//! Reference: Patterson & Hennessy, Section 6.4 (Interconnection Networks)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_model::ParticipantId;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::hub::HubEvent;

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub events_sent: u64,
    /// Events lost by lagging receivers
    pub events_dropped: u64,
    pub active_sessions: usize,
}

/// Counters updated without taking the session lock.
#[derive(Default)]
struct AtomicBroadcastStats {
    events_sent: AtomicU64,
    events_dropped: AtomicU64,
}

/// The fan-out channel and session roster of one document.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<HubEvent>>,
    sessions: RwLock<HashMap<Uuid, ParticipantId>>,
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sessions: RwLock::new(HashMap::new()),
            capacity,
            atomic_stats: AtomicBroadcastStats::default(),
        }
    }

    /// Register a session and return its receiver. A session that joins
    /// again replaces its old entry.
    pub async fn add_session(
        &self,
        session: Uuid,
        participant: ParticipantId,
    ) -> broadcast::Receiver<Arc<HubEvent>> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session, participant);
        self.sender.subscribe()
    }

    pub async fn remove_session(&self, session: &Uuid) -> Option<ParticipantId> {
        self.sessions.write().await.remove(session)
    }

    /// Send `event` to every subscriber. Returns how many receivers got it.
    pub fn broadcast(&self, event: Arc<HubEvent>) -> usize {
        let count = self.sender.send(event).unwrap_or(0);
        self.atomic_stats.events_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Record events a lagging receiver skipped.
    pub fn record_lag(&self, skipped: u64) {
        self.atomic_stats
            .events_dropped
            .fetch_add(skipped, Ordering::Relaxed);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn has_session(&self, session: &Uuid) -> bool {
        self.sessions.read().await.contains_key(session)
    }

    /// Distinct participants with at least one session.
    pub async fn participants(&self) -> Vec<ParticipantId> {
        let mut participants: Vec<ParticipantId> =
            self.sessions.read().await.values().cloned().collect();
        participants.sort();
        participants.dedup();
        participants
    }

    pub async fn stats(&self) -> BroadcastStats {
        let sessions = self.sessions.read().await;
        BroadcastStats {
            events_sent: self.atomic_stats.events_sent.load(Ordering::Relaxed),
            events_dropped: self.atomic_stats.events_dropped.load(Ordering::Relaxed),
            active_sessions: sessions.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
