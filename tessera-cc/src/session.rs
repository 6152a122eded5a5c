//! Drives a client [`ConcurrencyControl`] against a [`DocumentHub`].
//!
//! ```text
//!  submit_local(ops) ──► ConcurrencyControl ──► Outbox ──flush──► hub.submit
//!                              ▲
//!  pump() ◄── HubEvent stream ─┘  (acks, foreign deltas, commits)
//!                              │
//!  receive() ◄─────────────────┘  transformed server ops
//! ```
//!
//! The session never applies acks from submit replies; they arrive on the
//! event stream, in order with everybody else's commits.
//!
//! A transform or channel failure detaches the session from the hub. The
//! client keeps its unacknowledged work and [`HubSession::reconnect`]
//! resumes from the best version the hub still has.

use std::collections::VecDeque;
use std::sync::Arc;
use tessera_model::{ParticipantId, WaveletDelta, WaveletOperation};
use tokio::sync::broadcast::{self, error::TryRecvError};
use uuid::Uuid;

use crate::client::{ConcurrencyControl, ServerConnection, UnsavedDataInfo};
use crate::error::CcError;
use crate::hub::{DocumentHub, HubEvent, Subscription};
use crate::protocol::ChannelError;

/// Deltas the client has sent but the session has not yet submitted.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: VecDeque<WaveletDelta>,
}

impl Outbox {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn pop(&mut self) -> Option<WaveletDelta> {
        self.pending.pop_front()
    }

    fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

impl ServerConnection for Outbox {
    fn send(&mut self, delta: WaveletDelta) {
        self.pending.push_back(delta);
    }
}

pub struct HubSession {
    id: Uuid,
    participant: ParticipantId,
    hub: Arc<DocumentHub>,
    control: ConcurrencyControl<Outbox>,
    events: Option<broadcast::Receiver<Arc<HubEvent>>>,
}

impl HubSession {
    /// Open a session, replaying the document from version zero.
    pub async fn open(hub: Arc<DocumentHub>, participant: ParticipantId) -> Result<Self, CcError> {
        let id = Uuid::new_v4();
        let subscription = hub.open(id, participant.clone()).await?;
        let start = subscription.reconnection.connect_version.clone();
        let mut session = Self {
            id,
            participant,
            hub,
            control: ConcurrencyControl::new(start, Outbox::default()),
            events: None,
        };
        session.control.connect();
        session.attach(subscription).await?;
        log::debug!("Session {id} for {} open", session.participant);
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn control(&self) -> &ConcurrencyControl<Outbox> {
        &self.control
    }

    pub fn is_attached(&self) -> bool {
        self.events.is_some()
    }

    /// Hand locally authored operations to the client and submit whatever
    /// it sends.
    pub async fn submit_local(&mut self, ops: Vec<WaveletOperation>) -> Result<(), CcError> {
        let result = self.control.on_client_operations(ops);
        self.guard(result).await?;
        self.flush().await
    }

    /// Submit deltas the client has sent. A no-op while detached.
    pub async fn flush(&mut self) -> Result<(), CcError> {
        let result = self.submit_pending().await;
        self.guard(result).await
    }

    /// Feed every event already delivered to this session into the client,
    /// then submit anything that unblocked. Returns the number of events.
    pub async fn pump(&mut self) -> Result<usize, CcError> {
        let result = self.drain_events().await;
        self.guard(result).await
    }

    async fn submit_pending(&mut self) -> Result<(), CcError> {
        if self.events.is_none() {
            return Ok(());
        }
        while let Some(delta) = self.control.connection_mut().pop() {
            self.hub.submit(Some(self.id), delta).await?;
        }
        Ok(())
    }

    async fn drain_events(&mut self) -> Result<usize, CcError> {
        let mut handled = 0;
        loop {
            let Some(events) = self.events.as_mut() else {
                return Err(ChannelError::NotConnected.into());
            };
            let event = match events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(skipped)) => {
                    self.hub.group().record_lag(skipped);
                    log::warn!("Session {} lagged by {skipped} events", self.id);
                    return Err(ChannelError::Lagged(skipped).into());
                }
                Err(TryRecvError::Closed) => return Err(ChannelError::Closed.into()),
            };
            for message in event.messages_for(self.id) {
                self.control.on_message(message)?;
            }
            handled += 1;
        }
        self.submit_pending().await?;
        Ok(handled)
    }

    /// Next server operation for the local model.
    pub fn receive(&mut self) -> Option<WaveletOperation> {
        self.control.receive()
    }

    pub fn unsaved_data(&self) -> UnsavedDataInfo {
        self.control.unsaved_data()
    }

    /// Drop the connection. Deltas sent but not yet submitted are lost
    /// from the wire; the client still holds them for resubmission.
    pub async fn disconnect(&mut self) -> Result<(), CcError> {
        self.drop_connection();
        self.hub.leave(self.id).await
    }

    /// Reattach at the best version the hub still has.
    pub async fn reconnect(&mut self) -> Result<(), CcError> {
        let candidates = self.control.begin_reconnect();
        let subscription = self
            .hub
            .reconnect(self.id, self.participant.clone(), candidates)
            .await?;
        let result = self.attach(subscription).await;
        self.guard(result).await
    }

    /// Close the client. Returns whether everything it sent was committed.
    pub async fn close(mut self) -> Result<bool, CcError> {
        let saved = self.control.close();
        self.events = None;
        self.hub.leave(self.id).await?;
        Ok(saved)
    }

    async fn attach(&mut self, subscription: Subscription) -> Result<(), CcError> {
        let Subscription {
            reconnection,
            events,
        } = subscription;
        self.events = Some(events);
        self.control
            .on_open(reconnection.connect_version, reconnection.current_version)?;
        if !reconnection.deltas.is_empty() {
            self.control.on_server_deltas(reconnection.deltas.into_vec())?;
        }
        self.submit_pending().await
    }

    fn drop_connection(&mut self) {
        self.events = None;
        let dropped = self.control.connection_mut().clear();
        if dropped > 0 {
            log::debug!("Session {} dropped {dropped} unsubmitted deltas", self.id);
        }
        self.control.on_disconnect();
    }

    /// Detach from the hub if `result` is an error the session cannot
    /// continue past.
    async fn guard<T>(&mut self, result: Result<T, CcError>) -> Result<T, CcError> {
        if let Err(e) = &result {
            if e.is_fatal_to_session() && self.events.is_some() {
                log::warn!("Session {} detached: {e}", self.id);
                self.drop_connection();
                if let Err(leave) = self.hub.leave(self.id).await {
                    log::debug!("Session {} could not leave hub: {leave}", self.id);
                }
            }
        }
        result
    }
}
