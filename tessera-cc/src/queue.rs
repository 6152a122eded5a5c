//! Client outgoing operation queue.
//!
//! ```text
//!  head                                         tail
//!  ┌────────────┐ ┌────────────┐ ┌────────────┐
//!  │ Sent       │ │ Optimised  │ │ None       │ ◄── add(op)
//!  │ (resend)   │ │ alice      │ │ alice      │
//!  └────────────┘ └────────────┘ └────────────┘
//!        ▲
//!   insert_head(ops)
//! ```
//!
//! Items hold operations by a single creator. Unsent items by the same
//! creator merge when taken; items re-queued after a reconnection are
//! `Sent` and go out exactly as they were first sent.

use crate::delta_pair::{DeltaTransformer, OtTransformer};
use crate::merging::MergingSequence;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tessera_model::{ParticipantId, TransformError, WaveletOperation};

/// Head items counted exactly by [`OperationQueue::estimate_size`].
const ESTIMATE_ITEMS_TO_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemState {
    None,
    Optimised,
    Sent,
}

#[derive(Debug, Clone)]
struct Item {
    ops: MergingSequence,
    state: ItemState,
}

impl Item {
    fn creator(&self) -> Option<&ParticipantId> {
        self.ops.first().map(WaveletOperation::creator)
    }
}

pub struct OperationQueue {
    queue: VecDeque<Item>,
    tail_creator: Option<ParticipantId>,
    transformer: Arc<dyn DeltaTransformer>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::with_transformer(Arc::new(OtTransformer))
    }

    pub fn with_transformer(transformer: Arc<dyn DeltaTransformer>) -> Self {
        Self {
            queue: VecDeque::new(),
            tail_creator: None,
            transformer,
        }
    }

    /// Append a locally authored operation.
    pub fn add(&mut self, op: WaveletOperation) {
        let creator = op.creator().clone();
        let start_new = match self.queue.back() {
            Some(tail) => {
                tail.state != ItemState::None || self.tail_creator.as_ref() != Some(&creator)
            }
            None => true,
        };
        if start_new {
            self.queue.push_back(Item {
                ops: MergingSequence::new(),
                state: ItemState::None,
            });
            self.tail_creator = Some(creator);
        }
        if let Some(tail) = self.queue.back_mut() {
            tail.ops.push(op);
        }
    }

    /// Re-queue previously sent operations at the head, unchanged.
    pub fn insert_head(&mut self, ops: Vec<WaveletOperation>) {
        let Some(creator) = ops.first().map(|op| op.creator().clone()) else {
            return;
        };
        if self.queue.is_empty() {
            self.tail_creator = Some(creator);
        }
        self.queue.push_front(Item {
            ops: MergingSequence::from(ops),
            state: ItemState::Sent,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take the next delta's worth of operations.
    pub fn take(&mut self) -> Vec<WaveletOperation> {
        let item = Self::take_merged(&mut self.queue);
        if self.queue.is_empty() {
            self.tail_creator = None;
        }
        item.map(|item| item.ops.into_vec()).unwrap_or_default()
    }

    /// Transform every queued item against `server_ops`, returning the
    /// server operations transformed past the whole queue. Items that
    /// transform to nothing are dropped.
    pub fn transform(
        &mut self,
        server_ops: Vec<WaveletOperation>,
    ) -> Result<Vec<WaveletOperation>, TransformError> {
        let mut server_ops = server_ops;
        let mut transformed = VecDeque::with_capacity(self.queue.len());

        while let Some(item) = Self::take_merged(&mut self.queue) {
            let (client, server) = self
                .transformer
                .transform(item.ops.into_vec(), server_ops)?
                .into_parts();
            server_ops = server;
            if !client.is_empty() {
                transformed.push_back(Item {
                    ops: MergingSequence::from(client),
                    state: item.state,
                });
            }
        }

        self.queue = transformed;
        if self.queue.is_empty() {
            self.tail_creator = None;
        }
        Ok(server_ops)
    }

    /// Approximate queued operation count: exact for the first few items
    /// and the tail, one per item in between.
    pub fn estimate_size(&self) -> usize {
        let mut estimate: usize = self
            .queue
            .iter()
            .take(ESTIMATE_ITEMS_TO_COUNT)
            .map(|item| item.ops.len())
            .sum();
        if self.queue.len() > ESTIMATE_ITEMS_TO_COUNT {
            if let Some(tail) = self.queue.back() {
                estimate += tail.ops.len();
            }
            estimate += self.queue.len().saturating_sub(ESTIMATE_ITEMS_TO_COUNT + 1);
        }
        estimate
    }

    /// Pop the head item, merging following unsent items by the same
    /// creator and optimising the result. Sent items come out untouched.
    fn take_merged(queue: &mut VecDeque<Item>) -> Option<Item> {
        let mut item = queue.pop_front()?;
        if item.state == ItemState::Sent {
            return Some(item);
        }

        let mut needs_optimising = item.state != ItemState::Optimised;
        while let Some(next) = queue.front() {
            if next.state == ItemState::Sent || next.creator() != item.creator() {
                break;
            }
            if let Some(next) = queue.pop_front() {
                item.ops.append(next.ops);
                needs_optimising = true;
            }
        }

        if needs_optimising {
            item.ops.optimise();
        }
        item.state = ItemState::Optimised;
        Some(item)
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue")
            .field("items", &self.queue)
            .field("tail_creator", &self.tail_creator)
            .finish()
    }
}
