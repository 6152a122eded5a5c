//! Outgoing operation coalescing.
//!
//! ```text
//!  [A@1 A@2 B@3]          →  [A(1∘2)@2  B@3]
//!  [A@1 A@2 +P@3 A@4 A@5] →  [A(1∘2)@2  +P@3  A(4∘5)@5]
//! ```
//!
//! Consecutive blip operations on the same blip by the same creator are
//! composed. Anything else is a barrier that starts a new group. Order is
//! never changed.

use std::ops::Deref;
use tessera_model::{can_compose, compose, WaveletOperation};

/// An ordered, mutable run of operations that can be optimised in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergingSequence {
    ops: Vec<WaveletOperation>,
}

impl MergingSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WaveletOperation) {
        self.ops.push(op);
    }

    pub fn append(&mut self, other: MergingSequence) {
        self.ops.extend(other.ops);
    }

    /// Compose adjacent compatible operations.
    pub fn optimise(&mut self) {
        let before = self.ops.len();
        let mut merged: Vec<WaveletOperation> = Vec::with_capacity(before);

        for op in self.ops.drain(..) {
            let composed = match merged.last() {
                Some(last) if last.creator() == op.creator() && can_compose(last, &op) => {
                    match compose(last, &op) {
                        Ok(composed) => Some(composed),
                        Err(e) => {
                            log::warn!("Leaving operations unmerged: {e}");
                            None
                        }
                    }
                }
                _ => None,
            };
            match composed {
                Some(composed) => {
                    merged.pop();
                    merged.push(composed);
                }
                None => merged.push(op),
            }
        }

        log::trace!("Optimised {before} operations into {}", merged.len());
        self.ops = merged;
    }

    pub fn into_vec(self) -> Vec<WaveletOperation> {
        self.ops
    }
}

impl Deref for MergingSequence {
    type Target = [WaveletOperation];

    fn deref(&self) -> &Self::Target {
        &self.ops
    }
}

impl From<Vec<WaveletOperation>> for MergingSequence {
    fn from(ops: Vec<WaveletOperation>) -> Self {
        Self { ops }
    }
}
