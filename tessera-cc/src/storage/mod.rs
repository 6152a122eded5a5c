//! Delta storage for document histories.
//!
//! ```text
//! ┌──────────────┐   append / read   ┌──────────────────┐
//! │ DeltaHistory │ ────────────────► │ dyn DeltaStore   │
//! │ (signatures) │                   │ MemoryDeltaStore │
//! └──────────────┘                   │ (LZ4 + bincode)  │
//!                                    └──────────────────┘
//! ```
//!
//! The history keeps the version → signature index; a store only keeps
//! the deltas, so any append-only backend can sit behind the trait.

pub mod delta;

pub use delta::{CompressedDelta, DeltaStats, DeltaStore, MemoryDeltaStore, StoreError};
