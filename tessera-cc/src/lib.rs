//! # tessera-cc - Concurrency control for Tessera documents
//!
//! Reconciles concurrent edits from many editors into one totally ordered,
//! hash-chained history per document, and keeps each editor's local view
//! responsive through disconnects and reconnects.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   WaveletDelta    ┌────────────────────────┐
//! │ ConcurrencyControl   │ ────────────────► │ DocumentHub (task)     │
//! │ (per session)        │                   │  ConcurrencyControlCore│
//! │  OperationQueue      │ ◄──────────────── │  DeltaHistory          │
//! │  in-flight delta     │ Ack / Deltas /    └───────────┬────────────┘
//! └──────────┬───────────┘ Commit                        │
//!            │                                   ┌───────┴────────┐
//!            ▼                                   │ BroadcastGroup │
//!     local model ops                            │ (fan-out)      │
//!                                                └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`merging`]: Coalesces adjacent composable operations
//! - [`delta_pair`]: Cross-transform of a client and a server delta
//! - [`queue`]: Client outgoing operation queue
//! - [`storage`]: Compressed delta store
//! - [`history`]: Authoritative per-document history
//! - [`server`]: Server-side submission and reconnection
//! - [`client`]: Client-side state machine
//! - [`protocol`]: Server messages and channel errors
//! - [`broadcast`]: Per-document fan-out
//! - [`hub`]: Per-document actor and hub registry
//! - [`session`]: Drives a client against a hub

pub mod merging;
pub mod delta_pair;
pub mod queue;
pub mod storage;
pub mod history;
pub mod server;
pub mod client;
pub mod protocol;
pub mod broadcast;
pub mod hub;
pub mod session;
pub mod error;

// Re-exports for convenience
pub use merging::MergingSequence;
pub use delta_pair::{DeltaPair, DeltaTransformer, OtTransformer};
pub use queue::OperationQueue;
pub use storage::{CompressedDelta, DeltaStats, DeltaStore, MemoryDeltaStore, StoreError};
pub use history::{DeltaHistory, HistoryError};
pub use server::{ConcurrencyControlCore, CoreStats, Reconnection, SubmitOutcome};
pub use client::{ConcurrencyControl, ConnectionState, ServerConnection, UnsavedDataInfo};
pub use protocol::{ChannelError, ServerMessage};
pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use hub::{DocumentHub, HubConfig, HubEvent, HubRegistry, HubStats, Subscription};
pub use session::{HubSession, Outbox};
pub use error::CcError;
