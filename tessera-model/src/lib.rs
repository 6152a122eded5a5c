//! # tessera-model - Operation and history model for Tessera
//!
//! Value types shared by the concurrency-control core and its clients.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ DeltaSequence    contiguous committed run    │
//! ├──────────────────────────────────────────────┤
//! │ WaveletDelta / TransformedWaveletDelta       │
//! ├──────────────────────────────────────────────┤
//! │ WaveletOperation  (transform / compose)      │
//! ├──────────────────────────────────────────────┤
//! │ DocOp             (apply / transform /       │
//! │                    compose on a Document)    │
//! └──────────────────────────────────────────────┘
//!          HashedVersion chain anchors every level
//! ```
//!
//! ## Modules
//!
//! - [`version`]: HashedVersion and the blake3 hash chain
//! - [`document`]: Linear document and its op algebra
//! - [`operation`]: Wavelet operations
//! - [`transform`]: Operation-level transform and compose
//! - [`delta`]: Deltas and delta sequences
//! - [`wavelet`]: Materialized wavelet state

pub mod version;
pub mod document;
pub mod operation;
pub mod transform;
pub mod delta;
pub mod wavelet;

pub use version::{HashedVersion, HashedVersionFactory};
pub use document::{DocItem, DocOp, DocOpBuilder, DocOpComponent, DocOpError, Document};
pub use operation::{
    version_span, OperationContext, OperationKind, ParticipantId, WaveletOperation,
};
pub use transform::{can_compose, compose, transform, TransformError};
pub use delta::{
    content_bytes, DeltaError, DeltaSequence, DeltaSequenceError, TransformedWaveletDelta,
    WaveletDelta,
};
pub use wavelet::{OperationError, WaveletState};
