//! Hashed versions: tamper-evident position markers in a document history.
//!
//! ```text
//!  v0            v3                 v4
//!  ┌────────┐    ┌──────────────┐    ┌──────────────┐
//!  │ H(seed)│──► │ H(h0 ‖ d1..3)│──► │ H(h3 ‖ d4)   │
//!  └────────┘    └──────────────┘    └──────────────┘
//! ```
//!
//! The hash at a resulting version is a function of the previous hash and
//! the canonical content bytes of the delta that produced it, so two
//! histories that agree on a `HashedVersion` agree on every delta before it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Seed used by [`HashedVersionFactory::default`].
const DEFAULT_SEED: &[u8] = b"tessera:version-zero";

/// A version number paired with the history hash at that version.
///
/// Equality compares both fields: equal versions with different hashes
/// belong to divergent histories.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashedVersion {
    version: u64,
    history_hash: Vec<u8>,
}

impl HashedVersion {
    /// Pair a version number with its history hash.
    pub fn new(version: u64, history_hash: Vec<u8>) -> Self {
        Self {
            version,
            history_hash,
        }
    }

    /// Number of operations applied before this point.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Hash of the chain up to this version.
    pub fn history_hash(&self) -> &[u8] {
        &self.history_hash
    }

    /// Short hex prefix of the hash, for logs.
    pub fn short_hash(&self) -> String {
        self.history_hash
            .iter()
            .take(4)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl fmt::Debug for HashedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}:{}", self.version, self.short_hash())
    }
}

impl fmt::Display for HashedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Produces the version-zero signature and extends the hash chain.
///
/// One factory is shared by a server history and every client of that
/// history; it is passed explicitly to whoever needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedVersionFactory {
    version_zero_hash: Vec<u8>,
}

impl HashedVersionFactory {
    /// Create a factory whose version-zero hash is derived from `seed`
    /// (typically the document identity).
    pub fn new(seed: impl AsRef<[u8]>) -> Self {
        Self {
            version_zero_hash: blake3::hash(seed.as_ref()).as_bytes().to_vec(),
        }
    }

    /// The signature every history starts at.
    pub fn version_zero(&self) -> HashedVersion {
        HashedVersion::new(0, self.version_zero_hash.clone())
    }

    /// Extend the chain from `applied_at` by a delta spanning `span`
    /// versions whose canonical content encodes to `delta_bytes`.
    pub fn create(&self, applied_at: &HashedVersion, delta_bytes: &[u8], span: u64) -> HashedVersion {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&applied_at.history_hash);
        hasher.update(delta_bytes);
        HashedVersion::new(
            applied_at.version + span,
            hasher.finalize().as_bytes().to_vec(),
        )
    }
}

impl Default for HashedVersionFactory {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}
