//! Compressed delta store.
//!
//! Committed deltas are bincode-encoded and LZ4-compressed on append, and
//! decoded on read. The store is an append-only, contiguous log keyed by
//! the version each delta applies at.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              MemoryDeltaStore                │
//! │                                              │
//! │  [0..2) ◄── [2..3) ◄── [3..7) ◄── [7..8)     │
//! │  (LZ4)      (LZ4)      (LZ4)      (LZ4)      │
//! │                                              │
//! │  truncate(3): drop every delta from v3 on    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Reference: Kleppmann, DDIA, Chapter 3 (Log-Structured Storage)

use tessera_model::{HashedVersion, TransformedWaveletDelta};

/// A committed delta, compressed for storage.
#[derive(Debug, Clone)]
pub struct CompressedDelta {
    /// Version the delta applies at
    pub applied_at: u64,
    /// Version (and hash) the delta ends at
    pub resulting_version: HashedVersion,
    /// Encoded size before compression
    pub original_size: u32,
    /// LZ4-compressed bincode payload
    pub compressed: Vec<u8>,
}

impl CompressedDelta {
    pub fn compress(delta: &TransformedWaveletDelta) -> Result<Self, StoreError> {
        let encoded = bincode::serde::encode_to_vec(delta, bincode::config::standard())
            .map_err(|e| StoreError::Encoding(e.to_string()))?;
        Ok(Self {
            applied_at: delta.applied_at_version(),
            resulting_version: delta.resulting_version().clone(),
            original_size: encoded.len() as u32,
            compressed: lz4_flex::compress_prepend_size(&encoded),
        })
    }

    pub fn decompress(&self) -> Result<TransformedWaveletDelta, StoreError> {
        let bytes = lz4_flex::decompress_size_prepended(&self.compressed)
            .map_err(|e| StoreError::DecompressionFailed(e.to_string()))?;
        let (delta, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| StoreError::Decoding(e.to_string()))?;
        Ok(delta)
    }

    /// Compression ratio (original / compressed).
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed.is_empty() {
            return 0.0;
        }
        self.original_size as f64 / self.compressed.len() as f64
    }

    pub fn compressed_size(&self) -> usize {
        self.compressed.len()
    }
}

/// Delta store errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Encoding(String),
    Decoding(String),
    DecompressionFailed(String),
    /// Appended delta does not start at the store head
    NotContiguous { expected: u64, got: u64 },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Encoding(e) => write!(f, "Delta encoding failed: {e}"),
            StoreError::Decoding(e) => write!(f, "Delta decoding failed: {e}"),
            StoreError::DecompressionFailed(e) => write!(f, "Decompression failed: {e}"),
            StoreError::NotContiguous { expected, got } => {
                write!(f, "Delta applies at version {got}, store head is {expected}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Statistics for a delta store.
#[derive(Debug, Clone, Default)]
pub struct DeltaStats {
    pub delta_count: u64,
    pub total_original_bytes: u64,
    pub total_compressed_bytes: u64,
    pub head_version: u64,
}

impl DeltaStats {
    pub fn compression_ratio(&self) -> f64 {
        if self.total_compressed_bytes == 0 {
            return 0.0;
        }
        self.total_original_bytes as f64 / self.total_compressed_bytes as f64
    }
}

/// Append-only log of committed deltas for one document.
pub trait DeltaStore: Send {
    /// Append a delta that applies at the current head.
    fn append(&mut self, delta: &TransformedWaveletDelta) -> Result<(), StoreError>;

    /// Deltas applied at or after `start` and ending at or before `end`.
    fn read(&self, start: u64, end: u64) -> Result<Vec<TransformedWaveletDelta>, StoreError>;

    /// The delta applied exactly at `version`, if any.
    fn get(&self, version: u64) -> Result<Option<TransformedWaveletDelta>, StoreError> {
        Ok(self
            .read(version, u64::MAX)?
            .into_iter()
            .next()
            .filter(|d| d.applied_at_version() == version))
    }

    /// Version after the last stored delta; zero when empty.
    fn current_version(&self) -> u64;

    /// Resulting version of the last stored delta.
    fn current_signature(&self) -> Option<HashedVersion>;

    /// Drop every delta ending after `version`. Returns how many went.
    fn truncate(&mut self, version: u64) -> usize;

    fn stats(&self) -> DeltaStats;
}

/// In-memory [`DeltaStore`] holding LZ4-compressed deltas.
#[derive(Debug, Default)]
pub struct MemoryDeltaStore {
    deltas: Vec<CompressedDelta>,
}

impl MemoryDeltaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Raw compressed entries (for persistence).
    pub fn compressed_deltas(&self) -> &[CompressedDelta] {
        &self.deltas
    }

    /// Rebuild a store from compressed entries, checking contiguity.
    pub fn restore(deltas: Vec<CompressedDelta>) -> Result<Self, StoreError> {
        for pair in deltas.windows(2) {
            let expected = pair[0].resulting_version.version();
            if pair[1].applied_at != expected {
                return Err(StoreError::NotContiguous {
                    expected,
                    got: pair[1].applied_at,
                });
            }
        }
        Ok(Self { deltas })
    }
}

impl DeltaStore for MemoryDeltaStore {
    fn append(&mut self, delta: &TransformedWaveletDelta) -> Result<(), StoreError> {
        let expected = self.current_version();
        if !self.deltas.is_empty() && delta.applied_at_version() != expected {
            return Err(StoreError::NotContiguous {
                expected,
                got: delta.applied_at_version(),
            });
        }
        self.deltas.push(CompressedDelta::compress(delta)?);
        Ok(())
    }

    fn read(&self, start: u64, end: u64) -> Result<Vec<TransformedWaveletDelta>, StoreError> {
        let from = self.deltas.partition_point(|d| d.applied_at < start);
        self.deltas[from..]
            .iter()
            .take_while(|d| d.resulting_version.version() <= end)
            .map(CompressedDelta::decompress)
            .collect()
    }

    fn get(&self, version: u64) -> Result<Option<TransformedWaveletDelta>, StoreError> {
        match self.deltas.binary_search_by_key(&version, |d| d.applied_at) {
            Ok(i) => self.deltas[i].decompress().map(Some),
            Err(_) => Ok(None),
        }
    }

    fn current_version(&self) -> u64 {
        self.deltas
            .last()
            .map_or(0, |d| d.resulting_version.version())
    }

    fn current_signature(&self) -> Option<HashedVersion> {
        self.deltas.last().map(|d| d.resulting_version.clone())
    }

    fn truncate(&mut self, version: u64) -> usize {
        let keep = self
            .deltas
            .partition_point(|d| d.resulting_version.version() <= version);
        let removed = self.deltas.len() - keep;
        self.deltas.truncate(keep);
        removed
    }

    fn stats(&self) -> DeltaStats {
        let mut stats = DeltaStats {
            delta_count: self.deltas.len() as u64,
            head_version: self.current_version(),
            ..DeltaStats::default()
        };
        for delta in &self.deltas {
            stats.total_original_bytes += delta.original_size as u64;
            stats.total_compressed_bytes += delta.compressed.len() as u64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_model::{DocOp, WaveletOperation};

    fn delta(applied_at: u64, count: u64) -> TransformedWaveletDelta {
        let ops = (0..count)
            .map(|i| {
                WaveletOperation::blip(
                    "alice".into(),
                    i,
                    "b+1",
                    DocOp::insert_text(10, 3, "insert_content_block_insert_content_block"),
                )
            })
            .collect();
        TransformedWaveletDelta::new(
            "alice".into(),
            HashedVersion::new(applied_at + count, vec![applied_at as u8; 32]),
            1_000 + applied_at,
            ops,
        )
        .unwrap()
    }

    #[test]
    fn test_compressed_delta_roundtrip() {
        let d = delta(0, 3);
        let compressed = CompressedDelta::compress(&d).unwrap();
        assert_eq!(compressed.applied_at, 0);
        assert_eq!(compressed.resulting_version.version(), 3);
        assert!(compressed.compressed_size() > 0);
        assert_eq!(compressed.decompress().unwrap(), d);
    }

    #[test]
    fn test_append_and_read() {
        let mut store = MemoryDeltaStore::new();
        store.append(&delta(0, 2)).unwrap();
        store.append(&delta(2, 1)).unwrap();
        store.append(&delta(3, 4)).unwrap();

        assert_eq!(store.current_version(), 7);
        assert_eq!(store.current_signature().map(|v| v.version()), Some(7));

        let all = store.read(0, u64::MAX).unwrap();
        assert_eq!(all.len(), 3);

        let middle = store.read(2, 3).unwrap();
        assert_eq!(middle.len(), 1);
        assert_eq!(middle[0].applied_at_version(), 2);

        assert_eq!(store.get(3).unwrap().map(|d| d.len()), Some(4));
        assert!(store.get(4).unwrap().is_none());
    }

    #[test]
    fn test_append_rejects_gap() {
        let mut store = MemoryDeltaStore::new();
        store.append(&delta(0, 2)).unwrap();
        assert_eq!(
            store.append(&delta(3, 1)),
            Err(StoreError::NotContiguous { expected: 2, got: 3 })
        );
    }

    #[test]
    fn test_truncate() {
        let mut store = MemoryDeltaStore::new();
        store.append(&delta(0, 2)).unwrap();
        store.append(&delta(2, 1)).unwrap();
        store.append(&delta(3, 4)).unwrap();

        assert_eq!(store.truncate(2), 2);
        assert_eq!(store.current_version(), 2);
        assert_eq!(store.truncate(0), 1);
        assert!(store.is_empty());
        assert_eq!(store.current_signature(), None);
    }

    #[test]
    fn test_restore_checks_contiguity() {
        let good = vec![
            CompressedDelta::compress(&delta(0, 2)).unwrap(),
            CompressedDelta::compress(&delta(2, 2)).unwrap(),
        ];
        let store = MemoryDeltaStore::restore(good).unwrap();
        assert_eq!(store.current_version(), 4);

        let reloaded = MemoryDeltaStore::restore(store.compressed_deltas().to_vec()).unwrap();
        assert_eq!(reloaded.read(0, u64::MAX).unwrap(), store.read(0, u64::MAX).unwrap());

        let bad = vec![
            CompressedDelta::compress(&delta(0, 2)).unwrap(),
            CompressedDelta::compress(&delta(5, 2)).unwrap(),
        ];
        assert!(MemoryDeltaStore::restore(bad).is_err());
    }

    #[test]
    fn test_stats_show_compression() {
        let mut store = MemoryDeltaStore::new();
        let mut at = 0;
        for _ in 0..10 {
            store.append(&delta(at, 4)).unwrap();
            at += 4;
        }
        let stats = store.stats();
        assert_eq!(stats.delta_count, 10);
        assert_eq!(stats.head_version, 40);
        assert!(stats.total_compressed_bytes < stats.total_original_bytes);
        assert!(stats.compression_ratio() > 1.0);
    }
}
