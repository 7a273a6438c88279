//! Storage trait definitions
//!
//! `DataStorage` is the seam between the deterministic applier and the
//! storage engine. The engine's internals (LSM, B-tree, ...) are opaque;
//! the applier only relies on the atomicity guarantees spelled out on each
//! method.

use thiserror::Error;

use rk_core::{Request, Shard, ShardId, ShardMetadata};

/// Storage adapter error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The operation was superseded by an equivalent one already absorbed
    /// by the storage layer. Not a failure: callers treat it as a no-op.
    #[error("aborted")]
    Aborted,
    /// Durable metadata cannot be decoded
    #[error("corrupted metadata: {0}")]
    Corrupted(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Accumulated state for one write batch.
///
/// The applier stages the batch here, hands it to `DataStorage::write`,
/// then harvests per-request responses and the byte counters feeding the
/// coordinator's split decisions. `diff_bytes` is signed: deletions shrink
/// the approximate shard size.
#[derive(Debug, Default)]
pub struct WriteContext {
    pub shard: Shard,
    pub index: u64,
    pub requests: Vec<Request>,
    pub responses: Vec<Vec<u8>>,
    pub written_bytes: u64,
    pub diff_bytes: i64,
}

impl WriteContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for the batch committed at `index`.
    pub fn initialize(&mut self, shard: Shard, index: u64, requests: &[Request]) {
        self.shard = shard;
        self.index = index;
        self.requests.clear();
        self.requests.extend_from_slice(requests);
        self.responses.clear();
        self.written_bytes = 0;
        self.diff_bytes = 0;
    }
}

/// Interface the applier consumes to reach durable state.
pub trait DataStorage: Send + Sync {
    /// Highest log index whose state-machine effects survive restart.
    /// Raft entries at or below this index are safe to truncate.
    fn persistent_log_index(&self, shard_id: ShardId) -> StorageResult<u64>;

    /// Persist a batch of shard metadata records. Atomic across the batch.
    fn save_shard_metadata(&self, metadata: Vec<ShardMetadata>) -> StorageResult<()>;

    /// Commit a split: the parent rewrite and the children creation land
    /// atomically. `Err(Aborted)` means another path already effected an
    /// equivalent or superseding split; the caller must treat the apply as
    /// a no-op.
    fn split(
        &self,
        old: ShardMetadata,
        new: Vec<ShardMetadata>,
        context: &[u8],
    ) -> StorageResult<()>;

    /// Execute the staged write batch, filling `responses` and the byte
    /// counters.
    fn write(&self, ctx: &mut WriteContext) -> StorageResult<()>;
}
