//! Raft log store seam
//!
//! The replica factory seeds new shards with their initial replicated log
//! entry through `LogDb`. Entries are staged into a `LogDbContext` write
//! batch; the Raft driver commits the batch alongside its own log writes
//! so seeding and persistence land together.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use rk_core::{Replica, ShardId};
use storage::{StorageResult, StorageError};

/// First index of a freshly seeded shard log.
pub const INITIAL_LOG_INDEX: u64 = 1;

/// Staged bootstrap entry for one new shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialEntry {
    pub shard_id: ShardId,
    pub index: u64,
    pub replicas: Vec<Replica>,
}

/// Write batch handle into the log store
#[derive(Debug, Default)]
pub struct LogDbContext {
    entries: Vec<InitialEntry>,
}

impl LogDbContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, entry: InitialEntry) {
        self.entries.push(entry);
    }

    pub fn staged(&self) -> &[InitialEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Durable store of Raft log entries, as seen by the replica factory.
pub trait LogDb: Send + Sync {
    /// Stage the initial log entry for a new shard into `ctx`.
    fn append_initial(
        &self,
        ctx: &mut LogDbContext,
        shard_id: ShardId,
        replicas: &[Replica],
    ) -> StorageResult<()>;

    /// Make a staged batch durable. Atomic across the batch.
    fn commit(&self, ctx: LogDbContext) -> StorageResult<()>;
}

/// In-memory log store
#[derive(Default)]
pub struct MemLogDb {
    seeded: Mutex<HashMap<ShardId, Vec<Replica>>>,
}

impl MemLogDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replicas the shard was seeded with, if committed.
    pub fn seeded_replicas(&self, shard_id: ShardId) -> Option<Vec<Replica>> {
        self.seeded.lock().get(&shard_id).cloned()
    }
}

impl LogDb for MemLogDb {
    fn append_initial(
        &self,
        ctx: &mut LogDbContext,
        shard_id: ShardId,
        replicas: &[Replica],
    ) -> StorageResult<()> {
        if self.seeded.lock().contains_key(&shard_id) {
            return Err(StorageError::Internal(format!(
                "shard {shard_id} already seeded"
            )));
        }
        ctx.stage(InitialEntry {
            shard_id,
            index: INITIAL_LOG_INDEX,
            replicas: replicas.to_vec(),
        });
        Ok(())
    }

    fn commit(&self, ctx: LogDbContext) -> StorageResult<()> {
        let mut seeded = self.seeded.lock();
        for entry in ctx.entries {
            debug!(shard = entry.shard_id, "committed initial log entry");
            seeded.insert(entry.shard_id, entry.replicas);
        }
        Ok(())
    }
}
