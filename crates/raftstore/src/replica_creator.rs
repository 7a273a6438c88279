//! Replica factory
//!
//! Materializes new shard replicas: seeds each child's initial replicated
//! log entry into the log store batch and produces the metadata records
//! the storage adapter commits atomically with the parent rewrite.

use std::sync::Arc;

use tracing::info;

use rk_core::{ReplicaState, Shard, ShardLocalState, ShardMetadata};
use storage::StorageResult;

use crate::logdb::{LogDb, LogDbContext, INITIAL_LOG_INDEX};

/// Builder for new shard replicas
pub struct ReplicaCreator {
    logdb: Arc<dyn LogDb>,
    /// Free-text audit string recorded with every created replica.
    reason: String,
    wc: LogDbContext,
    shards_metadata: Vec<ShardMetadata>,
}

impl ReplicaCreator {
    pub fn new(logdb: Arc<dyn LogDb>) -> Self {
        Self {
            logdb,
            reason: String::new(),
            wc: LogDbContext::new(),
            shards_metadata: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_logdb_context(mut self, wc: LogDbContext) -> Self {
        self.wc = wc;
        self
    }

    /// Seed every shard's initial log entry and build its metadata record.
    /// Partial success cannot occur: staging is in-memory and the storage
    /// adapter commits the record group atomically.
    pub fn create(&mut self, shards: Vec<Shard>) -> StorageResult<()> {
        for shard in shards {
            info!(
                shard = shard.id,
                replicas = shard.replicas.len(),
                reason = %self.reason,
                "create new shard replica"
            );
            self.logdb
                .append_initial(&mut self.wc, shard.id, &shard.replicas)?;
            self.shards_metadata.push(ShardMetadata {
                shard_id: shard.id,
                log_index: INITIAL_LOG_INDEX,
                metadata: ShardLocalState {
                    shard,
                    state: ReplicaState::Normal,
                    remove_data: false,
                },
            });
        }
        Ok(())
    }

    /// Hand back the staged log batch and the created metadata records.
    pub fn finish(self) -> (LogDbContext, Vec<ShardMetadata>) {
        (self.wc, self.shards_metadata)
    }
}
