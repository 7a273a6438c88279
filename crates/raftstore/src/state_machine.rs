//! Shard state machine core
//!
//! One state machine per shard. The Raft driver feeds committed entries in
//! log order through `exec`; within a shard the apply loop is strictly
//! serial, which is the only guarantee deterministic replication relies
//! on. Admin handlers live in `admin.rs`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use rk_core::{
    ConfigChangeRequest, Replica, ReplicaId, ReplicaState, RequestBatch, Response,
    ResponseBatch, Shard, ShardId, ShardLocalState, ShardMetadata,
};
use storage::{DataStorage, StorageResult, WriteContext};

use crate::errors::{self, ApplyError};
use crate::logdb::{LogDb, LogDbContext};
use crate::replica_creator::ReplicaCreator;

/// Admin command counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdminMetrics {
    pub conf_change: u64,
    pub split: u64,
    pub split_succeed: u64,
    pub update_metadata: u64,
    pub update_labels: u64,
    pub compact: u64,
}

/// Apply-loop telemetry, harvested periodically by the Raft driver and
/// reported to the coordinator for split decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyMetrics {
    pub written_keys: u64,
    pub written_bytes: u64,
    /// Approximate growth of the shard since the last report. Saturates at
    /// zero when deletions outweigh writes.
    pub approximate_diff_hint: u64,
    pub admin: AdminMetrics,
}

/// Context for one committed entry.
///
/// The driver owns one per shard and reuses it across entries so the
/// metrics accumulate until harvested.
#[derive(Debug, Default)]
pub struct ApplyContext {
    pub index: u64,
    pub term: u64,
    pub req: RequestBatch,
    pub metrics: ApplyMetrics,
    pub admin_result: Option<AdminResult>,
}

impl ApplyContext {
    pub fn new(index: u64, term: u64, req: RequestBatch) -> Self {
        Self {
            index,
            term,
            req,
            metrics: ApplyMetrics::default(),
            admin_result: None,
        }
    }

    /// Rearm for the next entry, keeping accumulated metrics.
    pub fn reset_for(&mut self, index: u64, term: u64, req: RequestBatch) {
        self.index = index;
        self.term = term;
        self.req = req;
        self.admin_result = None;
    }
}

/// Single-step membership change handed to the consensus library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfChangeKind {
    AddNode,
    RemoveNode,
    AddLearnerNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfChange {
    pub kind: ConfChangeKind,
    pub replica_id: ReplicaId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionResult {
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChangeResult {
    pub index: u64,
    pub changes: Vec<ConfigChangeRequest>,
    pub shard: Shard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitResult {
    pub new_shards: Vec<Shard>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMetadataResult {
    /// Authoritative membership to reconcile toward, not deltas to apply.
    pub changes: Vec<ConfChange>,
}

/// Structured side-effect summary returned to the Raft driver
#[derive(Debug, Clone, PartialEq)]
pub enum AdminResult {
    CompactLog(CompactionResult),
    ConfigChange(ConfigChangeResult),
    BatchSplit(SplitResult),
    UpdateMetadata(UpdateMetadataResult),
    UpdateLabels,
}

/// Deterministic applier for a single shard.
///
/// Shareable across the Raft driver and the destroy watcher; the shard
/// snapshot sits behind a lock so concurrent readers may hold a stale view
/// but are never ahead of disk.
pub struct ShardStateMachine {
    shard_id: ShardId,
    /// This replica's identity within the shard.
    replica: Replica,
    shard: RwLock<Shard>,
    first_index: AtomicU64,
    removed: AtomicBool,
    splitted: AtomicBool,
    pub(crate) data_storage: Arc<dyn DataStorage>,
    pub(crate) logdb: Arc<dyn LogDb>,
    pub(crate) write_ctx: Mutex<WriteContext>,
    /// Log-store write batch, committed by the driver after each apply
    /// round.
    pub(crate) wc: Mutex<LogDbContext>,
}

impl ShardStateMachine {
    pub fn new(
        shard: Shard,
        replica: Replica,
        data_storage: Arc<dyn DataStorage>,
        logdb: Arc<dyn LogDb>,
    ) -> Self {
        Self {
            shard_id: shard.id,
            replica,
            shard: RwLock::new(shard),
            first_index: AtomicU64::new(0),
            removed: AtomicBool::new(false),
            splitted: AtomicBool::new(false),
            data_storage,
            logdb,
            write_ctx: Mutex::new(WriteContext::new()),
            wc: Mutex::new(LogDbContext::new()),
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Snapshot of the current in-memory shard.
    pub fn get_shard(&self) -> Shard {
        self.shard.read().clone()
    }

    pub(crate) fn update_shard(&self, shard: Shard) {
        *self.shard.write() = shard;
    }

    pub fn first_index(&self) -> u64 {
        self.first_index.load(Ordering::SeqCst)
    }

    /// Set by the driver after log replay, and by the compaction handler.
    pub fn set_first_index(&self, index: u64) {
        self.first_index.store(index, Ordering::SeqCst);
    }

    /// Whether this replica applied its own removal. Destruction is
    /// deferred: the majority must replicate the removal entry first.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_removed(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }

    /// Whether this shard was replaced by a split.
    pub fn is_splitted(&self) -> bool {
        self.splitted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_splitted(&self) {
        self.splitted.store(true, Ordering::SeqCst);
    }

    /// Hand the staged log-store batch to the driver for commit.
    pub fn take_logdb_context(&self) -> LogDbContext {
        std::mem::take(&mut *self.wc.lock())
    }

    pub(crate) fn replica_creator(&self) -> ReplicaCreator {
        ReplicaCreator::new(self.logdb.clone())
    }

    /// Apply one committed entry. Exactly one admin handler runs per admin
    /// entry; anything else is a user write batch.
    pub fn exec(&self, ctx: &mut ApplyContext) -> ResponseBatch {
        if ctx.req.is_admin() {
            match self.exec_admin_request(ctx) {
                Ok(resp) => resp,
                Err(err) => errors::error_other_cmd_resp(&err),
            }
        } else {
            self.exec_write_request(ctx)
        }
    }

    pub(crate) fn exec_admin_request(
        &self,
        ctx: &mut ApplyContext,
    ) -> Result<ResponseBatch, ApplyError> {
        let Some(admin) = ctx.req.admin.clone() else {
            return Ok(ResponseBatch::default());
        };
        self.dispatch_admin(ctx, admin)
    }

    /// Execute a user write batch against the storage adapter.
    pub(crate) fn exec_write_request(&self, ctx: &mut ApplyContext) -> ResponseBatch {
        let mut write_ctx = self.write_ctx.lock();
        write_ctx.initialize(self.get_shard(), ctx.index, &ctx.req.requests);
        for req in &ctx.req.requests {
            debug!(
                id = ?req.id,
                shard = self.shard_id,
                replica = self.replica.id,
                index = ctx.index,
                "begin to execute write"
            );
        }
        if let Err(e) = self.data_storage.write(&mut write_ctx) {
            error!(error = %e, shard = self.shard_id, "failed to exec write");
            panic!("failed to exec write: {e}");
        }

        let mut resp = ResponseBatch::default();
        for value in write_ctx.responses.drain(..) {
            ctx.metrics.written_keys += 1;
            resp.responses.push(Response { value });
        }

        ctx.metrics.written_bytes += write_ctx.written_bytes;
        if write_ctx.diff_bytes < 0 {
            let shrink = write_ctx.diff_bytes.unsigned_abs();
            ctx.metrics.approximate_diff_hint =
                ctx.metrics.approximate_diff_hint.saturating_sub(shrink);
        } else {
            ctx.metrics.approximate_diff_hint += write_ctx.diff_bytes as u64;
        }
        resp
    }

    /// Persist the shard's local state at `log_index`.
    pub(crate) fn save_shard_metadata(
        &self,
        log_index: u64,
        shard: Shard,
        state: ReplicaState,
    ) -> StorageResult<()> {
        self.data_storage.save_shard_metadata(vec![ShardMetadata {
            shard_id: shard.id,
            log_index,
            metadata: ShardLocalState {
                shard,
                state,
                remove_data: false,
            },
        }])
    }

    /// Mark the shard destroyed and persist the tombstone. Called by the
    /// destroy watcher once the removal entry is known safe.
    pub fn mark_destroyed(&self, log_index: u64, remove_data: bool) -> StorageResult<()> {
        let mut shard = self.get_shard();
        shard.state = rk_core::ShardState::Destroyed;
        self.data_storage.save_shard_metadata(vec![ShardMetadata {
            shard_id: shard.id,
            log_index,
            metadata: ShardLocalState {
                shard: shard.clone(),
                state: ReplicaState::Tombstone,
                remove_data,
            },
        }])?;
        self.update_shard(shard);
        Ok(())
    }
}
