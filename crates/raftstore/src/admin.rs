//! Admin command handlers
//!
//! Exactly one handler runs per committed admin entry. Handlers are pure
//! functions of the prior shard and the apply context plus storage side
//! effects; every sort step below exists so container ordering can never
//! leak into replicated state.

use tracing::{error, info};

use rk_core::{
    AdminRequest, AdminResponse, BatchSplitRequest, CompactLogRequest, ConfigChangeRequest,
    ConfigChangeType, Pair, ReplicaRole, ReplicaState, ResponseBatch, Shard, ShardLocalState,
    ShardMetadata, ShardState, UpdateLabelsRequest, UpdateMetadataRequest, UpdatePolicy,
};
use storage::StorageError;

use crate::errors::{check_key_in_shard, ApplyError};
use crate::state_machine::{
    AdminResult, ApplyContext, CompactionResult, ConfChange, ConfChangeKind, ConfigChangeResult,
    ShardStateMachine, SplitResult, UpdateMetadataResult,
};

impl ShardStateMachine {
    pub(crate) fn dispatch_admin(
        &self,
        ctx: &mut ApplyContext,
        admin: AdminRequest,
    ) -> Result<ResponseBatch, ApplyError> {
        match admin {
            AdminRequest::ConfigChange(req) => self.exec_config_change(ctx, req),
            AdminRequest::BatchSplit(req) => self.exec_batch_split(ctx, req),
            AdminRequest::UpdateMetadata(req) => self.exec_update_metadata(ctx, req),
            AdminRequest::UpdateLabels(req) => self.exec_update_labels(ctx, req),
            AdminRequest::CompactLog(req) => self.exec_compact_log(ctx, req),
        }
    }

    fn exec_config_change(
        &self,
        ctx: &mut ApplyContext,
        req: ConfigChangeRequest,
    ) -> Result<ResponseBatch, ApplyError> {
        ctx.metrics.admin.conf_change += 1;
        let mut replica = req.replica.clone();
        let current = self.get_shard();

        info!(
            index = ctx.index,
            shard = current.id,
            epoch = %current.epoch,
            change = %req.change_type,
            replica = %replica,
            "begin to apply change replica"
        );

        let mut res = current.clone();
        res.epoch.conf_ver += 1;
        let shard_id = res.id;

        match req.change_type {
            ConfigChangeType::AddNode => {
                if let Some(p) = res.find_replica_mut(replica.container_id) {
                    if p.id == replica.id {
                        if p.role != ReplicaRole::Learner {
                            return Err(ApplyError::ReplicaDuplicated {
                                shard_id,
                                replica_id: p.id,
                                container_id: replica.container_id,
                            });
                        }
                    } else {
                        return Err(ApplyError::ReplicaDuplicated {
                            shard_id,
                            replica_id: p.id,
                            container_id: replica.container_id,
                        });
                    }
                    p.role = ReplicaRole::Voter;
                    info!(replica = %p, "learner promoted to voter");
                } else {
                    replica.role = ReplicaRole::Voter;
                    res.replicas.push(replica.clone());
                }
            }
            ConfigChangeType::RemoveNode => {
                match res.find_replica(replica.container_id).cloned() {
                    Some(p) if p.id == replica.id => {
                        res.remove_replica(replica.container_id);
                        if self.replica().id == replica.id {
                            // Removing ourselves. Only flag it: the majority
                            // still has to replicate this entry before the
                            // destroy watcher may act.
                            self.set_removed();
                            info!(replica = %replica, "replica removed itself");
                        }
                    }
                    Some(p) => {
                        return Err(ApplyError::ReplicaNotFound {
                            shard_id,
                            replica_id: p.id,
                            container_id: replica.container_id,
                        });
                    }
                    None => {
                        return Err(ApplyError::ReplicaNotFound {
                            shard_id,
                            replica_id: replica.id,
                            container_id: replica.container_id,
                        });
                    }
                }
            }
            ConfigChangeType::AddLearnerNode => {
                if let Some(p) = res.find_replica(replica.container_id) {
                    return Err(ApplyError::ReplicaDuplicated {
                        shard_id,
                        replica_id: p.id,
                        container_id: replica.container_id,
                    });
                }
                replica.role = ReplicaRole::Learner;
                res.replicas.push(replica.clone());
            }
        }

        let state = if self.is_removed() {
            ReplicaState::Tombstone
        } else {
            ReplicaState::Normal
        };
        self.update_shard(res.clone());
        if let Err(e) = self.save_shard_metadata(ctx.index, res.clone(), state) {
            error!(error = %e, shard = res.id, "failed to save shard metadata");
            panic!("failed to save shard metadata: {e}");
        }

        info!(shard = res.id, epoch = %res.epoch, state = %state, "apply change replica completed");

        let resp = ResponseBatch::with_admin(AdminResponse::ConfigChange { shard: res.clone() });
        ctx.admin_result = Some(AdminResult::ConfigChange(ConfigChangeResult {
            index: ctx.index,
            changes: vec![req],
            shard: res,
        }));
        Ok(resp)
    }

    fn exec_batch_split(
        &self,
        ctx: &mut ApplyContext,
        req: BatchSplitRequest,
    ) -> Result<ResponseBatch, ApplyError> {
        ctx.metrics.admin.split += 1;

        if req.requests.is_empty() {
            error!(shard = self.shard_id(), "missing split requests");
            panic!("missing split requests");
        }

        let mut current = self.get_shard();
        let last = req.requests.len() - 1;
        if req.requests[0].start != current.start || req.requests[last].end != current.end {
            error!(
                shard = current.id,
                actual_start = ?req.requests[0].start,
                shard_start = ?current.start,
                actual_end = ?req.requests[last].end,
                shard_end = ?current.end,
                "invalid split keys"
            );
            panic!("invalid split keys");
        }

        let new_shards_count = req.requests.len() as u64;
        current.epoch.version += new_shards_count;
        let mut expect_start = current.start.clone();
        let mut new_shards = Vec::with_capacity(req.requests.len());
        for (idx, split) in req.requests.iter().enumerate() {
            if check_key_in_shard(&split.start, &current).is_some()
                || (idx != last && check_key_in_shard(&split.end, &current).is_some())
            {
                error!(
                    shard = current.id,
                    split_start = ?split.start,
                    split_end = ?split.end,
                    "invalid split request range"
                );
                panic!("invalid split request range");
            }
            if split.start != expect_start {
                error!(
                    shard = current.id,
                    split_start = ?split.start,
                    expect_start = ?expect_start,
                    "invalid split request start key"
                );
                panic!("invalid split request start key");
            }
            expect_start = split.end.clone();

            new_shards.push(Shard {
                id: split.new_shard_id,
                group: current.group,
                unique: current.unique.clone(),
                rule_groups: current.rule_groups.clone(),
                disable_split: current.disable_split,
                epoch: current.epoch,
                start: split.start.clone(),
                end: split.end.clone(),
                replicas: split.new_replicas.clone(),
                ..Default::default()
            });
            ctx.metrics.admin.split_succeed += 1;
        }

        // Children only get their initial log entry seeded here; their
        // metadata reaches disk atomically with the parent rewrite in the
        // storage split below.
        let wc = self.take_logdb_context();
        let mut creator = self
            .replica_creator()
            .with_reason("split")
            .with_logdb_context(wc);
        if let Err(e) = creator.create(new_shards.clone()) {
            error!(error = %e, shard = current.id, "failed to seed split children");
            panic!("failed to seed split children: {e}");
        }
        let (wc, new_metadata) = creator.finish();
        *self.wc.lock() = wc;

        // The old shard cannot be destroyed outright: not every replica is
        // guaranteed to have received this split entry yet, and if the
        // majority destroyed itself the minority would never catch up. The
        // real destruction runs in a later asynchronous task.
        current.state = ShardState::Destroying;
        let old = ShardMetadata {
            shard_id: current.id,
            log_index: ctx.index,
            metadata: ShardLocalState {
                shard: current.clone(),
                state: ReplicaState::Normal,
                remove_data: false,
            },
        };
        match self.data_storage.split(old, new_metadata, &req.context) {
            Ok(()) => {}
            Err(StorageError::Aborted) => return Ok(ResponseBatch::default()),
            Err(e) => {
                error!(error = %e, shard = current.id, "failed to split on data storage");
                panic!("failed to split on data storage: {e}");
            }
        }

        self.set_splitted();
        self.update_shard(current);
        let resp = ResponseBatch::with_admin(AdminResponse::BatchSplit {
            shards: new_shards.clone(),
        });
        ctx.admin_result = Some(AdminResult::BatchSplit(SplitResult { new_shards }));
        Ok(resp)
    }

    fn exec_update_metadata(
        &self,
        ctx: &mut ApplyContext,
        req: UpdateMetadataRequest,
    ) -> Result<ResponseBatch, ApplyError> {
        ctx.metrics.admin.update_metadata += 1;

        let current = self.get_shard();
        if req.metadata.shard.epoch.is_stale(&current.epoch) {
            error!(
                shard = current.id,
                current_epoch = %current.epoch,
                new_epoch = %req.metadata.shard.epoch,
                "stale epoch in committed metadata update"
            );
            panic!("stale epoch in committed metadata update");
        }

        if let Err(e) = self.data_storage.save_shard_metadata(vec![ShardMetadata {
            shard_id: self.shard_id(),
            log_index: ctx.index,
            metadata: req.metadata.clone(),
        }]) {
            error!(error = %e, shard = current.id, "failed to update metadata");
            panic!("failed to update metadata: {e}");
        }

        self.update_shard(req.metadata.shard.clone());

        info!(
            shard = self.shard_id(),
            replica_state = %req.metadata.state,
            epoch = %req.metadata.shard.epoch,
            "shard metadata updated"
        );

        // The emitted set is the authoritative membership the consensus
        // library reconciles toward, so every entry is an AddNode.
        let mut replicas = req.metadata.shard.replicas.clone();
        replicas.sort_by_key(|r| r.id);
        let changes = replicas
            .iter()
            .map(|r| ConfChange {
                kind: ConfChangeKind::AddNode,
                replica_id: r.id,
            })
            .collect();

        let resp = ResponseBatch::with_admin(AdminResponse::UpdateMetadata);
        ctx.admin_result = Some(AdminResult::UpdateMetadata(UpdateMetadataResult { changes }));
        Ok(resp)
    }

    fn exec_update_labels(
        &self,
        ctx: &mut ApplyContext,
        req: UpdateLabelsRequest,
    ) -> Result<ResponseBatch, ApplyError> {
        ctx.metrics.admin.update_labels += 1;

        let mut current = self.get_shard();
        match req.policy {
            UpdatePolicy::Add => {
                let mut new_labels: Vec<Pair> = current
                    .labels
                    .iter()
                    .filter(|old| !req.labels.iter().any(|l| l.key == old.key))
                    .cloned()
                    .collect();
                new_labels.extend(req.labels.iter().cloned());
                current.labels = new_labels;
            }
            UpdatePolicy::Remove => {
                current
                    .labels
                    .retain(|old| !req.labels.iter().any(|l| l.key == old.key));
            }
            UpdatePolicy::Reset => {
                current.labels = req.labels.clone();
            }
            UpdatePolicy::Clear => {
                current.labels.clear();
            }
        }

        if let Err(e) = self.save_shard_metadata(ctx.index, current.clone(), ReplicaState::Normal)
        {
            error!(error = %e, shard = current.id, "failed to update labels");
            panic!("failed to update labels: {e}");
        }

        current.sort_labels();
        self.update_shard(current.clone());

        info!(shard = current.id, labels = ?current.labels, "shard labels updated");

        let resp = ResponseBatch::with_admin(AdminResponse::UpdateLabels);
        ctx.admin_result = Some(AdminResult::UpdateLabels);
        Ok(resp)
    }

    fn exec_compact_log(
        &self,
        ctx: &mut ApplyContext,
        req: CompactLogRequest,
    ) -> Result<ResponseBatch, ApplyError> {
        ctx.metrics.admin.compact += 1;

        let first_index = self.first_index();
        if req.compact_index <= first_index {
            return Ok(ResponseBatch::default());
        }

        let compact_index = self.adjust_compaction_index(req.compact_index)?;
        self.set_first_index(compact_index + 1);

        let resp = ResponseBatch::with_admin(AdminResponse::CompactLog);
        ctx.admin_result = Some(AdminResult::CompactLog(CompactionResult {
            index: compact_index,
        }));
        Ok(resp)
    }

    /// Clamp a requested compaction index to the storage layer's durable
    /// watermark: entries above it may still be required to rebuild state
    /// after reboot.
    fn adjust_compaction_index(&self, index: u64) -> Result<u64, ApplyError> {
        let persistent_log_index = self
            .data_storage
            .persistent_log_index(self.shard_id())
            .map_err(|e| {
                error!(error = %e, shard = self.shard_id(), "failed to get persistent log index");
                e
            })?;
        if index > persistent_log_index {
            info!(
                shard = self.shard_id(),
                persistent_index = persistent_log_index,
                compact_index = index,
                "adjusted compact log index"
            );
            return Ok(persistent_log_index);
        }
        Ok(index)
    }
}
