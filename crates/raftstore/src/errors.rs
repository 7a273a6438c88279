//! Apply errors and response envelope builders
//!
//! Three tiers: caller-recoverable failures go into the response header's
//! error envelope; command-level domain failures (`ApplyError`) come back
//! as a non-empty error without any persistence; everything else on a
//! persistence path is fatal and aborts the process.

use thiserror::Error;

use rk_core::{
    ContainerId, Replica, ReplicaId, Shard, ShardError, ShardId, ResponseBatch,
    ResponseBatchHeader,
};
use storage::StorageError;

/// Command-level failure while applying an admin entry.
///
/// These paths mutate nothing: the shard, its epoch and its durable record
/// are untouched when one of them is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("replica duplicated: shard {shard_id}, replica {replica_id} on container {container_id}")]
    ReplicaDuplicated {
        shard_id: ShardId,
        replica_id: ReplicaId,
        container_id: ContainerId,
    },
    #[error("replica not found: shard {shard_id}, replica {replica_id} on container {container_id}")]
    ReplicaNotFound {
        shard_id: ShardId,
        replica_id: ReplicaId,
        container_id: ContainerId,
    },
    #[error("not learner: shard {shard_id}, replica {replica_id}")]
    NotLearner {
        shard_id: ShardId,
        replica_id: ReplicaId,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn error_base_resp(id: Vec<u8>) -> ResponseBatch {
    ResponseBatch {
        header: ResponseBatchHeader { id, error: None },
        ..Default::default()
    }
}

/// Response carrying a command-level failure message.
pub fn error_other_cmd_resp(err: &ApplyError) -> ResponseBatch {
    let mut resp = error_base_resp(Vec::new());
    resp.header.error = Some(ShardError::Other(err.to_string()));
    resp
}

/// Response telling the caller its command's epoch is behind.
pub fn error_stale_command_resp(id: Vec<u8>) -> ResponseBatch {
    let mut resp = error_base_resp(id);
    resp.header.error = Some(ShardError::StaleCommand);
    resp
}

/// Stale epoch response enumerating the shards the caller should refresh
/// to.
pub fn error_stale_epoch_resp(id: Vec<u8>, new_shards: Vec<Shard>) -> ResponseBatch {
    let mut resp = error_base_resp(id);
    resp.header.error = Some(ShardError::StaleEpoch { new_shards });
    resp
}

pub fn error_store_not_match_resp(id: Vec<u8>) -> ResponseBatch {
    let mut resp = error_base_resp(id);
    resp.header.error = Some(ShardError::StoreNotMatch);
    resp
}

pub fn error_not_leader_resp(id: Vec<u8>, leader_hint: Option<Replica>) -> ResponseBatch {
    let mut resp = error_base_resp(id);
    resp.header.error = Some(ShardError::NotLeader { leader_hint });
    resp
}

pub fn error_shard_not_found_resp(id: Vec<u8>, shard_id: ShardId) -> ResponseBatch {
    let mut resp = error_base_resp(id);
    resp.header.error = Some(ShardError::ShardNotFound(shard_id));
    resp
}

/// `None` when `key` is inside the shard's half-open range, otherwise the
/// envelope error describing the miss.
pub fn check_key_in_shard(key: &[u8], shard: &Shard) -> Option<ShardError> {
    if shard.contains_key(key) {
        return None;
    }
    Some(ShardError::KeyNotInShard {
        key: key.to_vec(),
        shard_id: shard.id,
        start: shard.start.clone(),
        end: shard.end.clone(),
    })
}
