//! Response error envelope
//!
//! Caller-recoverable failures travel back inside the response batch
//! header rather than as transport errors; the client retries elsewhere
//! after refreshing its view of the cluster.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shard::{Replica, Shard, ShardId};

/// Error envelope carried in `ResponseBatchHeader`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum ShardError {
    /// Command's epoch is strictly behind the shard's current epoch
    #[error("stale command")]
    StaleCommand,
    /// Stale epoch; the caller should refresh to the enumerated children
    #[error("stale epoch")]
    StaleEpoch { new_shards: Vec<Shard> },
    /// Key lies outside the shard's half-open range
    #[error("key not in shard {shard_id}")]
    KeyNotInShard {
        key: Vec<u8>,
        shard_id: ShardId,
        start: Vec<u8>,
        end: Vec<u8>,
    },
    /// Request targeted the wrong container
    #[error("store not match")]
    StoreNotMatch,
    /// Forward to the hinted leader
    #[error("not leader")]
    NotLeader { leader_hint: Option<Replica> },
    #[error("shard {0} not found")]
    ShardNotFound(ShardId),
    /// Command-level failure without a dedicated envelope variant
    #[error("{0}")]
    Other(String),
}
