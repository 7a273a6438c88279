//! Coordinator heartbeat response messages
//!
//! Shard leaders heartbeat upward to the placement coordinator; the
//! coordinator answers with planning hints routed back over the leader's
//! bound stream. Responses are idempotent hints: losing one is fine, the
//! coordinator re-proposes on the next heartbeat cycle.

use serde::{Deserialize, Serialize};

use crate::rpc::ConfigChangeType;
use crate::shard::{Replica, ShardId};

/// Planning decision carried by one heartbeat response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatTask {
    /// Propose a membership change through the shard's Raft log
    ChangePeer {
        replica: Replica,
        change_type: ConfigChangeType,
    },
    /// Hand leadership to the named replica
    TransferLeader { replica: Replica },
    /// Split the shard at the suggested keys
    SplitHint { keys: Vec<Vec<u8>> },
}

/// Heartbeat response addressed to one shard's leader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardHeartbeatRsp {
    pub shard_id: ShardId,
    pub task: HeartbeatTask,
}

impl ShardHeartbeatRsp {
    pub fn new(shard_id: ShardId, task: HeartbeatTask) -> Self {
        Self { shard_id, task }
    }
}
