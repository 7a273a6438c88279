//! Request and response batches exchanged between the Raft driver and the
//! shard state machine.
//!
//! A committed log entry carries a `RequestBatch`: either exactly one admin
//! command or a batch of user writes. The applier answers with a
//! `ResponseBatch`; caller-recoverable failures travel in the response
//! header's error envelope.

use serde::{Deserialize, Serialize};

use crate::errors::ShardError;
use crate::shard::{Pair, Replica, Shard, ShardId, ShardLocalState};

/// Membership change kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigChangeType {
    AddNode,
    RemoveNode,
    AddLearnerNode,
}

impl std::fmt::Display for ConfigChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigChangeType::AddNode => write!(f, "add-node"),
            ConfigChangeType::RemoveNode => write!(f, "remove-node"),
            ConfigChangeType::AddLearnerNode => write!(f, "add-learner-node"),
        }
    }
}

/// Single membership change against one shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChangeRequest {
    pub replica: Replica,
    pub change_type: ConfigChangeType,
}

/// One child range of a batch split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub new_shard_id: ShardId,
    pub new_replicas: Vec<Replica>,
}

/// Split a shard into contiguous children tiling the parent range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSplitRequest {
    pub requests: Vec<SplitRequest>,
    /// Opaque payload forwarded to the storage adapter's split commit.
    pub context: Vec<u8>,
}

/// Replace the shard's metadata with a coordinator-planned snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMetadataRequest {
    pub metadata: ShardLocalState,
}

/// Label mutation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdatePolicy {
    /// Replace-by-key, then append the remaining new labels
    Add,
    /// Drop any old label whose key appears in the request
    Remove,
    /// Replace the whole list
    Reset,
    /// Empty the list
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLabelsRequest {
    pub labels: Vec<Pair>,
    pub policy: UpdatePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactLogRequest {
    pub compact_index: u64,
}

/// Admin command discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdminCmdType {
    ConfigChange,
    BatchSplit,
    UpdateMetadata,
    UpdateLabels,
    CompactLog,
}

/// Admin command carried in a request batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdminRequest {
    ConfigChange(ConfigChangeRequest),
    BatchSplit(BatchSplitRequest),
    UpdateMetadata(UpdateMetadataRequest),
    UpdateLabels(UpdateLabelsRequest),
    CompactLog(CompactLogRequest),
}

impl AdminRequest {
    pub fn cmd_type(&self) -> AdminCmdType {
        match self {
            AdminRequest::ConfigChange(_) => AdminCmdType::ConfigChange,
            AdminRequest::BatchSplit(_) => AdminCmdType::BatchSplit,
            AdminRequest::UpdateMetadata(_) => AdminCmdType::UpdateMetadata,
            AdminRequest::UpdateLabels(_) => AdminCmdType::UpdateLabels,
            AdminRequest::CompactLog(_) => AdminCmdType::CompactLog,
        }
    }
}

/// User write operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteCommand {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl WriteCommand {
    pub fn key(&self) -> &[u8] {
        match self {
            WriteCommand::Put { key, .. } => key,
            WriteCommand::Delete { key } => key,
        }
    }
}

/// One user request inside a write batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: Vec<u8>,
    pub cmd: WriteCommand,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBatchHeader {
    pub id: Vec<u8>,
    pub shard_id: ShardId,
}

/// A committed log entry's payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestBatch {
    pub header: RequestBatchHeader,
    pub admin: Option<AdminRequest>,
    pub requests: Vec<Request>,
}

impl RequestBatch {
    pub fn with_admin(shard_id: ShardId, admin: AdminRequest) -> Self {
        Self {
            header: RequestBatchHeader {
                id: Vec::new(),
                shard_id,
            },
            admin: Some(admin),
            requests: Vec::new(),
        }
    }

    pub fn with_requests(shard_id: ShardId, requests: Vec<Request>) -> Self {
        Self {
            header: RequestBatchHeader {
                id: Vec::new(),
                shard_id,
            },
            admin: None,
            requests,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.admin.is_some()
    }
}

/// Per-request response value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub value: Vec<u8>,
}

/// Admin command response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdminResponse {
    ConfigChange { shard: Shard },
    BatchSplit { shards: Vec<Shard> },
    UpdateMetadata,
    UpdateLabels,
    CompactLog,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseBatchHeader {
    pub id: Vec<u8>,
    pub error: Option<ShardError>,
}

/// The applier's answer to one committed entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseBatch {
    pub header: ResponseBatchHeader,
    pub admin: Option<AdminResponse>,
    pub responses: Vec<Response>,
}

impl ResponseBatch {
    pub fn with_admin(admin: AdminResponse) -> Self {
        Self {
            admin: Some(admin),
            ..Default::default()
        }
    }

    pub fn has_error(&self) -> bool {
        self.header.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ReplicaRole;

    #[test]
    fn test_admin_cmd_type() {
        let req = AdminRequest::CompactLog(CompactLogRequest { compact_index: 7 });
        assert_eq!(req.cmd_type(), AdminCmdType::CompactLog);

        let req = AdminRequest::ConfigChange(ConfigChangeRequest {
            replica: Replica::new(1, 1, ReplicaRole::Voter),
            change_type: ConfigChangeType::AddNode,
        });
        assert_eq!(req.cmd_type(), AdminCmdType::ConfigChange);
    }

    #[test]
    fn test_batch_kind() {
        let admin = RequestBatch::with_admin(
            1,
            AdminRequest::CompactLog(CompactLogRequest { compact_index: 1 }),
        );
        assert!(admin.is_admin());

        let write = RequestBatch::with_requests(
            1,
            vec![Request {
                id: vec![1],
                cmd: WriteCommand::Delete { key: b"k".to_vec() },
            }],
        );
        assert!(!write.is_admin());
    }
}
