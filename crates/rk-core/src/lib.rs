//! Core shard metadata and wire types
//!
//! Shared definitions for the sharded key-value engine:
//! - Shard metadata model (range, epoch, replicas, labels, lifecycle)
//! - Request/response batches exchanged with the Raft driver
//! - Response error envelope
//! - Coordinator heartbeat response messages

pub mod errors;
pub mod heartbeat;
pub mod rpc;
pub mod shard;

// Re-export commonly used types
pub use errors::ShardError;
pub use heartbeat::{HeartbeatTask, ShardHeartbeatRsp};
pub use rpc::{
    AdminCmdType, AdminRequest, AdminResponse, BatchSplitRequest, CompactLogRequest,
    ConfigChangeRequest, ConfigChangeType, Request, RequestBatch, RequestBatchHeader, Response,
    ResponseBatch, ResponseBatchHeader, SplitRequest, UpdateLabelsRequest, UpdateMetadataRequest,
    UpdatePolicy, WriteCommand,
};
pub use shard::{
    ContainerId, Epoch, Pair, Replica, ReplicaId, ReplicaRole, ReplicaState, Shard,
    ShardId, ShardLocalState, ShardMetadata, ShardState,
};
