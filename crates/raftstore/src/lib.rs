//! Shard state machine
//!
//! The deterministic applier sitting between the Raft driver and the
//! storage adapter. Committed entries arrive as `(index, term, request)`
//! tuples; the applier executes admin commands (membership, splits,
//! metadata, labels, log compaction) and user writes, persists shard
//! metadata, and hands a structured admin result back to the Raft core.

pub mod admin;
pub mod config;
pub mod destroy;
pub mod errors;
pub mod logdb;
pub mod replica_creator;
pub mod state_machine;

pub use config::{DestroyConfig, StoreConfig};
pub use destroy::{DestroyCheck, DestroyWatcher};
pub use errors::ApplyError;
pub use logdb::{LogDb, LogDbContext, MemLogDb};
pub use replica_creator::ReplicaCreator;
pub use state_machine::{
    AdminMetrics, AdminResult, ApplyContext, ApplyMetrics, CompactionResult, ConfChange,
    ConfChangeKind, ConfigChangeResult, ShardStateMachine, SplitResult, UpdateMetadataResult,
};
