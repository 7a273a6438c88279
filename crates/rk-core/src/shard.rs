//! Shard metadata model
//!
//! Defines the durable and in-memory representation of a shard: key range,
//! membership epoch, replica set, labels and lifecycle state.

use serde::{Deserialize, Serialize};

/// Shard ID type
pub type ShardId = u64;
/// Replica ID type
pub type ReplicaId = u64;
/// Container (storage node) ID type
pub type ContainerId = u64;

/// Membership epoch of a shard.
///
/// `conf_ver` bumps on every membership change; `version` advances by the
/// number of children when the shard splits, so all siblings share the
/// post-split version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub conf_ver: u64,
    pub version: u64,
}

impl Epoch {
    pub fn new(conf_ver: u64, version: u64) -> Self {
        Self { conf_ver, version }
    }

    /// True when this epoch is behind `current` in any component.
    ///
    /// Epochs are monotone: an update carrying a stale epoch in a committed
    /// log entry indicates state divergence.
    pub fn is_stale(&self, current: &Epoch) -> bool {
        self.version < current.version || self.conf_ver < current.conf_ver
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.conf_ver, self.version)
    }
}

/// Role of a replica inside its shard's Raft group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaRole {
    #[default]
    Voter,
    Learner,
}

impl std::fmt::Display for ReplicaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaRole::Voter => write!(f, "voter"),
            ReplicaRole::Learner => write!(f, "learner"),
        }
    }
}

/// One participant in a shard's Raft group, resident on a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub id: ReplicaId,
    pub container_id: ContainerId,
    pub role: ReplicaRole,
}

impl Replica {
    pub fn new(id: ReplicaId, container_id: ContainerId, role: ReplicaRole) -> Self {
        Self {
            id,
            container_id,
            role,
        }
    }
}

impl std::fmt::Display for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}({})", self.id, self.container_id, self.role)
    }
}

/// Shard lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardState {
    /// Serving reads and writes
    #[default]
    Running,
    /// Replaced by a split or removed; destruction pending
    Destroying,
    /// Fully destroyed
    Destroyed,
}

impl std::fmt::Display for ShardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardState::Running => write!(f, "running"),
            ShardState::Destroying => write!(f, "destroying"),
            ShardState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Durable state of the local replica
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaState {
    #[default]
    Normal,
    Tombstone,
    Splitting,
}

impl std::fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaState::Normal => write!(f, "normal"),
            ReplicaState::Tombstone => write!(f, "tombstone"),
            ReplicaState::Splitting => write!(f, "splitting"),
        }
    }
}

/// Label key/value pair attached to a shard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub key: String,
    pub value: String,
}

impl Pair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A contiguous key-range Raft group.
///
/// `start`/`end` form the half-open byte range `[start, end)`; an empty
/// `end` means +infinity. `group`, `unique`, `rule_groups` and
/// `disable_split` are placement-policy attributes, immutable for the
/// lifetime of the shard and copied verbatim to children on split.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shard {
    pub id: ShardId,
    pub group: u64,
    pub unique: String,
    pub rule_groups: Vec<String>,
    pub disable_split: bool,
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub epoch: Epoch,
    pub replicas: Vec<Replica>,
    pub labels: Vec<Pair>,
    pub state: ShardState,
}

impl Shard {
    /// Whether `key` falls inside the shard's half-open range.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice() && (self.end.is_empty() || key < self.end.as_slice())
    }

    /// At most one replica lives on any given container.
    pub fn find_replica(&self, container_id: ContainerId) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.container_id == container_id)
    }

    pub fn find_replica_mut(&mut self, container_id: ContainerId) -> Option<&mut Replica> {
        self.replicas
            .iter_mut()
            .find(|r| r.container_id == container_id)
    }

    pub fn remove_replica(&mut self, container_id: ContainerId) {
        self.replicas.retain(|r| r.container_id != container_id);
    }

    /// Sort labels by key. Label order must be deterministic so replicas
    /// applying the same log compare equal.
    pub fn sort_labels(&mut self) {
        self.labels.sort_by(|a, b| a.key.cmp(&b.key));
    }
}

/// The durable record of one replica's view of its shard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardLocalState {
    pub shard: Shard,
    pub state: ReplicaState,
    pub remove_data: bool,
}

/// Persistence envelope for a shard metadata snapshot.
///
/// `log_index` is the Raft index at which this snapshot becomes
/// authoritative; replay after crash reads back the record whose
/// `log_index` is highest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardMetadata {
    pub shard_id: ShardId,
    pub log_index: u64,
    pub metadata: ShardLocalState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_key_half_open() {
        let shard = Shard {
            start: b"a".to_vec(),
            end: b"m".to_vec(),
            ..Default::default()
        };
        assert!(shard.contains_key(b"a"));
        assert!(shard.contains_key(b"lzz"));
        assert!(!shard.contains_key(b"m"));
        assert!(!shard.contains_key(b"0"));
    }

    #[test]
    fn test_contains_key_unbounded_end() {
        let shard = Shard {
            start: b"a".to_vec(),
            end: Vec::new(),
            ..Default::default()
        };
        assert!(shard.contains_key(b"zzzz"));
        assert!(!shard.contains_key(b"0"));
    }

    #[test]
    fn test_epoch_staleness() {
        let current = Epoch::new(3, 5);
        assert!(Epoch::new(2, 5).is_stale(&current));
        assert!(Epoch::new(3, 4).is_stale(&current));
        assert!(Epoch::new(2, 6).is_stale(&current));
        assert!(!Epoch::new(3, 5).is_stale(&current));
        assert!(!Epoch::new(4, 6).is_stale(&current));
    }

    #[test]
    fn test_find_and_remove_replica() {
        let mut shard = Shard {
            replicas: vec![
                Replica::new(1, 1, ReplicaRole::Voter),
                Replica::new(2, 2, ReplicaRole::Learner),
            ],
            ..Default::default()
        };
        assert_eq!(shard.find_replica(2).map(|r| r.id), Some(2));
        assert!(shard.find_replica(3).is_none());
        shard.remove_replica(1);
        assert_eq!(shard.replicas.len(), 1);
        assert_eq!(shard.replicas[0].id, 2);
    }

    #[test]
    fn test_sort_labels() {
        let mut shard = Shard {
            labels: vec![Pair::new("zone", "z1"), Pair::new("host", "h1")],
            ..Default::default()
        };
        shard.sort_labels();
        assert_eq!(shard.labels[0].key, "host");
        assert_eq!(shard.labels[1].key, "zone");
    }
}
