//! Deferred replica destruction
//!
//! A replica that applies its own removal, or is replaced by a split, must
//! not tear down Raft participation immediately: the rest of the group
//! still has to replicate the entry that decided the destruction. The
//! applier only flags the replica; this watcher polls the flag and, once
//! the entry is known replicated past a majority, persists the tombstone.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use rk_core::ShardId;

use crate::config::StoreConfig;
use crate::state_machine::ShardStateMachine;

/// Safety check supplied by the Raft driver.
pub trait DestroyCheck: Send + Sync {
    /// Whether the deciding entry at `index` has been replicated to a
    /// majority of the shard's peers.
    fn is_safe_to_destroy(&self, shard_id: ShardId, index: u64) -> anyhow::Result<bool>;
}

/// Polls a flagged state machine until destruction is safe, then persists
/// the tombstone record.
pub struct DestroyWatcher {
    sm: Arc<ShardStateMachine>,
    check: Arc<dyn DestroyCheck>,
    interval: Duration,
    max_attempts: u32,
}

impl DestroyWatcher {
    pub fn new(
        sm: Arc<ShardStateMachine>,
        check: Arc<dyn DestroyCheck>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            sm,
            check,
            interval: config.destroy.check_interval(),
            max_attempts: config.destroy.max_attempts,
        }
    }

    /// Spawn the watcher for the removal entry applied at `index`.
    /// `remove_data` carries through to the tombstone record.
    pub fn spawn(self, index: u64, remove_data: bool) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(index, remove_data).await })
    }

    async fn run(self, index: u64, remove_data: bool) {
        let shard_id = self.sm.shard_id();
        let mut ticker = tokio::time::interval(self.interval);
        let mut failures = 0u32;
        loop {
            ticker.tick().await;
            if !self.sm.is_removed() && !self.sm.is_splitted() {
                continue;
            }

            match self.check.is_safe_to_destroy(shard_id, index) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(error = %e, shard = shard_id, "destroy safety check failed");
                    continue;
                }
            }

            match self.sm.mark_destroyed(index, remove_data) {
                Ok(()) => {
                    info!(shard = shard_id, index, remove_data, "replica destroyed");
                    return;
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.max_attempts {
                        error!(
                            error = %e,
                            shard = shard_id,
                            attempts = failures,
                            "giving up persisting destroy tombstone"
                        );
                        return;
                    }
                    warn!(error = %e, shard = shard_id, "failed to persist destroy tombstone");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use rk_core::{
        AdminRequest, ConfigChangeRequest, ConfigChangeType, Replica, ReplicaRole, ReplicaState,
        RequestBatch, Shard, ShardState,
    };
    use storage::MemStorage;

    use crate::logdb::MemLogDb;
    use crate::state_machine::ApplyContext;

    struct CountingCheck {
        calls: AtomicU32,
        safe_after: u32,
    }

    impl DestroyCheck for CountingCheck {
        fn is_safe_to_destroy(&self, _shard_id: ShardId, _index: u64) -> anyhow::Result<bool> {
            let seen = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(seen >= self.safe_after)
        }
    }

    #[tokio::test]
    async fn test_destroy_waits_for_majority() {
        let storage = Arc::new(MemStorage::new());
        let shard = Shard {
            id: 1,
            replicas: vec![Replica::new(1, 1, ReplicaRole::Voter)],
            ..Default::default()
        };
        let sm = Arc::new(ShardStateMachine::new(
            shard,
            Replica::new(1, 1, ReplicaRole::Voter),
            storage.clone(),
            Arc::new(MemLogDb::new()),
        ));

        // Apply our own removal; the applier only flags it.
        let mut ctx = ApplyContext::new(
            8,
            1,
            RequestBatch::with_admin(
                1,
                AdminRequest::ConfigChange(ConfigChangeRequest {
                    replica: Replica::new(1, 1, ReplicaRole::Voter),
                    change_type: ConfigChangeType::RemoveNode,
                }),
            ),
        );
        let resp = sm.exec(&mut ctx);
        assert!(!resp.has_error());
        assert!(sm.is_removed());
        assert_eq!(sm.get_shard().state, ShardState::Running);

        let check = Arc::new(CountingCheck {
            calls: AtomicU32::new(0),
            safe_after: 3,
        });
        let config = StoreConfig::from_yaml("destroy:\n  check_interval_ms: 1\n").unwrap();
        DestroyWatcher::new(sm.clone(), check.clone(), &config)
            .spawn(8, true)
            .await
            .unwrap();

        assert!(check.calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(sm.get_shard().state, ShardState::Destroyed);
        let record = storage.latest_metadata(1).unwrap().unwrap();
        assert_eq!(record.log_index, 8);
        assert_eq!(record.metadata.state, ReplicaState::Tombstone);
        assert!(record.metadata.remove_data);
    }
}
