//! In-memory storage backend
//!
//! Single-lock implementation of `DataStorage`. Metadata records are kept
//! bincode-encoded per `(shard_id, log_index)`; reads surface the record
//! with the highest `log_index`, matching what a durable backend exposes
//! after replay.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::debug;

use rk_core::{ShardId, ShardLocalState, ShardMetadata, ShardState, WriteCommand};

use crate::traits::{DataStorage, StorageError, StorageResult, WriteContext};

#[derive(Default)]
struct MemStorageInner {
    kv: BTreeMap<Vec<u8>, Vec<u8>>,
    /// shard id -> log index -> encoded ShardLocalState
    metadata: HashMap<ShardId, BTreeMap<u64, Vec<u8>>>,
    persistent_indexes: HashMap<ShardId, u64>,
}

/// In-memory `DataStorage` backend
#[derive(Default)]
pub struct MemStorage {
    inner: Mutex<MemStorageInner>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the durable-data watermark for a shard. A real backend
    /// derives this from its flush pipeline; here the driver (or a test)
    /// sets it explicitly.
    pub fn set_persistent_log_index(&self, shard_id: ShardId, index: u64) {
        self.inner.lock().persistent_indexes.insert(shard_id, index);
    }

    /// The metadata record with the highest `log_index` for `shard_id`.
    pub fn latest_metadata(&self, shard_id: ShardId) -> StorageResult<Option<ShardMetadata>> {
        let inner = self.inner.lock();
        let Some(records) = inner.metadata.get(&shard_id) else {
            return Ok(None);
        };
        let Some((log_index, encoded)) = records.iter().next_back() else {
            return Ok(None);
        };
        let metadata = decode_state(encoded)?;
        Ok(Some(ShardMetadata {
            shard_id,
            log_index: *log_index,
            metadata,
        }))
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.lock().kv.get(key).cloned()
    }
}

fn encode_state(state: &ShardLocalState) -> StorageResult<Vec<u8>> {
    bincode::serde::encode_to_vec(state, bincode::config::standard())
        .map_err(|e| StorageError::Internal(e.to_string()))
}

fn decode_state(encoded: &[u8]) -> StorageResult<ShardLocalState> {
    bincode::serde::decode_from_slice(encoded, bincode::config::standard())
        .map(|(state, _)| state)
        .map_err(|e| StorageError::Corrupted(e.to_string()))
}

impl MemStorageInner {
    fn insert_metadata(&mut self, record: &ShardMetadata) -> StorageResult<()> {
        let encoded = encode_state(&record.metadata)?;
        self.metadata
            .entry(record.shard_id)
            .or_default()
            .insert(record.log_index, encoded);
        Ok(())
    }
}

impl DataStorage for MemStorage {
    fn persistent_log_index(&self, shard_id: ShardId) -> StorageResult<u64> {
        Ok(self
            .inner
            .lock()
            .persistent_indexes
            .get(&shard_id)
            .copied()
            .unwrap_or(0))
    }

    fn save_shard_metadata(&self, metadata: Vec<ShardMetadata>) -> StorageResult<()> {
        // Encode everything before touching the maps so the batch is
        // all-or-nothing.
        let mut encoded = Vec::with_capacity(metadata.len());
        for record in &metadata {
            encoded.push((record.shard_id, record.log_index, encode_state(&record.metadata)?));
        }
        let mut inner = self.inner.lock();
        for (shard_id, log_index, bytes) in encoded {
            inner
                .metadata
                .entry(shard_id)
                .or_default()
                .insert(log_index, bytes);
        }
        Ok(())
    }

    fn split(
        &self,
        old: ShardMetadata,
        new: Vec<ShardMetadata>,
        _context: &[u8],
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock();

        // A child that already has a metadata record, or a parent already
        // recorded as destroying, means this split group was absorbed
        // through another path.
        for child in &new {
            if inner.metadata.contains_key(&child.shard_id) {
                debug!(shard = child.shard_id, "split already absorbed");
                return Err(StorageError::Aborted);
            }
        }
        if let Some(records) = inner.metadata.get(&old.shard_id) {
            if let Some((_, encoded)) = records.iter().next_back() {
                if decode_state(encoded)?.shard.state == ShardState::Destroying {
                    debug!(shard = old.shard_id, "parent already destroying");
                    return Err(StorageError::Aborted);
                }
            }
        }

        inner.insert_metadata(&old)?;
        for child in &new {
            inner.insert_metadata(child)?;
        }
        Ok(())
    }

    fn write(&self, ctx: &mut WriteContext) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        for req in &ctx.requests {
            match &req.cmd {
                WriteCommand::Put { key, value } => {
                    let new_len = (key.len() + value.len()) as i64;
                    let old_len = inner
                        .kv
                        .get(key)
                        .map(|v| (key.len() + v.len()) as i64)
                        .unwrap_or(0);
                    inner.kv.insert(key.clone(), value.clone());
                    ctx.written_bytes += new_len as u64;
                    ctx.diff_bytes += new_len - old_len;
                    ctx.responses.push(Vec::new());
                }
                WriteCommand::Delete { key } => {
                    let old_len = inner
                        .kv
                        .remove(key)
                        .map(|v| (key.len() + v.len()) as i64)
                        .unwrap_or(0);
                    ctx.diff_bytes -= old_len;
                    ctx.responses.push(Vec::new());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rk_core::{Request, Shard};

    fn record(shard_id: ShardId, log_index: u64, conf_ver: u64) -> ShardMetadata {
        let mut metadata = ShardLocalState::default();
        metadata.shard.id = shard_id;
        metadata.shard.epoch.conf_ver = conf_ver;
        ShardMetadata {
            shard_id,
            log_index,
            metadata,
        }
    }

    #[test]
    fn test_latest_metadata_wins() {
        let s = MemStorage::new();
        s.save_shard_metadata(vec![record(1, 5, 1), record(1, 9, 3), record(1, 7, 2)])
            .unwrap();
        let latest = s.latest_metadata(1).unwrap().unwrap();
        assert_eq!(latest.log_index, 9);
        assert_eq!(latest.metadata.shard.epoch.conf_ver, 3);
        assert!(s.latest_metadata(2).unwrap().is_none());
    }

    #[test]
    fn test_split_atomic_and_aborted() {
        let s = MemStorage::new();
        let mut old = record(1, 10, 1);
        old.metadata.shard.state = ShardState::Destroying;
        let children = vec![record(2, 1, 1), record(3, 1, 1)];

        s.split(old.clone(), children.clone(), b"ctx").unwrap();
        assert_eq!(s.latest_metadata(1).unwrap().unwrap().log_index, 10);
        assert_eq!(s.latest_metadata(2).unwrap().unwrap().log_index, 1);
        assert_eq!(s.latest_metadata(3).unwrap().unwrap().log_index, 1);

        // Replaying the same split is a no-op.
        assert_eq!(
            s.split(old, children, b"ctx"),
            Err(StorageError::Aborted)
        );
    }

    #[test]
    fn test_write_accounting() {
        let s = MemStorage::new();
        let mut ctx = WriteContext::new();
        ctx.initialize(
            Shard::default(),
            1,
            &[
                Request {
                    id: vec![1],
                    cmd: WriteCommand::Put {
                        key: b"k1".to_vec(),
                        value: b"hello".to_vec(),
                    },
                },
                Request {
                    id: vec![2],
                    cmd: WriteCommand::Delete {
                        key: b"k1".to_vec(),
                    },
                },
            ],
        );
        s.write(&mut ctx).unwrap();
        assert_eq!(ctx.responses.len(), 2);
        assert_eq!(ctx.written_bytes, 7);
        // Put adds 7, delete removes the same 7.
        assert_eq!(ctx.diff_bytes, 0);
        assert!(s.get(b"k1").is_none());
    }

    #[test]
    fn test_persistent_log_index_defaults_to_zero() {
        let s = MemStorage::new();
        assert_eq!(s.persistent_log_index(42).unwrap(), 0);
        s.set_persistent_log_index(42, 17);
        assert_eq!(s.persistent_log_index(42).unwrap(), 17);
    }
}
