//! Heartbeat response stream multiplexer
//!
//! Keeps at most one bound outbound stream per shard. When a new leader
//! stream claims a shard the binding is replaced atomically; messages sent
//! afterwards reach only the new stream. Messages are fire-and-forget
//! hints: a drop (no binding, full mailbox, closed peer) only bumps a
//! counter, because the coordinator re-proposes on the next heartbeat
//! cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use rk_core::{Shard, ShardHeartbeatRsp, ShardId};

use crate::config::PilotConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream mailbox full")]
    Full,
    #[error("stream closed")]
    Closed,
}

/// One bidirectional channel back toward a shard's leader.
///
/// Implementations must be safe for concurrent enqueue: distinct shards
/// may share a stream.
pub trait HeartbeatStream: Send + Sync {
    fn send(&self, msg: ShardHeartbeatRsp) -> Result<(), StreamError>;
}

/// Mailbox-backed stream over a bounded channel. Sending never blocks;
/// a full mailbox rejects the message instead.
pub struct MailboxStream {
    tx: mpsc::Sender<ShardHeartbeatRsp>,
}

impl MailboxStream {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<ShardHeartbeatRsp>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

impl HeartbeatStream for MailboxStream {
    fn send(&self, msg: ShardHeartbeatRsp) -> Result<(), StreamError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => StreamError::Full,
            mpsc::error::TrySendError::Closed(_) => StreamError::Closed,
        })
    }
}

/// Per-shard single-slot router for planner-to-leader messages
#[derive(Default)]
pub struct HeartbeatStreams {
    streams: Mutex<HashMap<ShardId, Arc<dyn HeartbeatStream>>>,
    msgs_dropped: AtomicU64,
}

impl HeartbeatStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `stream` as the shard's active stream, atomically replacing
    /// any prior binding. Once this returns, later sends reach only
    /// `stream`.
    pub fn bind_stream(&self, shard_id: ShardId, stream: Arc<dyn HeartbeatStream>) {
        let prev = self.streams.lock().insert(shard_id, stream);
        if prev.is_some() {
            debug!(shard = shard_id, "heartbeat stream rebound");
        }
    }

    /// Remove the shard's binding, if any.
    pub fn unbind_stream(&self, shard_id: ShardId) {
        self.streams.lock().remove(&shard_id);
    }

    /// Route `msg` to the shard's active stream. The message is cloned
    /// before enqueue so the caller may reuse its buffer. Dropped sends
    /// only bump the telemetry counter.
    pub fn send_msg(&self, shard: &Shard, msg: &ShardHeartbeatRsp) {
        let streams = self.streams.lock();
        match streams.get(&shard.id) {
            Some(stream) => {
                if let Err(e) = stream.send(msg.clone()) {
                    self.msgs_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(shard = shard.id, error = %e, "heartbeat response dropped");
                }
            }
            None => {
                self.msgs_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(shard = shard.id, "no stream bound, heartbeat response dropped");
            }
        }
    }

    /// Create a mailbox stream with the configured buffer and bind it in
    /// one step. Returns the receive side for the RPC task to drain.
    pub fn bind_mailbox(
        &self,
        shard_id: ShardId,
        config: &PilotConfig,
    ) -> mpsc::Receiver<ShardHeartbeatRsp> {
        let (stream, rx) = MailboxStream::new(config.stream_buffer);
        self.bind_stream(shard_id, Arc::new(stream));
        rx
    }

    /// Messages dropped for lack of a binding or a rejecting stream.
    pub fn msgs_dropped(&self) -> u64 {
        self.msgs_dropped.load(Ordering::Relaxed)
    }
}
