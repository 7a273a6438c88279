//! Pilot control plane: coordinator-side plumbing
//!
//! Hosts the heartbeat response stream multiplexer: the single sink
//! through which the coordinator's planning decisions travel back to the
//! currently-authoritative leader stream of each shard.

pub mod config;
pub mod hbstream;

pub use config::PilotConfig;
pub use hbstream::{HeartbeatStream, HeartbeatStreams, MailboxStream, StreamError};
