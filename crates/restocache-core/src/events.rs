//! Notifications published by the write queue.
//!
//! The UI subscribes to show the transient offline banner when a write is
//! queued and to refresh once queued writes reach the server.

/// Buffer size for the event channel.
/// Slow subscribers lose the oldest events rather than blocking writers.
pub const EVENT_BUFFER_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A write failed to reach the server and was saved for replay.
    Queued { queue_key: i64, description: String },
    /// A queued write was acknowledged by the server.
    Replayed { queue_key: i64, description: String },
    /// Replay stopped at this entry; it and everything after it remain.
    DrainHalted { queue_key: i64, error: String },
}
