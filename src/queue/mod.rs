//! Offline write queue.
//!
//! Writes that cannot reach the server are persisted here and replayed in
//! order once connectivity returns.

mod action;
mod offline;
mod storage;

pub use action::{ActionKind, Mutation, QueueSnapshot, QueuedAction, Target};
pub use offline::{DrainReport, FailedAction, OfflineQueue, DEFAULT_MAX_ATTEMPTS};
pub use storage::{MemoryQueueStorage, QueueStorage, SqliteQueueStorage};
