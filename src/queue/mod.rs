//! Offline mutation queue.
//!
//! Writes that cannot reach the remote are queued here, persisted after every
//! change, and replayed in FIFO order by the sync coordinator.

mod offline;
mod remote;
mod types;

pub use offline::{OfflineMutationQueue, QueueSettings, DEFAULT_MAX_RETRIES};
pub use remote::{HttpRemote, RemoteApply};
pub use types::{DrainReport, Mutation, MutationAction, OfflineQueueItem};
