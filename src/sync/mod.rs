//! Connectivity tracking and background synchronization of the offline queue.

mod connectivity;
mod coordinator;

pub use connectivity::Connectivity;
pub use coordinator::{SyncCoordinator, SyncStatus};
