//! Durable local storage shared by the cache, the offline queue and the monitor.
//!
//! - `SqliteStore` persists to a single `kv_store` table
//! - `MemoryStore` keeps everything in process (tests, ephemeral hosts)
//! - `NoopStore` disables persistence entirely

mod memory;
mod sqlite;
mod traits;

pub use memory::{MemoryStore, NoopStore};
pub use sqlite::SqliteStore;
pub use traits::{KeyValueStore, StoreResult};
