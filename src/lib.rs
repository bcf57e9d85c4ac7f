//! Client-side data layer: a TTL cache with a durable tier, an offline
//! mutation queue, a sync coordinator that replays it on reconnect, and a
//! performance monitor that tunes the cache from observed traffic.

pub mod app;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
pub mod logging;
pub mod monitor;
pub mod queue;
pub mod store;
pub mod sync;
pub mod task;

pub use app::App;
pub use cache::CacheStore;
pub use config::Config;
pub use facade::{DataAccess, QueryKey};
pub use monitor::PerformanceMonitor;
pub use queue::OfflineMutationQueue;
pub use sync::{Connectivity, SyncCoordinator};
