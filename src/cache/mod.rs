//! TTL cache with a fast memory tier and an opt-in durable tier.
//!
//! This module provides:
//! - Per-entry TTLs with `fresh` / `stale` / `expired` / `offline` status
//! - Hydration of durable entries into memory on a memory-tier miss
//! - Size-bounded eviction (expired entries first, then oldest by creation)
//! - Hit/miss accounting for the performance monitor

mod store;
mod types;

pub use store::{estimate_size, CacheStore};
pub use types::{
  CacheEntry, CacheLookup, CacheSettings, CacheStats, CacheStatus, EntrySource, SetOptions,
  MAX_TTL_SECS,
};
