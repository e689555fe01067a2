//! Versioned cache partitions and the strategies that fill them.
//!
//! This module provides:
//! - A registry of named partitions (static precache, dynamic runtime)
//! - SQLite-backed storage with one entry per (partition, request key)
//! - Cache-first with stale-while-revalidate, and network-first with offline fallbacks

mod layer;
mod registry;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use registry::CacheRegistry;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheKey, Partition, PartitionNames, ResponseSource, Served};
