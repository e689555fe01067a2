//! Named cache partitions and the only way to read or write them.

use color_eyre::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::storage::CacheStorage;
use super::traits::{CacheKey, Partition, PartitionNames};
use crate::net::Response;

/// Handle to an opened partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle {
  name: String,
}

/// Registry of cache partitions.
///
/// Owns the storage; strategies and the worker only go through this interface.
pub struct CacheRegistry<S: CacheStorage> {
  storage: Arc<S>,
  names: PartitionNames,
}

impl<S: CacheStorage> CacheRegistry<S> {
  pub fn new(storage: S, names: PartitionNames) -> Self {
    Self {
      storage: Arc::new(storage),
      names,
    }
  }

  pub fn names_of_current(&self) -> &PartitionNames {
    &self.names
  }

  /// Open (creating if needed) a partition by name.
  pub fn open(&self, name: &str) -> Result<CacheHandle> {
    self.storage.create_partition(name)?;
    Ok(CacheHandle {
      name: name.to_string(),
    })
  }

  /// Open one of the current partitions.
  pub fn open_partition(&self, partition: Partition) -> Result<CacheHandle> {
    self.open(self.names.name(partition))
  }

  pub fn put(&self, handle: &CacheHandle, key: &CacheKey, response: &Response) -> Result<()> {
    debug!("Caching {} in {}", key, handle.name);
    self.storage.put(&handle.name, key, response)
  }

  /// Look a key up across every partition.
  pub fn match_any(&self, key: &CacheKey) -> Result<Option<Response>> {
    Ok(self.storage.find(key)?.map(|(partition, entry)| {
      debug!("Found {} in {} (cached {})", key, partition, entry.cached_at);
      entry.response
    }))
  }

  /// Look a key up in a single partition.
  pub fn match_in(&self, partition: Partition, key: &CacheKey) -> Result<Option<Response>> {
    Ok(
      self
        .storage
        .get(self.names.name(partition), key)?
        .map(|entry| entry.response),
    )
  }

  /// All partition names, oldest first.
  pub fn names(&self) -> Result<Vec<String>> {
    self.storage.partition_names()
  }

  /// Delete a partition. Deleting a missing partition is not an error.
  pub fn delete(&self, name: &str) -> Result<bool> {
    self.storage.delete_partition(name)
  }

  /// Delete every partition not named in `keep`. Returns the deleted names.
  pub fn delete_all_except(&self, keep: &HashSet<&str>) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.partition_names()? {
      if keep.contains(name.as_str()) {
        continue;
      }
      info!("Deleting old cache: {}", name);
      self.storage.delete_partition(&name)?;
      deleted.push(name);
    }
    Ok(deleted)
  }

  /// Create a partition holding exactly these entries, or leave no trace.
  pub fn precache(&self, partition: Partition, entries: &[(CacheKey, Response)]) -> Result<()> {
    self.storage.put_all(self.names.name(partition), entries)
  }
}

impl<S: CacheStorage> Clone for CacheRegistry<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      names: self.names.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use url::Url;

  fn registry() -> CacheRegistry<SqliteStorage> {
    CacheRegistry::new(
      SqliteStorage::new(Database::open_in_memory().unwrap()),
      PartitionNames {
        static_name: "static-v2".to_string(),
        dynamic_name: "dynamic-v1".to_string(),
      },
    )
  }

  fn key(path: &str) -> CacheKey {
    CacheKey::get(&Url::parse("http://localhost").unwrap().join(path).unwrap())
  }

  #[test]
  fn test_delete_all_except_keeps_current() {
    let registry = registry();
    for name in ["static-v1", "static-v2", "dynamic-v0", "dynamic-v1", "scratch"] {
      registry.open(name).unwrap();
    }

    let keep: HashSet<&str> = ["static-v2", "dynamic-v1"].into_iter().collect();
    let deleted = registry.delete_all_except(&keep).unwrap();

    assert_eq!(deleted, vec!["static-v1", "dynamic-v0", "scratch"]);
    assert_eq!(registry.names().unwrap(), vec!["static-v2", "dynamic-v1"]);
  }

  #[test]
  fn test_match_in_is_scoped() {
    let registry = registry();
    let dynamic = registry.open_partition(Partition::Dynamic).unwrap();
    registry
      .put(&dynamic, &key("/api/jobs"), &Response::new(200, "[]"))
      .unwrap();

    assert!(registry
      .match_in(Partition::Static, &key("/api/jobs"))
      .unwrap()
      .is_none());
    assert!(registry
      .match_in(Partition::Dynamic, &key("/api/jobs"))
      .unwrap()
      .is_some());
    assert!(registry.match_any(&key("/api/jobs")).unwrap().is_some());
  }

  #[test]
  fn test_delete_is_idempotent() {
    let registry = registry();
    registry.open_partition(Partition::Static).unwrap();

    assert!(registry.delete("static-v2").unwrap());
    assert!(!registry.delete("static-v2").unwrap());
  }
}
