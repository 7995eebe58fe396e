//! Durable key-value store with named stores and secondary indices.
//!
//! This is the persistence layer every other component builds on:
//! - Versioned schema with additive-only upgrades
//! - One statement (and so one atomic transaction) per operation
//! - Graceful degradation: without persistence every read misses and
//!   every write is discarded, so callers never need to check

mod noop;
mod record;
pub mod schema;
mod sqlite;

pub use noop::NoopStore;
pub use record::{IndexName, IndexValue, IndexValues, RawRecord, Record, StoreName};
pub use sqlite::{Location, SqliteStore};

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::warn;

use crate::config::StorageConfig;

/// Trait for durable store backends.
pub trait DurableStore: Send + Sync {
  /// Open the backing database. Idempotent.
  fn open(&self) -> Result<()>;

  /// Whether writes outlive the process.
  fn is_persistent(&self) -> bool;

  /// Current schema version (0 when nothing is persisted).
  fn schema_version(&self) -> Result<u32>;

  fn get_raw(&self, store: StoreName, key: &str) -> Result<Option<RawRecord>>;

  /// Insert or overwrite by key.
  fn put_raw(&self, store: StoreName, record: &RawRecord) -> Result<()>;

  /// Remove a record. Returns whether anything was removed.
  fn delete(&self, store: StoreName, key: &str) -> Result<bool>;

  /// All records in insertion order.
  fn get_all_raw(&self, store: StoreName) -> Result<Vec<RawRecord>>;

  /// Records whose index column equals `value`, in insertion order.
  fn get_all_by_index_raw(
    &self,
    store: StoreName,
    index: IndexName,
    value: &IndexValue,
  ) -> Result<Vec<RawRecord>>;

  /// Remove every record whose index column equals `value`.
  fn delete_by_index(&self, store: StoreName, index: IndexName, value: &IndexValue) -> Result<usize>;

  /// Remove every record whose timestamp index is at or before `bound`.
  fn delete_by_index_upto(
    &self,
    store: StoreName,
    index: IndexName,
    bound: DateTime<Utc>,
  ) -> Result<usize>;

  fn count(&self, store: StoreName) -> Result<usize>;

  fn clear(&self, store: StoreName) -> Result<usize>;
}

/// Typed helpers over any [`DurableStore`].
pub trait StoreExt: DurableStore {
  fn get<T: Record>(&self, store: StoreName, key: &str) -> Result<Option<T>> {
    match self.get_raw(store, key)? {
      Some(raw) => serde_json::from_value(raw.value)
        .map(Some)
        .map_err(|e| eyre!("Failed to deserialize {} from {}: {}", key, store.table(), e)),
      None => Ok(None),
    }
  }

  fn put<T: Record>(&self, store: StoreName, record: &T) -> Result<()> {
    let value = serde_json::to_value(record)
      .map_err(|e| eyre!("Failed to serialize record for {}: {}", store.table(), e))?;
    self.put_raw(
      store,
      &RawRecord {
        key: record.key(),
        value,
        index: record.index_values(),
      },
    )
  }

  fn get_all<T: Record>(&self, store: StoreName) -> Result<Vec<T>> {
    Ok(decode_all(store, self.get_all_raw(store)?))
  }

  fn get_all_by_index<T: Record>(
    &self,
    store: StoreName,
    index: IndexName,
    value: &IndexValue,
  ) -> Result<Vec<T>> {
    Ok(decode_all(
      store,
      self.get_all_by_index_raw(store, index, value)?,
    ))
  }
}

impl<S: DurableStore + ?Sized> StoreExt for S {}

/// Deserialize records, skipping any that no longer match the type.
fn decode_all<T: Record>(store: StoreName, raws: Vec<RawRecord>) -> Vec<T> {
  raws
    .into_iter()
    .filter_map(|raw| match serde_json::from_value(raw.value) {
      Ok(record) => Some(record),
      Err(e) => {
        warn!(store = store.table(), key = %raw.key, error = %e, "Skipping undecodable record");
        None
      }
    })
    .collect()
}

/// Open the store described by `config`.
///
/// Falls back to [`NoopStore`] when storage is disabled or cannot be opened,
/// so the rest of the engine keeps working without persistence.
pub fn open_store(config: &StorageConfig) -> Arc<dyn DurableStore> {
  if !config.enabled {
    warn!("Persistent storage disabled; running without a durable store");
    return Arc::new(NoopStore);
  }

  let path = match config.path.clone().map(Ok).unwrap_or_else(SqliteStore::default_path) {
    Ok(path) => path,
    Err(e) => {
      warn!(error = %e, "No location for the durable store; running without persistence");
      return Arc::new(NoopStore);
    }
  };

  let store = SqliteStore::new(&path);
  match store.open() {
    Ok(()) => Arc::new(store),
    Err(e) => {
      warn!(path = %path.display(), error = %e, "Failed to open durable store; running without persistence");
      Arc::new(NoopStore)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_disabled_storage_degrades_to_noop() {
    let store = open_store(&StorageConfig {
      enabled: false,
      path: None,
    });
    assert!(!store.is_persistent());
    assert!(store.get_raw(StoreName::ApiCache, "k").unwrap().is_none());
  }

  #[test]
  fn test_unopenable_path_degrades_to_noop() {
    let temp_dir = TempDir::new().unwrap();
    // A directory cannot be opened as a database file
    let store = open_store(&StorageConfig {
      enabled: true,
      path: Some(temp_dir.path().to_path_buf()),
    });
    assert!(!store.is_persistent());
  }

  #[test]
  fn test_configured_path_is_used() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("engine.db");
    let store = open_store(&StorageConfig {
      enabled: true,
      path: Some(path.clone()),
    });
    assert!(store.is_persistent());
    assert!(path.exists());
  }
}
