use chrono::{DateTime, Utc};
use color_eyre::Result;

use super::record::{IndexName, IndexValue, RawRecord, StoreName};
use super::DurableStore;

/// Store used when persistence is unavailable or disabled.
/// Writes are discarded and every read misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

impl DurableStore for NoopStore {
  fn open(&self) -> Result<()> {
    Ok(())
  }

  fn is_persistent(&self) -> bool {
    false
  }

  fn schema_version(&self) -> Result<u32> {
    Ok(0)
  }

  fn get_raw(&self, _store: StoreName, _key: &str) -> Result<Option<RawRecord>> {
    Ok(None) // Always miss
  }

  fn put_raw(&self, _store: StoreName, _record: &RawRecord) -> Result<()> {
    Ok(()) // Discard
  }

  fn delete(&self, _store: StoreName, _key: &str) -> Result<bool> {
    Ok(false)
  }

  fn get_all_raw(&self, _store: StoreName) -> Result<Vec<RawRecord>> {
    Ok(Vec::new())
  }

  fn get_all_by_index_raw(
    &self,
    _store: StoreName,
    _index: IndexName,
    _value: &IndexValue,
  ) -> Result<Vec<RawRecord>> {
    Ok(Vec::new())
  }

  fn delete_by_index(&self, _store: StoreName, _index: IndexName, _value: &IndexValue) -> Result<usize> {
    Ok(0)
  }

  fn delete_by_index_upto(
    &self,
    _store: StoreName,
    _index: IndexName,
    _bound: DateTime<Utc>,
  ) -> Result<usize> {
    Ok(0)
  }

  fn count(&self, _store: StoreName) -> Result<usize> {
    Ok(0)
  }

  fn clear(&self, _store: StoreName) -> Result<usize> {
    Ok(0)
  }
}
