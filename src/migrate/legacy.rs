//! Sources of pre-migration flat key/value data.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// Flat string-keyed storage used by earlier versions of the app.
pub trait LegacyStore: Send + Sync {
  fn keys(&self) -> Result<Vec<String>>;

  fn get(&self, key: &str) -> Result<Option<String>>;

  fn remove(&self, key: &str) -> Result<()>;
}

/// Legacy entries held in memory.
#[derive(Default)]
pub struct MemoryLegacyStore {
  entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryLegacyStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Legacy store lock poisoned: {}", e))?
      .insert(key.into(), value.into());
    Ok(())
  }
}

impl LegacyStore for MemoryLegacyStore {
  fn keys(&self) -> Result<Vec<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Legacy store lock poisoned: {}", e))?;
    Ok(entries.keys().cloned().collect())
  }

  fn get(&self, key: &str) -> Result<Option<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Legacy store lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Legacy store lock poisoned: {}", e))?
      .remove(key);
    Ok(())
  }
}

/// The `kv(key, value)` table of the previous app version's database.
pub struct SqliteLegacyStore {
  conn: Mutex<Connection>,
}

impl SqliteLegacyStore {
  pub fn open(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open legacy database {}: {}", path.display(), e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Legacy database lock poisoned: {}", e))?;
    f(&conn).map_err(|e| eyre!("Legacy database query failed: {}", e))
  }

  fn has_table(&self) -> Result<bool> {
    self.with_conn(|conn| {
      conn
        .query_row(
          "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'kv'",
          [],
          |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
    })
  }
}

impl LegacyStore for SqliteLegacyStore {
  fn keys(&self) -> Result<Vec<String>> {
    // A file without the table simply has nothing to migrate
    if !self.has_table()? {
      return Ok(Vec::new());
    }
    self.with_conn(|conn| {
      let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
      let keys = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
      Ok(keys)
    })
  }

  fn get(&self, key: &str) -> Result<Option<String>> {
    if !self.has_table()? {
      return Ok(None);
    }
    self.with_conn(|conn| {
      conn
        .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
          row.get(0)
        })
        .optional()
    })
  }

  fn remove(&self, key: &str) -> Result<()> {
    if !self.has_table()? {
      return Ok(());
    }
    self.with_conn(|conn| conn.execute("DELETE FROM kv WHERE key = ?", params![key]).map(|_| ()))
  }
}
