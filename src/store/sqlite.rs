//! SQLite-backed durable store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

use super::record::{IndexName, IndexValue, IndexValues, RawRecord, StoreName};
use super::schema::{Migration, MIGRATIONS};
use super::DurableStore;
use crate::clock::from_millis;

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
  File(PathBuf),
  Memory,
}

/// SQLite-based durable store.
///
/// The connection is opened lazily on first use (or by an explicit `open`)
/// and cached for the lifetime of the store. Every operation is a single
/// statement, which SQLite runs as its own transaction.
pub struct SqliteStore {
  location: Location,
  migrations: &'static [Migration],
  conn: Mutex<Option<Connection>>,
}

const COLUMNS: &str = "key, value, owner_id, parent_id, expires_at, stored_at";

impl SqliteStore {
  /// A store backed by the given file. Nothing touches disk until `open`.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self::with_migrations(Location::File(path.into()), MIGRATIONS)
  }

  /// A private in-memory database.
  pub fn in_memory() -> Self {
    Self::with_migrations(Location::Memory, MIGRATIONS)
  }

  pub(crate) fn with_migrations(location: Location, migrations: &'static [Migration]) -> Self {
    Self {
      location,
      migrations,
      conn: Mutex::new(None),
    }
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("storysync").join("store.db"))
  }

  pub fn location(&self) -> &Location {
    &self.location
  }

  fn connect(&self) -> Result<Connection> {
    let conn = match &self.location {
      Location::Memory => Connection::open_in_memory()
        .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?,
      Location::File(path) => {
        if let Some(parent) = path.parent() {
          std::fs::create_dir_all(parent)
            .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
        }
        Connection::open(path)
          .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?
      }
    };

    run_migrations(&conn, self.migrations)?;
    Ok(conn)
  }

  /// Run `f` against the connection, opening it first if needed.
  fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
    let mut guard = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if guard.is_none() {
      *guard = Some(self.connect()?);
    }

    match guard.as_ref() {
      Some(conn) => f(conn),
      None => Err(eyre!("Store connection unavailable")),
    }
  }
}

/// Apply every migration newer than the database's `user_version`.
fn run_migrations(conn: &Connection, migrations: &[Migration]) -> Result<()> {
  let current: u32 = conn
    .query_row("PRAGMA user_version", [], |row| row.get(0))
    .map_err(|e| eyre!("Failed to read schema version: {}", e))?;

  for migration in migrations.iter().filter(|m| m.version > current) {
    info!(
      version = migration.version,
      description = migration.description,
      "Upgrading store schema"
    );
    if let Err(e) = conn.execute_batch(&migration.batch_sql()) {
      let _ = conn.execute_batch("ROLLBACK;");
      return Err(eyre!(
        "Failed to apply schema version {}: {}",
        migration.version,
        e
      ));
    }
  }

  Ok(())
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<(String, String, IndexValues)> {
  let expires_at: Option<i64> = row.get(4)?;
  let stored_at: Option<i64> = row.get(5)?;
  Ok((
    row.get(0)?,
    row.get(1)?,
    IndexValues {
      owner_id: row.get(2)?,
      parent_id: row.get(3)?,
      expires_at: expires_at.map(from_millis),
      stored_at: stored_at.map(from_millis),
    },
  ))
}

fn decode(store: StoreName, raw: (String, String, IndexValues)) -> Result<RawRecord> {
  let (key, value, index) = raw;
  let value = serde_json::from_str(&value)
    .map_err(|e| eyre!("Corrupt record {} in {}: {}", key, store.table(), e))?;
  Ok(RawRecord { key, value, index })
}

fn query_records(
  conn: &Connection,
  store: StoreName,
  sql: &str,
  params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<RawRecord>> {
  let mut stmt = conn
    .prepare(sql)
    .map_err(|e| eyre!("Failed to prepare query on {}: {}", store.table(), e))?;

  let rows = stmt
    .query_map(params, row_to_record)
    .map_err(|e| eyre!("Failed to query {}: {}", store.table(), e))?;

  let mut records = Vec::new();
  for row in rows {
    let row = row.map_err(|e| eyre!("Failed to read row from {}: {}", store.table(), e))?;
    records.push(decode(store, row)?);
  }
  Ok(records)
}

impl DurableStore for SqliteStore {
  fn open(&self) -> Result<()> {
    self.with_conn(|_| Ok(()))
  }

  fn is_persistent(&self) -> bool {
    true
  }

  fn schema_version(&self) -> Result<u32> {
    self.with_conn(|conn| {
      conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| eyre!("Failed to read schema version: {}", e))
    })
  }

  fn get_raw(&self, store: StoreName, key: &str) -> Result<Option<RawRecord>> {
    self.with_conn(|conn| {
      let sql = format!("SELECT {} FROM {} WHERE key = ?", COLUMNS, store.table());
      let row = conn
        .query_row(&sql, params![key], row_to_record)
        .optional()
        .map_err(|e| eyre!("Failed to get {} from {}: {}", key, store.table(), e))?;

      row.map(|raw| decode(store, raw)).transpose()
    })
  }

  fn put_raw(&self, store: StoreName, record: &RawRecord) -> Result<()> {
    self.with_conn(|conn| {
      let value = serde_json::to_string(&record.value)
        .map_err(|e| eyre!("Failed to serialize record {}: {}", record.key, e))?;
      let sql = format!(
        "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
           value = excluded.value,
           owner_id = excluded.owner_id,
           parent_id = excluded.parent_id,
           expires_at = excluded.expires_at,
           stored_at = excluded.stored_at",
        store.table(),
        COLUMNS
      );

      conn
        .execute(
          &sql,
          params![
            record.key,
            value,
            record.index.owner_id,
            record.index.parent_id,
            record.index.expires_at.map(|t| t.timestamp_millis()),
            record.index.stored_at.map(|t| t.timestamp_millis()),
          ],
        )
        .map_err(|e| eyre!("Failed to put {} into {}: {}", record.key, store.table(), e))?;

      debug!(store = store.table(), key = %record.key, "Stored record");
      Ok(())
    })
  }

  fn delete(&self, store: StoreName, key: &str) -> Result<bool> {
    self.with_conn(|conn| {
      let sql = format!("DELETE FROM {} WHERE key = ?", store.table());
      let removed = conn
        .execute(&sql, params![key])
        .map_err(|e| eyre!("Failed to delete {} from {}: {}", key, store.table(), e))?;
      Ok(removed > 0)
    })
  }

  fn get_all_raw(&self, store: StoreName) -> Result<Vec<RawRecord>> {
    self.with_conn(|conn| {
      let sql = format!("SELECT {} FROM {} ORDER BY rowid", COLUMNS, store.table());
      query_records(conn, store, &sql, &[])
    })
  }

  fn get_all_by_index_raw(
    &self,
    store: StoreName,
    index: IndexName,
    value: &IndexValue,
  ) -> Result<Vec<RawRecord>> {
    self.with_conn(|conn| {
      let sql = format!(
        "SELECT {} FROM {} WHERE {} = ? ORDER BY rowid",
        COLUMNS,
        store.table(),
        index.column()
      );
      let value = value.to_sql();
      query_records(conn, store, &sql, &[&value])
    })
  }

  fn delete_by_index(&self, store: StoreName, index: IndexName, value: &IndexValue) -> Result<usize> {
    self.with_conn(|conn| {
      let sql = format!("DELETE FROM {} WHERE {} = ?", store.table(), index.column());
      conn
        .execute(&sql, params![value.to_sql()])
        .map_err(|e| eyre!("Failed to delete by {} in {}: {}", index.column(), store.table(), e))
    })
  }

  fn delete_by_index_upto(
    &self,
    store: StoreName,
    index: IndexName,
    bound: DateTime<Utc>,
  ) -> Result<usize> {
    self.with_conn(|conn| {
      let sql = format!(
        "DELETE FROM {table} WHERE {column} IS NOT NULL AND {column} <= ?",
        table = store.table(),
        column = index.column()
      );
      conn
        .execute(&sql, params![bound.timestamp_millis()])
        .map_err(|e| eyre!("Failed to range-delete in {}: {}", store.table(), e))
    })
  }

  fn count(&self, store: StoreName) -> Result<usize> {
    self.with_conn(|conn| {
      let sql = format!("SELECT COUNT(*) FROM {}", store.table());
      let count: i64 = conn
        .query_row(&sql, [], |row| row.get(0))
        .map_err(|e| eyre!("Failed to count {}: {}", store.table(), e))?;
      Ok(count as usize)
    })
  }

  fn clear(&self, store: StoreName) -> Result<usize> {
    self.with_conn(|conn| {
      let sql = format!("DELETE FROM {}", store.table());
      conn
        .execute(&sql, [])
        .map_err(|e| eyre!("Failed to clear {}: {}", store.table(), e))
    })
  }
}
