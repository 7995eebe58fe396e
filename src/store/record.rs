//! Store names, index declarations and the typed record trait.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Named object stores in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreName {
  ApiCache,
  PendingMutations,
  DeadLetters,
  OfflineStories,
  OfflineChapters,
  OfflineEpisodes,
  DraftCache,
}

impl StoreName {
  pub const ALL: [StoreName; 7] = [
    StoreName::ApiCache,
    StoreName::PendingMutations,
    StoreName::DeadLetters,
    StoreName::OfflineStories,
    StoreName::OfflineChapters,
    StoreName::OfflineEpisodes,
    StoreName::DraftCache,
  ];

  /// Table backing this store.
  pub fn table(&self) -> &'static str {
    match self {
      Self::ApiCache => "api_cache",
      Self::PendingMutations => "pending_mutations",
      Self::DeadLetters => "dead_letters",
      Self::OfflineStories => "offline_stories",
      Self::OfflineChapters => "offline_chapters",
      Self::OfflineEpisodes => "offline_episodes",
      Self::DraftCache => "draft_cache",
    }
  }
}

/// Secondary indices. Every store carries the columns; which ones are
/// indexed is declared per schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexName {
  /// Owning user
  Owner,
  /// Parent entity (story id for drafts, chapters and episodes)
  Parent,
  /// Expiry timestamp
  ExpiresAt,
  /// Creation / last save timestamp
  StoredAt,
}

impl IndexName {
  pub fn column(&self) -> &'static str {
    match self {
      Self::Owner => "owner_id",
      Self::Parent => "parent_id",
      Self::ExpiresAt => "expires_at",
      Self::StoredAt => "stored_at",
    }
  }
}

/// A value to look up in an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
  Text(String),
  Timestamp(DateTime<Utc>),
}

impl IndexValue {
  pub fn text(value: impl Into<String>) -> Self {
    Self::Text(value.into())
  }

  pub(crate) fn to_sql(&self) -> rusqlite::types::Value {
    match self {
      Self::Text(s) => rusqlite::types::Value::Text(s.clone()),
      Self::Timestamp(ts) => rusqlite::types::Value::Integer(ts.timestamp_millis()),
    }
  }
}

/// Index column values extracted from a record when it is written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexValues {
  pub owner_id: Option<String>,
  pub parent_id: Option<String>,
  pub expires_at: Option<DateTime<Utc>>,
  pub stored_at: Option<DateTime<Utc>>,
}

/// A record as stored: primary key, JSON body, index columns.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
  pub key: String,
  pub value: serde_json::Value,
  pub index: IndexValues,
}

/// Trait for values that can be persisted in a store.
///
/// Implementors provide their primary key and the values of the secondary
/// index columns. The body is serialized as JSON.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
  /// Primary key, unique within a store.
  fn key(&self) -> String;

  /// Values for the secondary index columns.
  fn index_values(&self) -> IndexValues {
    IndexValues::default()
  }
}
