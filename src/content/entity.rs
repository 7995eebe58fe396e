//! Downloaded copies of server content kept for offline reading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{IndexValues, Record, StoreName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
  Story,
  Chapter,
  Episode,
}

impl EntityKind {
  pub const ALL: [EntityKind; 3] = [EntityKind::Story, EntityKind::Chapter, EntityKind::Episode];

  /// Each kind lives in its own store.
  pub fn store(&self) -> StoreName {
    match self {
      Self::Story => StoreName::OfflineStories,
      Self::Chapter => StoreName::OfflineChapters,
      Self::Episode => StoreName::OfflineEpisodes,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Story => "story",
      Self::Chapter => "chapter",
      Self::Episode => "episode",
    }
  }
}

/// The server's current view of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntity {
  pub id: String,
  /// Story a chapter or episode belongs to
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub content: Value,
  pub updated_at: DateTime<Utc>,
}

/// A locally mirrored story, chapter or episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineEntity {
  pub owner_id: String,
  pub entity_id: String,
  pub kind: EntityKind,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
  pub title: String,
  pub content: Value,
  /// Local time of the last download; drives expiry
  pub downloaded_at: DateTime<Utc>,
  /// Server `updated_at` of the copy held. Only ever set from the server.
  pub last_updated_at: DateTime<Utc>,
}

impl OfflineEntity {
  pub fn from_server(
    owner_id: impl Into<String>,
    kind: EntityKind,
    server: &ServerEntity,
    downloaded_at: DateTime<Utc>,
  ) -> Self {
    Self {
      owner_id: owner_id.into(),
      entity_id: server.id.clone(),
      kind,
      parent_id: server.parent_id.clone(),
      title: server.title.clone(),
      content: server.content.clone(),
      downloaded_at,
      last_updated_at: server.updated_at,
    }
  }

  pub fn cache_key(owner_id: &str, entity_id: &str) -> String {
    format!("{}:{}", owner_id, entity_id)
  }

  /// Take the server's content and timestamp.
  pub fn apply(&mut self, server: &ServerEntity, downloaded_at: DateTime<Utc>) {
    self.title = server.title.clone();
    self.content = server.content.clone();
    if server.parent_id.is_some() {
      self.parent_id = server.parent_id.clone();
    }
    self.last_updated_at = server.updated_at;
    self.downloaded_at = downloaded_at;
  }
}

impl Record for OfflineEntity {
  fn key(&self) -> String {
    Self::cache_key(&self.owner_id, &self.entity_id)
  }

  fn index_values(&self) -> IndexValues {
    IndexValues {
      owner_id: Some(self.owner_id.clone()),
      parent_id: self.parent_id.clone(),
      stored_at: Some(self.downloaded_at),
      ..IndexValues::default()
    }
  }
}
