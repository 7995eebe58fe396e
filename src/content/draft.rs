//! Work-in-progress drafts cached per owner and story.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use crate::store::{IndexValues, Record};

/// Which part of a story a cached draft holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftKind {
  Draft,
  Chapters,
  Episodes,
}

impl DraftKind {
  pub const ALL: [DraftKind; 3] = [DraftKind::Draft, DraftKind::Chapters, DraftKind::Episodes];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Draft => "draft",
      Self::Chapters => "chapters",
      Self::Episodes => "episodes",
    }
  }
}

impl fmt::Display for DraftKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Story-level fields being edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryDraft {
  #[serde(default)]
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub content: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub tags: Vec<String>,
}

/// One chapter or episode in a draft list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionDraft {
  /// Server id, absent until the section was first uploaded
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub content: String,
  pub order: u32,
}

/// The payload of a cached draft, one variant per [`DraftKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum DraftContent {
  Draft(StoryDraft),
  Chapters(Vec<SectionDraft>),
  Episodes(Vec<SectionDraft>),
}

impl DraftContent {
  pub fn kind(&self) -> DraftKind {
    match self {
      Self::Draft(_) => DraftKind::Draft,
      Self::Chapters(_) => DraftKind::Chapters,
      Self::Episodes(_) => DraftKind::Episodes,
    }
  }

  /// Parse an untyped payload as the given kind and validate it.
  pub fn from_value(kind: DraftKind, value: Value) -> Result<Self> {
    let content = match kind {
      DraftKind::Draft => Self::Draft(
        serde_json::from_value(value).map_err(|e| eyre!("Failed to parse story draft: {}", e))?,
      ),
      DraftKind::Chapters => Self::Chapters(
        serde_json::from_value(value).map_err(|e| eyre!("Failed to parse chapter drafts: {}", e))?,
      ),
      DraftKind::Episodes => Self::Episodes(
        serde_json::from_value(value).map_err(|e| eyre!("Failed to parse episode drafts: {}", e))?,
      ),
    };
    content.validate()?;
    Ok(content)
  }

  /// Check the payload is something worth restoring later.
  pub fn validate(&self) -> Result<()> {
    match self {
      Self::Draft(draft) => {
        if draft.title.trim().is_empty() && draft.content.trim().is_empty() {
          return Err(eyre!("Story draft has neither a title nor content"));
        }
      }
      Self::Chapters(sections) | Self::Episodes(sections) => {
        let mut orders = HashSet::new();
        for section in sections {
          if !orders.insert(section.order) {
            return Err(eyre!(
              "Duplicate position {} in {} draft",
              section.order,
              self.kind()
            ));
          }
        }
      }
    }
    Ok(())
  }
}

/// A cached draft. Unique per owner, story and kind, so repeated autosaves
/// overwrite the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftCacheEntry {
  pub owner_id: String,
  pub story_id: String,
  pub content: DraftContent,
  pub saved_at: DateTime<Utc>,
}

impl DraftCacheEntry {
  pub fn cache_key(owner_id: &str, story_id: &str, kind: DraftKind) -> String {
    format!("{}:{}:{}", owner_id, story_id, kind)
  }

  pub fn kind(&self) -> DraftKind {
    self.content.kind()
  }
}

impl Record for DraftCacheEntry {
  fn key(&self) -> String {
    Self::cache_key(&self.owner_id, &self.story_id, self.kind())
  }

  fn index_values(&self) -> IndexValues {
    IndexValues {
      owner_id: Some(self.owner_id.clone()),
      parent_id: Some(self.story_id.clone()),
      stored_at: Some(self.saved_at),
      ..IndexValues::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_tagged_serialization() {
    let content = DraftContent::Draft(StoryDraft {
      title: "Dune".to_string(),
      ..StoryDraft::default()
    });
    let value = serde_json::to_value(&content).unwrap();
    assert_eq!(value["kind"], json!("draft"));
    assert_eq!(value["data"]["title"], json!("Dune"));
  }

  #[test]
  fn test_from_value_checks_shape() {
    let chapters = DraftContent::from_value(
      DraftKind::Chapters,
      json!([{"title": "One", "order": 1}, {"title": "Two", "order": 2}]),
    )
    .unwrap();
    assert_eq!(chapters.kind(), DraftKind::Chapters);

    assert!(DraftContent::from_value(DraftKind::Chapters, json!({"title": "x"})).is_err());
    assert!(DraftContent::from_value(DraftKind::Episodes, json!([{"title": "no order"}])).is_err());
  }

  #[test]
  fn test_validation() {
    assert!(DraftContent::Draft(StoryDraft::default()).validate().is_err());
    assert!(DraftContent::Draft(StoryDraft {
      content: "Once".to_string(),
      ..StoryDraft::default()
    })
    .validate()
    .is_ok());

    let dup = vec![
      SectionDraft {
        order: 1,
        ..SectionDraft::default()
      },
      SectionDraft {
        order: 1,
        ..SectionDraft::default()
      },
    ];
    assert!(DraftContent::Episodes(dup).validate().is_err());
    assert!(DraftContent::Chapters(Vec::new()).validate().is_ok());
  }

  #[test]
  fn test_key_scopes_owner_story_and_kind() {
    assert_eq!(
      DraftCacheEntry::cache_key("u1", "s1", DraftKind::Chapters),
      "u1:s1:chapters"
    );
    assert_ne!(
      DraftCacheEntry::cache_key("u1", "s1", DraftKind::Draft),
      DraftCacheEntry::cache_key("u2", "s1", DraftKind::Draft)
    );
  }
}
