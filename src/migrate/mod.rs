//! One-shot move of legacy flat-key drafts into the content cache.
//!
//! Legacy keys look like `draft_<storyId>`, `chapters_<storyId>` and
//! `episodes_<storyId>`; each value is a JSON blob of the form
//! `{"ownerId": "...", "data": ...}`. Every item is written through the
//! live [`ContentCache`] save path and only then removed from the legacy
//! store, so an interrupted run leaves nothing but unmigrated keys behind
//! and re-running finishes exactly those.

mod legacy;

pub use legacy::{LegacyStore, MemoryLegacyStore, SqliteLegacyStore};

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::content::{ContentCache, DraftContent, DraftKind};

const LEGACY_PREFIXES: [(&str, DraftKind); 3] = [
  ("draft_", DraftKind::Draft),
  ("chapters_", DraftKind::Chapters),
  ("episodes_", DraftKind::Episodes),
];

/// Split a legacy key into its draft kind and story id.
fn parse_key(key: &str) -> Option<(DraftKind, &str)> {
  LEGACY_PREFIXES.iter().find_map(|(prefix, kind)| {
    key
      .strip_prefix(*prefix)
      .filter(|id| !id.is_empty())
      .map(|id| (*kind, id))
  })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyBlob {
  #[serde(alias = "userId")]
  owner_id: String,
  data: Value,
}

/// Outcome of a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
  /// True when every legacy item was migrated
  pub success: bool,
  pub migrated_count: usize,
  pub errors: Vec<String>,
}

pub struct Migrator {
  legacy: Arc<dyn LegacyStore>,
  content: ContentCache,
}

impl Migrator {
  pub fn new(legacy: Arc<dyn LegacyStore>, content: ContentCache) -> Self {
    Self { legacy, content }
  }

  fn legacy_keys(&self) -> Result<Vec<String>> {
    Ok(
      self
        .legacy
        .keys()?
        .into_iter()
        .filter(|key| parse_key(key).is_some())
        .collect(),
    )
  }

  /// Whether any legacy draft keys remain.
  pub fn needs_migration(&self) -> Result<bool> {
    Ok(!self.legacy_keys()?.is_empty())
  }

  /// Move one legacy entry. Returns false when the key was gone by the
  /// time it was read.
  fn migrate_one(&self, key: &str) -> Result<bool> {
    let (kind, story_id) = parse_key(key).ok_or_else(|| eyre!("Not a legacy draft key: {}", key))?;
    let Some(raw) = self.legacy.get(key)? else {
      return Ok(false);
    };

    let blob: LegacyBlob =
      serde_json::from_str(&raw).map_err(|e| eyre!("Failed to parse legacy entry {}: {}", key, e))?;
    let content = DraftContent::from_value(kind, blob.data)?;

    self.content.save_content(&blob.owner_id, story_id, content)?;
    // Last step: a crash before this leaves the key for the next run
    self.legacy.remove(key)?;
    Ok(true)
  }

  /// Migrate every legacy item. Failures are collected per item and the
  /// failed keys stay in place for a later run.
  pub fn run(&self) -> MigrationReport {
    let keys = match self.legacy_keys() {
      Ok(keys) => keys,
      Err(e) => {
        warn!(error = %e, "Failed to list legacy keys");
        return MigrationReport {
          success: false,
          migrated_count: 0,
          errors: vec![e.to_string()],
        };
      }
    };

    let mut report = MigrationReport::default();
    for key in &keys {
      match self.migrate_one(key) {
        Ok(true) => report.migrated_count += 1,
        Ok(false) => debug!(key = %key, "Legacy entry vanished before it was read"),
        Err(e) => {
          warn!(key = %key, error = %e, "Failed to migrate legacy entry");
          report.errors.push(format!("{}: {}", key, e));
        }
      }
    }
    report.success = report.errors.is_empty();

    if !keys.is_empty() {
      info!(
        migrated = report.migrated_count,
        failed = report.errors.len(),
        "Legacy migration finished"
      );
    }
    report
  }
}
