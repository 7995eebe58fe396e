//! Versioned schema for the durable store.
//!
//! Upgrades are additive: a migration can only create stores and indices.
//! Existing tables are never dropped or rewritten, so user data survives
//! every upgrade.

use super::record::{IndexName, StoreName};

/// Schema version written after all migrations have been applied.
pub const SCHEMA_VERSION: u32 = 3;

/// One additive schema change.
#[derive(Debug, Clone, Copy)]
pub enum Step {
  CreateStore(StoreName),
  CreateIndex(StoreName, IndexName),
}

/// The steps that take the database to `version`.
#[derive(Debug)]
pub struct Migration {
  pub version: u32,
  pub description: &'static str,
  pub steps: &'static [Step],
}

use IndexName::*;
use Step::*;
use StoreName::*;

pub const MIGRATIONS: &[Migration] = &[
  Migration {
    version: 1,
    description: "response cache and pending mutations",
    steps: &[
      CreateStore(ApiCache),
      CreateIndex(ApiCache, Owner),
      CreateIndex(ApiCache, ExpiresAt),
      CreateStore(PendingMutations),
      CreateIndex(PendingMutations, StoredAt),
    ],
  },
  Migration {
    version: 2,
    description: "offline content mirrors and draft cache",
    steps: &[
      CreateStore(OfflineStories),
      CreateIndex(OfflineStories, Owner),
      CreateIndex(OfflineStories, StoredAt),
      CreateStore(OfflineChapters),
      CreateIndex(OfflineChapters, Owner),
      CreateIndex(OfflineChapters, Parent),
      CreateIndex(OfflineChapters, StoredAt),
      CreateStore(OfflineEpisodes),
      CreateIndex(OfflineEpisodes, Owner),
      CreateIndex(OfflineEpisodes, Parent),
      CreateIndex(OfflineEpisodes, StoredAt),
      CreateStore(DraftCache),
      CreateIndex(DraftCache, Owner),
      CreateIndex(DraftCache, Parent),
      CreateIndex(DraftCache, StoredAt),
    ],
  },
  Migration {
    version: 3,
    description: "dead letters for abandoned mutations",
    steps: &[
      CreateStore(DeadLetters),
      CreateIndex(DeadLetters, StoredAt),
      CreateIndex(ApiCache, StoredAt),
    ],
  },
];

impl Step {
  /// SQL for this step. Idempotent, so a half-applied version can be rerun.
  pub fn sql(&self) -> String {
    match self {
      CreateStore(store) => format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            owner_id TEXT,
            parent_id TEXT,
            expires_at INTEGER,
            stored_at INTEGER
        );",
        table = store.table()
      ),
      CreateIndex(store, index) => format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column});",
        table = store.table(),
        column = index.column()
      ),
    }
  }
}

impl Migration {
  /// The whole migration as one batch, bumping `user_version` at the end.
  pub fn batch_sql(&self) -> String {
    let mut sql = String::from("BEGIN;\n");
    for step in self.steps {
      sql.push_str(&step.sql());
      sql.push('\n');
    }
    sql.push_str(&format!("PRAGMA user_version = {};\nCOMMIT;", self.version));
    sql
  }
}
