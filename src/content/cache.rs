//! Owner-scoped content cache with server-authoritative freshness.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info};

use super::draft::{DraftCacheEntry, DraftContent, DraftKind, SectionDraft, StoryDraft};
use super::entity::{EntityKind, OfflineEntity, ServerEntity};
use crate::clock::Clock;
use crate::config::ContentConfig;
use crate::store::{DurableStore, IndexName, IndexValue, StoreExt, StoreName};

/// Which kinds of draft a story has cached and still fresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachedDataStatus {
  pub draft: bool,
  pub chapters: bool,
  pub episodes: bool,
}

impl CachedDataStatus {
  pub fn any(&self) -> bool {
    self.draft || self.chapters || self.episodes
  }
}

/// What a sync against the server did to the local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
  /// The server copy was newer and replaced the local one
  Updated,
  /// The local copy is as new as the server's
  Unchanged,
  /// Nothing cached locally to compare against
  NotCached,
}

/// Drafts and downloaded content, keyed by owner so several users can share
/// a device without seeing each other's data.
#[derive(Clone)]
pub struct ContentCache {
  store: Arc<dyn DurableStore>,
  clock: Arc<dyn Clock>,
  /// Zero disables expiry
  window: Duration,
}

impl ContentCache {
  pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>, window: Duration) -> Self {
    Self {
      store,
      clock,
      window: window.max(Duration::zero()),
    }
  }

  pub fn from_config(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>, config: &ContentConfig) -> Self {
    Self::new(store, clock, Duration::days(i64::from(config.expiry_days)))
  }

  pub fn expires(&self) -> bool {
    self.window > Duration::zero()
  }

  fn is_fresh(&self, saved_at: DateTime<Utc>) -> bool {
    !self.expires() || self.clock.now() - saved_at < self.window
  }

  // Drafts

  /// Validate and store a draft, replacing any previous one for the same
  /// owner, story and kind.
  pub fn save_content(&self, owner_id: &str, story_id: &str, content: DraftContent) -> Result<()> {
    content.validate()?;
    let entry = DraftCacheEntry {
      owner_id: owner_id.to_string(),
      story_id: story_id.to_string(),
      content,
      saved_at: self.clock.now(),
    };
    self.store.put(StoreName::DraftCache, &entry)?;
    debug!(owner_id, story_id, kind = %entry.kind(), "Saved draft");
    Ok(())
  }

  pub fn save_draft(&self, owner_id: &str, story_id: &str, draft: StoryDraft) -> Result<()> {
    self.save_content(owner_id, story_id, DraftContent::Draft(draft))
  }

  pub fn save_chapters(&self, owner_id: &str, story_id: &str, chapters: Vec<SectionDraft>) -> Result<()> {
    self.save_content(owner_id, story_id, DraftContent::Chapters(chapters))
  }

  pub fn save_episodes(&self, owner_id: &str, story_id: &str, episodes: Vec<SectionDraft>) -> Result<()> {
    self.save_content(owner_id, story_id, DraftContent::Episodes(episodes))
  }

  /// The cached draft of `kind`, unless it is missing or has aged out.
  pub fn load_content(&self, owner_id: &str, story_id: &str, kind: DraftKind) -> Result<Option<DraftCacheEntry>> {
    let key = DraftCacheEntry::cache_key(owner_id, story_id, kind);
    let entry: Option<DraftCacheEntry> = self.store.get(StoreName::DraftCache, &key)?;
    Ok(entry.filter(|e| self.is_fresh(e.saved_at)))
  }

  pub fn load_draft(&self, owner_id: &str, story_id: &str) -> Result<Option<StoryDraft>> {
    match self.load_content(owner_id, story_id, DraftKind::Draft)? {
      Some(DraftCacheEntry {
        content: DraftContent::Draft(draft),
        ..
      }) => Ok(Some(draft)),
      _ => Ok(None),
    }
  }

  pub fn load_chapters(&self, owner_id: &str, story_id: &str) -> Result<Option<Vec<SectionDraft>>> {
    match self.load_content(owner_id, story_id, DraftKind::Chapters)? {
      Some(DraftCacheEntry {
        content: DraftContent::Chapters(chapters),
        ..
      }) => Ok(Some(chapters)),
      _ => Ok(None),
    }
  }

  pub fn load_episodes(&self, owner_id: &str, story_id: &str) -> Result<Option<Vec<SectionDraft>>> {
    match self.load_content(owner_id, story_id, DraftKind::Episodes)? {
      Some(DraftCacheEntry {
        content: DraftContent::Episodes(episodes),
        ..
      }) => Ok(Some(episodes)),
      _ => Ok(None),
    }
  }

  /// Which drafts for a story could be offered for restore.
  pub fn has_cached_data(&self, story_id: &str, owner_id: &str) -> Result<CachedDataStatus> {
    let fresh = |kind| -> Result<bool> { Ok(self.load_content(owner_id, story_id, kind)?.is_some()) };
    Ok(CachedDataStatus {
      draft: fresh(DraftKind::Draft)?,
      chapters: fresh(DraftKind::Chapters)?,
      episodes: fresh(DraftKind::Episodes)?,
    })
  }

  // Offline entities

  pub fn save_entity(&self, entity: &OfflineEntity) -> Result<()> {
    self.store.put(entity.kind.store(), entity)
  }

  /// Store a fresh download of a server entity.
  pub fn save_from_server(&self, owner_id: &str, kind: EntityKind, server: &ServerEntity) -> Result<OfflineEntity> {
    let entity = OfflineEntity::from_server(owner_id, kind, server, self.clock.now());
    self.save_entity(&entity)?;
    Ok(entity)
  }

  pub fn get_entity(&self, kind: EntityKind, owner_id: &str, entity_id: &str) -> Result<Option<OfflineEntity>> {
    self
      .store
      .get(kind.store(), &OfflineEntity::cache_key(owner_id, entity_id))
  }

  pub fn list_entities(&self, owner_id: &str, kind: EntityKind) -> Result<Vec<OfflineEntity>> {
    self
      .store
      .get_all_by_index(kind.store(), IndexName::Owner, &IndexValue::text(owner_id))
  }

  /// Replace the local copy iff the server's `updated_at` is strictly newer.
  ///
  /// Only server timestamps are compared; the local clock never decides
  /// which copy wins.
  pub fn sync_if_needed(
    &self,
    kind: EntityKind,
    owner_id: &str,
    entity_id: &str,
    server: &ServerEntity,
  ) -> Result<SyncOutcome> {
    if server.id != entity_id {
      return Err(eyre!(
        "Server {} {} does not match local id {}",
        kind.as_str(),
        server.id,
        entity_id
      ));
    }

    let Some(mut local) = self.get_entity(kind, owner_id, entity_id)? else {
      return Ok(SyncOutcome::NotCached);
    };
    if server.updated_at <= local.last_updated_at {
      return Ok(SyncOutcome::Unchanged);
    }

    local.apply(server, self.clock.now());
    self.save_entity(&local)?;
    info!(
      kind = kind.as_str(),
      owner_id,
      entity_id,
      updated_at = %server.updated_at,
      "Refreshed offline copy from server"
    );
    Ok(SyncOutcome::Updated)
  }

  pub fn sync_story_if_needed(&self, owner_id: &str, story_id: &str, server: &ServerEntity) -> Result<SyncOutcome> {
    self.sync_if_needed(EntityKind::Story, owner_id, story_id, server)
  }

  pub fn sync_chapter_if_needed(&self, owner_id: &str, chapter_id: &str, server: &ServerEntity) -> Result<SyncOutcome> {
    self.sync_if_needed(EntityKind::Chapter, owner_id, chapter_id, server)
  }

  pub fn sync_episode_if_needed(&self, owner_id: &str, episode_id: &str, server: &ServerEntity) -> Result<SyncOutcome> {
    self.sync_if_needed(EntityKind::Episode, owner_id, episode_id, server)
  }

  // Housekeeping

  fn content_stores() -> impl Iterator<Item = StoreName> {
    std::iter::once(StoreName::DraftCache).chain(EntityKind::ALL.into_iter().map(|k| k.store()))
  }

  /// Delete drafts and entities saved more than the expiry window ago.
  /// Does nothing when expiry is disabled.
  pub fn sweep_expired(&self) -> Result<usize> {
    if !self.expires() {
      return Ok(0);
    }
    // A window reaching past the earliest representable time keeps everything
    let Some(cutoff) = self.clock.now().checked_sub_signed(self.window) else {
      return Ok(0);
    };
    let mut removed = 0;
    for store in Self::content_stores() {
      removed += self
        .store
        .delete_by_index_upto(store, IndexName::StoredAt, cutoff)?;
    }
    if removed > 0 {
      info!(removed, "Swept expired offline content");
    }
    Ok(removed)
  }

  /// Drop everything cached for one story of one owner: its drafts, the
  /// story itself and its chapters and episodes.
  pub fn clear_story(&self, owner_id: &str, story_id: &str) -> Result<usize> {
    let mut removed = 0;
    for kind in DraftKind::ALL {
      let key = DraftCacheEntry::cache_key(owner_id, story_id, kind);
      removed += usize::from(self.store.delete(StoreName::DraftCache, &key)?);
    }
    removed += usize::from(self.store.delete(
      StoreName::OfflineStories,
      &OfflineEntity::cache_key(owner_id, story_id),
    )?);

    let parent = IndexValue::text(story_id);
    for kind in [EntityKind::Chapter, EntityKind::Episode] {
      let children: Vec<OfflineEntity> = self
        .store
        .get_all_by_index(kind.store(), IndexName::Parent, &parent)?;
      for child in children.iter().filter(|c| c.owner_id == owner_id) {
        removed += usize::from(self.store.delete(
          kind.store(),
          &OfflineEntity::cache_key(owner_id, &child.entity_id),
        )?);
      }
    }
    info!(owner_id, story_id, removed, "Cleared cached story");
    Ok(removed)
  }

  /// Drop every draft and entity cached for an owner.
  pub fn clear_owner(&self, owner_id: &str) -> Result<usize> {
    let owner = IndexValue::text(owner_id);
    let mut removed = 0;
    for store in Self::content_stores() {
      removed += self.store.delete_by_index(store, IndexName::Owner, &owner)?;
    }
    info!(owner_id, removed, "Cleared cached content for owner");
    Ok(removed)
  }
}
