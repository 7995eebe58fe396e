//! Drafts and downloaded stories kept on the device.
//!
//! Drafts are keyed by owner, story and kind so autosave overwrites instead
//! of piling up. Downloaded stories, chapters and episodes are refreshed only
//! when the server reports a strictly newer `updated_at`.

mod cache;
mod draft;
mod entity;

pub use cache::{CachedDataStatus, ContentCache, SyncOutcome};
pub use draft::{DraftCacheEntry, DraftContent, DraftKind, SectionDraft, StoryDraft};
pub use entity::{EntityKind, OfflineEntity, ServerEntity};
