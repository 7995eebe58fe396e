//! TTL-governed cache of read responses.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::ttl::TtlPolicy;
use crate::clock::Clock;
use crate::store::{DurableStore, IndexName, IndexValue, IndexValues, Record, StoreExt, StoreName};
use crate::transport::RequestOptions;

/// A cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
  pub key: String,
  pub value: Value,
  pub stored_at: DateTime<Utc>,
  /// Never before `stored_at`
  pub expires_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub owner_id: Option<String>,
}

impl CacheRecord {
  /// Negative TTLs are clamped to zero.
  pub fn new(
    key: impl Into<String>,
    value: Value,
    stored_at: DateTime<Utc>,
    ttl: Duration,
    owner_id: Option<String>,
  ) -> Self {
    let ttl = ttl.max(Duration::zero());
    Self {
      key: key.into(),
      value,
      stored_at,
      expires_at: stored_at.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
      owner_id,
    }
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

impl Record for CacheRecord {
  fn key(&self) -> String {
    self.key.clone()
  }

  fn index_values(&self) -> IndexValues {
    IndexValues {
      owner_id: self.owner_id.clone(),
      expires_at: Some(self.expires_at),
      stored_at: Some(self.stored_at),
      ..IndexValues::default()
    }
  }
}

/// Build a cache key from an endpoint and its parameters.
///
/// Parameters are serialized in key order, so equivalent calls with
/// differently ordered parameters share a key.
pub fn normalize_key(endpoint: &str, params: Option<&BTreeMap<String, Value>>) -> String {
  let endpoint = endpoint.trim();
  match params.filter(|p| !p.is_empty()) {
    // serde_json objects are sorted maps, so nested values come out ordered too
    Some(params) => format!(
      "{}?{}",
      endpoint,
      serde_json::to_string(params).unwrap_or_default()
    ),
    None => endpoint.to_string(),
  }
}

/// API response cache over the durable store.
#[derive(Clone)]
pub struct ResponseCache {
  store: Arc<dyn DurableStore>,
  clock: Arc<dyn Clock>,
  policy: TtlPolicy,
}

impl ResponseCache {
  pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>, policy: TtlPolicy) -> Self {
    Self {
      store,
      clock,
      policy,
    }
  }

  pub fn policy(&self) -> &TtlPolicy {
    &self.policy
  }

  /// Cache key for a request.
  pub fn key_for(options: &RequestOptions) -> String {
    normalize_key(&options.resolved_url(), options.query.as_ref())
  }

  /// Store a value that expires `ttl` from now.
  pub fn set(&self, key: &str, value: Value, ttl: Duration, owner_id: Option<&str>) -> Result<()> {
    let record = CacheRecord::new(
      key,
      value,
      self.clock.now(),
      ttl,
      owner_id.map(String::from),
    );
    self.store.put(StoreName::ApiCache, &record)
  }

  /// Store a value with the TTL of its resource class.
  pub fn set_for_url(&self, key: &str, url: &str, value: Value, owner_id: Option<&str>) -> Result<()> {
    self.set(key, value, self.policy.ttl_for(url), owner_id)
  }

  /// The cached value, or `None` on a miss. Expired records are deleted
  /// on the way out.
  pub fn get(&self, key: &str) -> Result<Option<Value>> {
    Ok(self.get_record(key)?.map(|record| record.value))
  }

  pub fn get_record(&self, key: &str) -> Result<Option<CacheRecord>> {
    let record: Option<CacheRecord> = self.store.get(StoreName::ApiCache, key)?;
    match record {
      Some(record) if record.is_expired(self.clock.now()) => {
        debug!(key, "Evicting expired cache entry");
        self.store.delete(StoreName::ApiCache, key)?;
        Ok(None)
      }
      other => Ok(other),
    }
  }

  /// The cached record whether or not it has expired.
  pub fn get_stale(&self, key: &str) -> Result<Option<CacheRecord>> {
    self.store.get(StoreName::ApiCache, key)
  }

  pub fn invalidate(&self, key: &str) -> Result<bool> {
    self.store.delete(StoreName::ApiCache, key)
  }

  /// Drop every entry cached for `owner_id`.
  pub fn clear_for_owner(&self, owner_id: &str) -> Result<usize> {
    let removed = self.store.delete_by_index(
      StoreName::ApiCache,
      IndexName::Owner,
      &IndexValue::text(owner_id),
    )?;
    info!(owner_id, removed, "Cleared cached responses for owner");
    Ok(removed)
  }

  /// Delete every expired entry in one pass over the expiry index.
  pub fn prune_expired(&self) -> Result<usize> {
    let now = self.clock.now();
    // Expired means now >= expires_at, so the bound is inclusive
    let removed = self
      .store
      .delete_by_index_upto(StoreName::ApiCache, IndexName::ExpiresAt, now)?;
    if removed > 0 {
      info!(removed, "Pruned expired cache entries");
    }
    Ok(removed)
  }

  pub fn len(&self) -> Result<usize> {
    self.store.count(StoreName::ApiCache)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::{NoopStore, SqliteStore};
  use serde_json::json;

  fn cache_at(millis: i64) -> (ResponseCache, ManualClock) {
    let clock = ManualClock::at_millis(millis);
    let cache = ResponseCache::new(
      Arc::new(SqliteStore::in_memory()),
      Arc::new(clock.clone()),
      TtlPolicy::default(),
    );
    (cache, clock)
  }

  #[test]
  fn test_normalize_key_ignores_param_order() {
    let mut a = BTreeMap::new();
    a.insert("page".to_string(), json!(2));
    a.insert("genre".to_string(), json!("fantasy"));

    let mut b = BTreeMap::new();
    b.insert("genre".to_string(), json!("fantasy"));
    b.insert("page".to_string(), json!(2));

    assert_eq!(normalize_key("/stories", Some(&a)), normalize_key("/stories", Some(&b)));
    assert_eq!(
      normalize_key("/stories", Some(&a)),
      r#"/stories?{"genre":"fantasy","page":2}"#
    );
    assert_eq!(normalize_key("/stories", None), "/stories");
    assert_eq!(normalize_key("/stories", Some(&BTreeMap::new())), "/stories");
  }

  #[test]
  fn test_normalize_key_sorts_nested_objects() {
    let mut a = BTreeMap::new();
    a.insert("filter".to_string(), json!({"z": 1, "a": 2}));
    let mut b = BTreeMap::new();
    b.insert("filter".to_string(), json!({"a": 2, "z": 1}));
    assert_eq!(normalize_key("/s", Some(&a)), normalize_key("/s", Some(&b)));
  }

  #[test]
  fn test_ttl_boundary() {
    let (cache, clock) = cache_at(0);
    cache
      .set("/stories/42", json!({"id": 42}), Duration::milliseconds(1_000), None)
      .unwrap();

    clock.set_millis(500);
    assert_eq!(cache.get("/stories/42").unwrap(), Some(json!({"id": 42})));

    clock.set_millis(999);
    assert!(cache.get("/stories/42").unwrap().is_some());

    clock.set_millis(1_000);
    assert!(cache.get("/stories/42").unwrap().is_none());
  }

  #[test]
  fn test_expired_read_deletes_record() {
    let (cache, clock) = cache_at(0);
    cache
      .set("/stories/42", json!("v"), Duration::milliseconds(1_000), None)
      .unwrap();

    clock.set_millis(1_500);
    assert!(cache.get("/stories/42").unwrap().is_none());
    assert!(cache.get_stale("/stories/42").unwrap().is_none());
    assert_eq!(cache.len().unwrap(), 0);
  }

  #[test]
  fn test_get_stale_ignores_expiry() {
    let (cache, clock) = cache_at(0);
    cache
      .set("k", json!("old"), Duration::milliseconds(10), None)
      .unwrap();
    clock.set_millis(100);

    let stale = cache.get_stale("k").unwrap().unwrap();
    assert_eq!(stale.value, json!("old"));
    assert!(stale.is_expired(clock.now()));
  }

  #[test]
  fn test_negative_ttl_is_clamped() {
    let record = CacheRecord::new("k", json!(1), Utc::now(), Duration::seconds(-5), None);
    assert_eq!(record.expires_at, record.stored_at);
    assert!(record.is_expired(record.stored_at));
  }

  #[test]
  fn test_set_overwrites_and_refreshes_expiry() {
    let (cache, clock) = cache_at(0);
    cache.set("k", json!(1), Duration::milliseconds(100), None).unwrap();
    clock.set_millis(90);
    cache.set("k", json!(2), Duration::milliseconds(100), None).unwrap();
    clock.set_millis(150);

    assert_eq!(cache.get("k").unwrap(), Some(json!(2)));
    assert_eq!(cache.len().unwrap(), 1);
  }

  #[test]
  fn test_invalidate_and_clear_for_owner() {
    let (cache, _clock) = cache_at(0);
    let ttl = Duration::hours(1);
    cache.set("a", json!(1), ttl, Some("u1")).unwrap();
    cache.set("b", json!(2), ttl, Some("u1")).unwrap();
    cache.set("c", json!(3), ttl, Some("u2")).unwrap();
    cache.set("d", json!(4), ttl, None).unwrap();

    assert!(cache.invalidate("d").unwrap());
    assert!(!cache.invalidate("d").unwrap());

    assert_eq!(cache.clear_for_owner("u1").unwrap(), 2);
    assert!(cache.get("a").unwrap().is_none());
    assert_eq!(cache.get("c").unwrap(), Some(json!(3)));
  }

  #[test]
  fn test_prune_expired_in_one_pass() {
    let (cache, clock) = cache_at(0);
    cache.set("short", json!(1), Duration::milliseconds(100), None).unwrap();
    cache.set("exact", json!(2), Duration::milliseconds(200), None).unwrap();
    cache.set("long", json!(3), Duration::hours(1), None).unwrap();

    clock.set_millis(200);
    assert_eq!(cache.prune_expired().unwrap(), 2);
    assert_eq!(cache.len().unwrap(), 1);
    assert_eq!(cache.get("long").unwrap(), Some(json!(3)));
  }

  #[test]
  fn test_set_for_url_uses_resource_ttl() {
    let (cache, clock) = cache_at(0);
    cache
      .set_for_url("/notifications", "/notifications", json!([]), None)
      .unwrap();

    clock.advance(Duration::minutes(4));
    assert!(cache.get("/notifications").unwrap().is_some());
    clock.advance(Duration::minutes(1));
    assert!(cache.get("/notifications").unwrap().is_none());
  }

  #[test]
  fn test_without_persistence_everything_misses() {
    let cache = ResponseCache::new(
      Arc::new(NoopStore),
      Arc::new(ManualClock::at_millis(0)),
      TtlPolicy::default(),
    );
    cache.set("k", json!(1), Duration::hours(1), None).unwrap();
    assert!(cache.get("k").unwrap().is_none());
    assert_eq!(cache.prune_expired().unwrap(), 0);
  }
}
