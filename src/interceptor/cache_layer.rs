//! Read path: serve GETs from the response cache when the network can't.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, warn};

use super::{Layer, Next};
use crate::cache::ResponseCache;
use crate::connectivity::Connectivity;
use crate::transport::{Method, RequestOptions, TransportResponse};

/// Cache-then-network for GET requests.
///
/// Offline, a GET is answered from the cache or fails. Online, it goes to
/// the network and a successful body is written through with the TTL of
/// its resource class; a failed fetch falls back to whatever is cached,
/// stale or not, before the failure is surfaced.
pub struct ResponseCacheLayer {
  cache: ResponseCache,
  connectivity: Connectivity,
}

impl ResponseCacheLayer {
  pub fn new(cache: ResponseCache, connectivity: Connectivity) -> Self {
    Self {
      cache,
      connectivity,
    }
  }

  fn stale_fallback(&self, key: &str) -> Option<TransportResponse> {
    match self.cache.get_stale(key) {
      Ok(Some(record)) => {
        warn!(key, stored_at = %record.stored_at, "Network fetch failed; serving cached response");
        Some(TransportResponse::cached(record.value))
      }
      Ok(None) => None,
      Err(e) => {
        warn!(key, error = %e, "Failed to read cache fallback");
        None
      }
    }
  }
}

#[async_trait]
impl Layer for ResponseCacheLayer {
  async fn handle(&self, options: RequestOptions, next: Next<'_>) -> Result<TransportResponse> {
    if options.method != Method::Get {
      return next.run(options).await;
    }

    let key = ResponseCache::key_for(&options);

    if !self.connectivity.is_online() {
      return match self.cache.get(&key)? {
        Some(value) => {
          debug!(key = %key, "Offline; serving cached response");
          Ok(TransportResponse::cached(value))
        }
        None => Err(eyre!("Offline and no cached response for {}", key)),
      };
    }

    let url = options.resolved_url();
    let owner_id = options.owner_id.clone();

    match next.run(options).await {
      Ok(response) if response.is_success() => {
        if let Some(data) = &response.data {
          if let Err(e) = self
            .cache
            .set_for_url(&key, &url, data.clone(), owner_id.as_deref())
          {
            warn!(key = %key, error = %e, "Failed to cache response");
          }
        }
        Ok(response)
      }
      failed => self.stale_fallback(&key).map_or(failed, Ok),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::TtlPolicy;
  use crate::clock::ManualClock;
  use crate::interceptor::Pipeline;
  use crate::store::SqliteStore;
  use crate::transport::mock::MockTransport;
  use crate::transport::Transport;
  use chrono::Duration;
  use serde_json::json;
  use std::sync::Arc;

  struct Fixture {
    cache: ResponseCache,
    clock: ManualClock,
    transport: Arc<MockTransport>,
    intercepted: Arc<dyn Transport>,
  }

  fn fixture(online: bool, transport: MockTransport) -> Fixture {
    let clock = ManualClock::at_millis(0);
    let cache = ResponseCache::new(
      Arc::new(SqliteStore::in_memory()),
      Arc::new(clock.clone()),
      TtlPolicy::default(),
    );
    let connectivity = Connectivity::new(online);
    let transport = Arc::new(transport);
    let intercepted = Pipeline::new()
      .layer(ResponseCacheLayer::new(cache.clone(), connectivity))
      .wrap(transport.clone());
    Fixture {
      cache,
      clock,
      transport,
      intercepted,
    }
  }

  #[tokio::test]
  async fn test_online_get_writes_through() {
    let f = fixture(true, MockTransport::ok(json!({"id": 42})));
    let request = RequestOptions::get("/stories/{id}")
      .with_path_param("id", "42")
      .with_owner("u1");

    let response = f.intercepted.request(request.clone()).await.unwrap();
    assert_eq!(response.status_text, "OK");

    let key = ResponseCache::key_for(&request);
    assert_eq!(key, "/stories/42");
    let record = f.cache.get_record(&key).unwrap().unwrap();
    assert_eq!(record.value, json!({"id": 42}));
    assert_eq!(record.owner_id.as_deref(), Some("u1"));
    assert_eq!(record.expires_at - record.stored_at, Duration::days(14));
  }

  #[tokio::test]
  async fn test_offline_get_serves_cache_without_network() {
    let f = fixture(false, MockTransport::unreachable());
    f.cache
      .set("/users/profile", json!({"name": "ada"}), Duration::hours(1), None)
      .unwrap();

    let response = f
      .intercepted
      .request(RequestOptions::get("/users/profile"))
      .await
      .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK (cached)");
    assert_eq!(response.data, Some(json!({"name": "ada"})));
    assert_eq!(f.transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_offline_get_miss_is_error() {
    let f = fixture(false, MockTransport::unreachable());
    let result = f.intercepted.request(RequestOptions::get("/users/profile")).await;
    assert!(result.is_err());
    assert_eq!(f.transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_offline_get_ignores_expired_entry() {
    let f = fixture(false, MockTransport::unreachable());
    f.cache
      .set("/notifications", json!([]), Duration::minutes(5), None)
      .unwrap();
    f.clock.advance(Duration::minutes(5));
    assert!(f
      .intercepted
      .request(RequestOptions::get("/notifications"))
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_network_failure_falls_back_to_stale() {
    let f = fixture(true, MockTransport::unreachable());
    f.cache
      .set("/stories/1", json!("old"), Duration::milliseconds(10), None)
      .unwrap();
    f.clock.advance(Duration::seconds(1));

    let response = f
      .intercepted
      .request(RequestOptions::get("/stories/1"))
      .await
      .unwrap();
    assert_eq!(response.data, Some(json!("old")));
    assert_eq!(response.status_text, "OK (cached)");
    assert_eq!(f.transport.call_count(), 1);
  }

  #[tokio::test]
  async fn test_http_error_falls_back_then_surfaces() {
    let f = fixture(
      true,
      MockTransport::new(|_| Ok(TransportResponse::failed(503, "unavailable"))),
    );

    let response = f
      .intercepted
      .request(RequestOptions::get("/stories/1"))
      .await
      .unwrap();
    assert_eq!(response.status, 503);

    f.cache.set("/stories/1", json!("v"), Duration::hours(1), None).unwrap();
    let response = f
      .intercepted
      .request(RequestOptions::get("/stories/1"))
      .await
      .unwrap();
    assert_eq!(response.data, Some(json!("v")));
  }

  #[tokio::test]
  async fn test_mutations_pass_through() {
    let f = fixture(true, MockTransport::ok(json!({"saved": true})));
    let response = f
      .intercepted
      .request(RequestOptions::new(Method::Post, "/stories").with_body(json!({})))
      .await
      .unwrap();
    assert_eq!(response.data, Some(json!({"saved": true})));
    assert!(f.cache.is_empty().unwrap());
    assert_eq!(f.transport.call_count(), 1);
  }
}
