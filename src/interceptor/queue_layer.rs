//! Write path: capture mutations issued while offline.

use async_trait::async_trait;
use color_eyre::Result;

use super::{Layer, Next};
use crate::connectivity::Connectivity;
use crate::queue::{MutationPayload, MutationQueue, MutationType};
use crate::transport::{RequestOptions, TransportResponse};

/// Queues mutating requests while offline and answers them with a 202.
///
/// Replays from the sync processor carry `replay_bypass` and always go
/// through, as does everything while online.
pub struct OfflineQueueLayer {
  queue: MutationQueue,
  connectivity: Connectivity,
}

impl OfflineQueueLayer {
  pub fn new(queue: MutationQueue, connectivity: Connectivity) -> Self {
    Self {
      queue,
      connectivity,
    }
  }
}

#[async_trait]
impl Layer for OfflineQueueLayer {
  async fn handle(&self, options: RequestOptions, next: Next<'_>) -> Result<TransportResponse> {
    if !options.method.is_mutating() || options.replay_bypass || self.connectivity.is_online() {
      return next.run(options).await;
    }

    let mutation_type = MutationType::classify(&options.resolved_url());
    let id = self
      .queue
      .enqueue(mutation_type, MutationPayload::from(&options))?;
    Ok(TransportResponse::queued(id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ResponseCache, TtlPolicy};
  use crate::clock::ManualClock;
  use crate::interceptor::Pipeline;
  use crate::store::SqliteStore;
  use crate::transport::mock::MockTransport;
  use crate::transport::{Method, Transport};
  use serde_json::json;
  use std::sync::Arc;

  fn intercepted(online: bool) -> (Arc<dyn Transport>, Arc<MockTransport>, MutationQueue) {
    let clock = Arc::new(ManualClock::at_millis(0));
    let store = Arc::new(SqliteStore::in_memory());
    let cache = ResponseCache::new(store.clone(), clock.clone(), TtlPolicy::default());
    let queue = MutationQueue::new(store, clock);
    let transport = Arc::new(MockTransport::ok(json!({"saved": true})));
    let intercepted = Pipeline::offline_first(cache, queue.clone(), Connectivity::new(online))
      .wrap(transport.clone());
    (intercepted, transport, queue)
  }

  #[tokio::test]
  async fn test_offline_mutation_is_queued() {
    let (intercepted, transport, queue) = intercepted(false);

    let response = intercepted
      .request(RequestOptions::new(Method::Patch, "/users/profile").with_body(json!({"bio": "hi"})))
      .await
      .unwrap();

    assert_eq!(response.status, 202);
    assert_eq!(response.status_text, "Accepted (queued)");
    assert!(response.is_queued());
    assert_eq!(transport.call_count(), 0);

    let queued = queue.list().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].mutation_type, MutationType::ProfileUpdate);
    assert_eq!(queued[0].payload.body, Some(json!({"bio": "hi"})));
    assert_eq!(
      response.data.unwrap()["mutationId"],
      json!(queued[0].id.to_string())
    );
  }

  #[tokio::test]
  async fn test_path_params_kept_for_replay() {
    let (intercepted, _transport, queue) = intercepted(false);
    intercepted
      .request(
        RequestOptions::new(Method::Put, "/stories/{id}/chapters")
          .with_path_param("id", "42")
          .with_body(json!([])),
      )
      .await
      .unwrap();

    let queued = &queue.list().unwrap()[0];
    assert_eq!(queued.mutation_type, MutationType::DraftUpload);
    assert_eq!(queued.payload.to_replay_request().resolved_url(), "/stories/42/chapters");
  }

  #[tokio::test]
  async fn test_online_mutation_passes_through() {
    let (intercepted, transport, queue) = intercepted(true);
    let response = intercepted
      .request(RequestOptions::new(Method::Delete, "/follows/7"))
      .await
      .unwrap();
    assert_eq!(response.data, Some(json!({"saved": true})));
    assert_eq!(transport.call_count(), 1);
    assert!(queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_replay_bypasses_queue_while_offline() {
    let (intercepted, transport, queue) = intercepted(false);
    let replay = MutationPayload::new(Method::Post, "/stories").to_replay_request();

    let response = intercepted.request(replay).await.unwrap();
    assert!(!response.is_queued());
    assert_eq!(transport.call_count(), 1);
    assert!(queue.is_empty().unwrap());
  }
}
