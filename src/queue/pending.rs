//! Durable FIFO of deferred writes.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::mutation::{DeadLetter, MutationPayload, MutationType, PendingMutation};
use crate::clock::Clock;
use crate::store::{DurableStore, StoreExt, StoreName};

/// Persistent queue of mutations waiting for connectivity.
#[derive(Clone)]
pub struct MutationQueue {
  store: Arc<dyn DurableStore>,
  clock: Arc<dyn Clock>,
}

impl MutationQueue {
  pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
    Self { store, clock }
  }

  /// Persist a new mutation and return its id.
  pub fn enqueue(&self, mutation_type: MutationType, payload: MutationPayload) -> Result<Uuid> {
    let mutation = PendingMutation::new(mutation_type, payload, self.clock.now());
    self.store.put(StoreName::PendingMutations, &mutation)?;
    info!(
      id = %mutation.id,
      kind = mutation_type.as_str(),
      method = %mutation.payload.method,
      url = %mutation.payload.url,
      "Queued mutation"
    );
    Ok(mutation.id)
  }

  pub fn get(&self, id: Uuid) -> Result<Option<PendingMutation>> {
    self.store.get(StoreName::PendingMutations, &id.to_string())
  }

  /// Everything queued, oldest first.
  pub fn list(&self) -> Result<Vec<PendingMutation>> {
    self.store.get_all(StoreName::PendingMutations)
  }

  pub fn len(&self) -> Result<usize> {
    self.store.count(StoreName::PendingMutations)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Remove a mutation once the server confirmed it.
  pub fn dequeue(&self, id: Uuid) -> Result<bool> {
    self.store.delete(StoreName::PendingMutations, &id.to_string())
  }

  /// Record a failed replay. The mutation stays queued in place.
  pub fn increment_retry(
    &self,
    id: Uuid,
    error: &str,
    next_attempt_at: Option<DateTime<Utc>>,
  ) -> Result<Option<PendingMutation>> {
    let Some(mut mutation) = self.get(id)? else {
      warn!(%id, "Retry recorded for a mutation that is no longer queued");
      return Ok(None);
    };

    mutation.retry_count += 1;
    mutation.last_error = Some(error.to_string());
    mutation.next_attempt_at = next_attempt_at;
    self.store.put(StoreName::PendingMutations, &mutation)?;
    Ok(Some(mutation))
  }

  /// Move a mutation out of the queue into the dead letters.
  pub fn dead_letter(&self, mutation: PendingMutation, error: &str) -> Result<()> {
    let id = mutation.id;
    let letter = DeadLetter {
      mutation,
      failed_at: self.clock.now(),
      last_error: error.to_string(),
    };
    // Written before the queue entry is removed, so a crash in between
    // leaves the mutation in both places rather than neither
    self.store.put(StoreName::DeadLetters, &letter)?;
    self.dequeue(id)?;
    warn!(%id, retries = letter.mutation.retry_count, error, "Mutation dead-lettered");
    Ok(())
  }

  pub fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
    self.store.get_all(StoreName::DeadLetters)
  }

  /// Put a dead-lettered mutation back at the end of the queue with a
  /// fresh retry budget.
  pub fn requeue_dead_letter(&self, id: Uuid) -> Result<bool> {
    let Some(letter) = self
      .store
      .get::<DeadLetter>(StoreName::DeadLetters, &id.to_string())?
    else {
      return Ok(false);
    };

    let mut mutation = letter.mutation;
    mutation.retry_count = 0;
    mutation.last_error = None;
    mutation.next_attempt_at = None;
    self.store.put(StoreName::PendingMutations, &mutation)?;
    self.store.delete(StoreName::DeadLetters, &id.to_string())?;
    info!(%id, "Requeued dead-lettered mutation");
    Ok(true)
  }

  pub fn discard_dead_letter(&self, id: Uuid) -> Result<bool> {
    self.store.delete(StoreName::DeadLetters, &id.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::SqliteStore;
  use crate::transport::Method;
  use serde_json::json;

  fn queue() -> (MutationQueue, ManualClock) {
    let clock = ManualClock::at_millis(0);
    (
      MutationQueue::new(Arc::new(SqliteStore::in_memory()), Arc::new(clock.clone())),
      clock,
    )
  }

  fn payload(url: &str) -> MutationPayload {
    MutationPayload::new(Method::Post, url).with_body(json!({"n": url}))
  }

  #[test]
  fn test_enqueue_assigns_fresh_state() {
    let (queue, clock) = queue();
    clock.set_millis(1_234);
    let id = queue
      .enqueue(MutationType::ProfileUpdate, payload("/users/profile"))
      .unwrap();

    let stored = queue.get(id).unwrap().unwrap();
    assert_eq!(stored.id, id);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.created_at.timestamp_millis(), 1_234);
    assert_eq!(queue.len().unwrap(), 1);
  }

  #[test]
  fn test_list_keeps_insertion_order() {
    let (queue, _clock) = queue();
    let a = queue.enqueue(MutationType::Other, payload("/a")).unwrap();
    let b = queue.enqueue(MutationType::Other, payload("/b")).unwrap();
    let c = queue.enqueue(MutationType::Other, payload("/c")).unwrap();

    // A retry rewrites the record but must not move it
    queue.increment_retry(a, "boom", None).unwrap();

    let ids: Vec<Uuid> = queue.list().unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![a, b, c]);
  }

  #[test]
  fn test_increment_retry_and_dequeue() {
    let (queue, _clock) = queue();
    let id = queue.enqueue(MutationType::Other, payload("/a")).unwrap();

    let updated = queue.increment_retry(id, "timeout", None).unwrap().unwrap();
    assert_eq!(updated.retry_count, 1);
    assert_eq!(updated.last_error.as_deref(), Some("timeout"));
    let updated = queue.increment_retry(id, "timeout", None).unwrap().unwrap();
    assert_eq!(updated.retry_count, 2);

    assert!(queue.dequeue(id).unwrap());
    assert!(queue.is_empty().unwrap());
    assert!(queue.increment_retry(id, "late", None).unwrap().is_none());
  }

  #[test]
  fn test_dead_letter_round_trip() {
    let (queue, _clock) = queue();
    let a = queue.enqueue(MutationType::Other, payload("/a")).unwrap();
    let b = queue.enqueue(MutationType::Other, payload("/b")).unwrap();
    queue.increment_retry(a, "gone", None).unwrap();

    let mutation = queue.get(a).unwrap().unwrap();
    queue.dead_letter(mutation, "gone").unwrap();
    assert_eq!(queue.len().unwrap(), 1);
    let letters = queue.dead_letters().unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].mutation.id, a);
    assert_eq!(letters[0].last_error, "gone");

    assert!(queue.requeue_dead_letter(a).unwrap());
    assert!(queue.dead_letters().unwrap().is_empty());
    let ids: Vec<Uuid> = queue.list().unwrap().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![b, a]);
    assert_eq!(queue.get(a).unwrap().unwrap().retry_count, 0);

    assert!(!queue.requeue_dead_letter(a).unwrap());
  }

  #[test]
  fn test_discard_dead_letter() {
    let (queue, _clock) = queue();
    let id = queue.enqueue(MutationType::Other, payload("/a")).unwrap();
    let mutation = queue.get(id).unwrap().unwrap();
    queue.dead_letter(mutation, "bad request").unwrap();

    assert!(queue.discard_dead_letter(id).unwrap());
    assert!(queue.dead_letters().unwrap().is_empty());
    assert!(queue.is_empty().unwrap());
  }
}
