//! Replays queued mutations once connectivity returns.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::mutation::PendingMutation;
use super::pending::MutationQueue;
use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::connectivity::Connectivity;
use crate::transport::Transport;

/// Longest retry delay a config can ask for.
const MAX_BACKOFF_DAYS: i64 = 365;

/// Backoff and abandonment rules for failed replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Failures before dead-lettering; 0 retries forever
  pub max_retries: u32,
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::from_config(&QueueConfig::default())
  }
}

impl RetryPolicy {
  pub fn from_config(config: &QueueConfig) -> Self {
    let millis = |ms: u64| {
      Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
        .min(Duration::days(MAX_BACKOFF_DAYS))
    };
    Self {
      max_retries: config.max_retries,
      base_delay: millis(config.backoff_base_ms),
      max_delay: millis(config.backoff_max_ms),
    }
  }

  /// Retry immediately on the next pass, forever.
  pub fn immediate() -> Self {
    Self {
      max_retries: 0,
      base_delay: Duration::zero(),
      max_delay: Duration::zero(),
    }
  }

  /// Delay before the next attempt after `retry_count` failures:
  /// `base * 2^(retry_count - 1)`, capped at `max_delay`.
  pub fn delay_after(&self, retry_count: u32) -> Duration {
    if retry_count == 0 || self.base_delay <= Duration::zero() {
      return Duration::zero();
    }
    // 2^30 already exceeds any sensible cap; larger shifts would overflow i32
    let factor = 1i32 << (retry_count - 1).min(30);
    self
      .base_delay
      .checked_mul(factor)
      .unwrap_or(self.max_delay)
      .min(self.max_delay)
  }

  pub fn is_exhausted(&self, retry_count: u32) -> bool {
    self.max_retries > 0 && retry_count >= self.max_retries
  }
}

/// Counts from one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub attempted: usize,
  pub succeeded: usize,
  pub failed: usize,
  /// Skipped because their backoff had not elapsed
  pub deferred: usize,
  pub dead_lettered: usize,
}

/// Result of asking for a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
  Completed(SyncReport),
  /// Another pass was in flight; this call did nothing
  AlreadyRunning,
}

/// Releases the in-flight flag when the pass ends, even by panic.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Drains the mutation queue through the transport.
///
/// Only one pass runs at a time per processor; a trigger that arrives
/// mid-pass is dropped rather than queued.
pub struct SyncProcessor {
  queue: MutationQueue,
  transport: Arc<dyn Transport>,
  clock: Arc<dyn Clock>,
  policy: RetryPolicy,
  processing: AtomicBool,
}

impl SyncProcessor {
  pub fn new(
    queue: MutationQueue,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
  ) -> Self {
    Self {
      queue,
      transport,
      clock,
      policy,
      processing: AtomicBool::new(false),
    }
  }

  pub fn is_processing(&self) -> bool {
    self.processing.load(Ordering::Acquire)
  }

  /// Replay every queued mutation, in order, once.
  ///
  /// Success dequeues. Failure bumps the retry count and moves on; the
  /// mutation stays queued for a later pass, or is dead-lettered once the
  /// policy gives up on it.
  pub async fn process_all(&self) -> Result<ProcessOutcome> {
    if self
      .processing
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("Sync pass already running; ignoring trigger");
      return Ok(ProcessOutcome::AlreadyRunning);
    }
    let _guard = InFlight(&self.processing);

    let pending = self.queue.list()?;
    let mut report = SyncReport::default();
    if pending.is_empty() {
      return Ok(ProcessOutcome::Completed(report));
    }
    info!(count = pending.len(), "Replaying queued mutations");

    for mutation in pending {
      if !mutation.is_due(self.clock.now()) {
        report.deferred += 1;
        continue;
      }

      report.attempted += 1;
      let id = mutation.id;
      let error = match self
        .transport
        .request(mutation.payload.to_replay_request())
        .await
      {
        Ok(response) if response.is_success() => None,
        Ok(response) => Some(
          response
            .error
            .map(|e| e.message)
            .unwrap_or_else(|| format!("{} {}", response.status, response.status_text)),
        ),
        Err(e) => Some(e.to_string()),
      };

      match error {
        None => match self.queue.dequeue(id) {
          Ok(_) => {
            report.succeeded += 1;
            debug!(%id, "Replayed mutation");
          }
          Err(e) => {
            // Stays queued and will be replayed again next pass
            report.failed += 1;
            warn!(%id, error = %e, "Replayed mutation could not be dequeued");
          }
        },
        Some(error) => {
          report.failed += 1;
          match self.record_failure(mutation, &error) {
            Ok(true) => report.dead_lettered += 1,
            Ok(false) => {}
            Err(e) => warn!(%id, error = %e, "Failed to record replay failure"),
          }
        }
      }
    }

    info!(
      attempted = report.attempted,
      succeeded = report.succeeded,
      failed = report.failed,
      deferred = report.deferred,
      dead_lettered = report.dead_lettered,
      "Sync pass finished"
    );
    Ok(ProcessOutcome::Completed(report))
  }

  /// Bump the retry count or dead-letter the mutation. Returns whether it
  /// was dead-lettered.
  fn record_failure(&self, mut mutation: PendingMutation, error: &str) -> Result<bool> {
    let id = mutation.id;
    let retries = mutation.retry_count + 1;
    if self.policy.is_exhausted(retries) {
      mutation.retry_count = retries;
      self.queue.dead_letter(mutation, error)?;
      return Ok(true);
    }
    let delay = self.policy.delay_after(retries);
    let next_attempt_at = (delay > Duration::zero()).then(|| {
      self
        .clock
        .now()
        .checked_add_signed(delay)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
    });
    self.queue.increment_retry(id, error, next_attempt_at)?;
    warn!(%id, retries, error, "Replay failed; mutation stays queued");
    Ok(false)
  }

  /// Run a pass only if currently online.
  pub async fn process_if_online(&self, connectivity: &Connectivity) -> Result<Option<ProcessOutcome>> {
    if !connectivity.is_online() {
      return Ok(None);
    }
    self.process_all().await.map(Some)
  }

  /// Run a pass every time connectivity comes back. The task ends when the
  /// connectivity sender is dropped.
  pub fn spawn_listener(self: Arc<Self>, connectivity: &Connectivity) -> JoinHandle<()> {
    let mut rx = connectivity.subscribe();
    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        if !online {
          continue;
        }
        info!("Connectivity restored; draining mutation queue");
        if let Err(e) = self.process_all().await {
          warn!(error = %e, "Sync pass failed");
        }
      }
    })
  }
}
