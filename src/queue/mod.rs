//! Offline mutation queue and the processor that replays it.
//!
//! Writes issued while offline are captured as [`PendingMutation`]s and kept
//! in the durable store until the server confirms them. [`SyncProcessor`]
//! drains the queue in insertion order whenever connectivity returns.

mod mutation;
mod pending;
mod processor;

pub use mutation::{DeadLetter, MutationPayload, MutationType, PendingMutation};
pub use pending::MutationQueue;
pub use processor::{ProcessOutcome, RetryPolicy, SyncProcessor, SyncReport};
