//! Response caching for read requests.
//!
//! Entries are keyed by normalized endpoint + parameters, scoped by owner,
//! and expire after a per-resource-class TTL. Expired entries are evicted
//! lazily on read or in bulk by [`ResponseCache::prune_expired`].

mod response;
mod ttl;

pub use response::{normalize_key, CacheRecord, ResponseCache};
pub use ttl::{ResourceClass, TtlPolicy};
