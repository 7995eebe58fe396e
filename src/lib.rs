//! Offline-first persistence and sync for the story client.
//!
//! Reads are served cache-then-network, writes made while offline are queued
//! durably and replayed in order once connectivity returns, and drafts
//! survive restarts. [`Engine`] wires the pieces together.

pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod content;
pub mod engine;
pub mod interceptor;
pub mod logging;
pub mod migrate;
pub mod queue;
pub mod store;
pub mod transport;

pub use engine::{Engine, EngineStatus, StartupReport};
