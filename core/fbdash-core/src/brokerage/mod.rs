//! Brokerage directory readers.
//!
//! The brokerage is a shared network directory the build farm coordinates
//! through. Every host writes heartbeats into it; nobody locks it. Readers here
//! assume any file can appear, vanish, or change between two statements.
//!
//! # Module Structure
//!
//! - [`heartbeat`]: the liveness predicate (mtime within two minutes)
//! - [`pool`]: versioned pool resolution and worker listing
//! - [`service`]: cached, polling worker snapshot with change notification
//! - [`access`]: blacklist/whitelist overrides for the local worker

pub mod access;
pub mod heartbeat;
pub mod pool;
mod service;

pub use access::{AccessPolicy, PolicyDecision};
pub use heartbeat::{is_heartbeat_fresh, is_worker_active, HEARTBEAT_TTL_SECS};
pub use pool::{list_workers, resolve_pool};
pub use service::{RefreshOutcome, WorkerPoolService};
