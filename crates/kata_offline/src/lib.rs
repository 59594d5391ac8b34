//! # Kata Offline
//!
//! Offline operation queue, conflict detection, and snapshot cache for
//! the Kata app.
//!
//! This crate provides:
//! - [`OperationQueue`] - durable append-only log of pending mutations
//!   with bounded exponential backoff bookkeeping
//! - [`ConflictDetector`] - ordered divergence classification for
//!   versioned comments, with an authoritative reaction sub-check
//! - [`ConflictStore`] - persisted conflicts, resolution lifecycle, and
//!   retention cleanup
//! - [`SnapshotCache`] - validity-window cache of server collections and
//!   entities
//! - [`SnapshotFeed`] - full-snapshot observer channel backing the live
//!   queue and conflict views
//!
//! ## Key Invariants
//!
//! - Every queue mutation persists the whole list before returning and
//!   re-emits it to subscribers (no incremental diffs)
//! - A corrupt persisted record is logged and skipped, never propagated;
//!   one bad entry cannot block the queue or cache
//! - Conflicted operations are failed with a manual-resolution error and
//!   never re-enter the retry path
//! - Expired cache is cleared and reported absent, never served as fresh

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod conflicts;
mod detector;
mod error;
mod feed;
mod queue;

pub use cache::{SnapshotCache, DEFAULT_CACHE_VALIDITY};
pub use conflicts::{ConflictStats, ConflictStore};
pub use detector::{classify_divergence, ConflictDetector, ReactionSource};
pub use error::{OfflineError, OfflineResult};
pub use feed::SnapshotFeed;
pub use queue::{OperationQueue, OperationUpdate, BASE_RETRY_DELAY, MAX_RETRIES};
