//! # Kata Sync Engine
//!
//! Background sync engine for the Kata app's offline layer.
//!
//! This crate provides:
//! - The sync state machine (idle → syncing → completed/failed, plus a
//!   user-controlled paused state)
//! - Posts collection pulls into the local snapshot cache with
//!   defensive per-record mapping
//! - Batched, bounded-concurrency draining of the offline operation
//!   queue with conflict routing
//! - A bounded per-run result history and bandwidth accounting
//! - The cancellable periodic background timer
//! - The device environment seams: remote store, auth gateway, network
//!   observer, data usage policy
//!
//! ## Architecture
//!
//! One [`SyncEngine`] instance owns explicit handles to the queue,
//! conflict store, cache, and environment - no process-wide singletons.
//! Runs are serialized by an internal run-lock; a periodic tick and a
//! manual trigger can never double-drain the queue.
//!
//! ## Key Invariants
//!
//! - Version conflicts route to conflict detection and never to the
//!   retry path; the affected operation fails with a manual-resolution
//!   error
//! - Transient remote failures re-enter the queue's bounded exponential
//!   backoff
//! - Run-level failures are captured in the run history, never panics
//! - Background runs do the work silently: status and progress signals
//!   stay untouched

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod background;
mod config;
mod engine;
mod env;
mod error;
mod remote;

pub use background::BackgroundSync;
pub use config::SyncConfig;
pub use engine::{
    EngineState, RemoteReactions, SyncEngine, SyncOperationKind, SyncRunResult, SyncStatus,
};
pub use env::{
    AuthGateway, ConnectionClass, DataUsagePolicy, MediaQuality, NetworkObserver, StaticAuth,
    StaticNetwork, StaticPolicy,
};
pub use error::{SyncError, SyncResult};
pub use remote::{MockRemoteStore, RemoteError, RemoteResult, RemoteStore};
