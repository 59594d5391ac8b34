//! # Kata Storage
//!
//! Durable key-value storage for the Kata offline layer.
//!
//! This crate provides the lowest-level persistence abstraction used by the
//! offline queue, the conflict store, and the snapshot cache. Stores are
//! **opaque string stores** - they do not interpret the values they hold.
//!
//! ## Design Principles
//!
//! - Stores are simple string maps (get, set, remove)
//! - No transactional guarantees across keys; last write wins per key
//! - Each consumer owns a disjoint key namespace
//! - Must be `Send + Sync` for shared access
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral state
//! - [`FileStore`] - One file per key, surviving process restarts
//!
//! ## Example
//!
//! ```rust
//! use kata_storage::{InMemoryStore, LocalStore};
//!
//! let store = InMemoryStore::new();
//! store.set("queue/operations", "[]").unwrap();
//! assert_eq!(store.get("queue/operations").unwrap().as_deref(), Some("[]"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::InMemoryStore;
pub use store::LocalStore;
