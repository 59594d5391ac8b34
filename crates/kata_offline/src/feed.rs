//! Full-snapshot observer channel.

use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// Distributes full state snapshots to subscribers.
///
/// Backs the live queue and conflict views: after every successful
/// mutation the owning component emits its **entire** current state, and
/// subscribers recompute any derived counts or filters from it. There is
/// no diff stream.
///
/// Disconnected subscribers are dropped on the next emission.
pub struct SnapshotFeed<T: Clone> {
    subscribers: RwLock<Vec<Sender<T>>>,
}

impl<T: Clone> SnapshotFeed<T> {
    /// Creates a feed with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to the feed.
    ///
    /// The receiver gets every snapshot emitted after this call. Poll it
    /// regularly to avoid unbounded buffering.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a snapshot to all subscribers, pruning disconnected ones.
    pub fn emit(&self, snapshot: T) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }

    /// Returns the number of connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl<T: Clone> Default for SnapshotFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}
