//! Periodic background sync driver.

use crate::engine::SyncEngine;
use crate::remote::RemoteStore;
use kata_storage::LocalStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Drives [`SyncEngine::background_tick`] on a fixed interval.
///
/// Cancellation stops scheduling future runs; an in-flight run always
/// completes. The task is not aborted.
pub struct BackgroundSync {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundSync {
    /// Spawns the timer task on the current tokio runtime.
    ///
    /// The first tick fires one `interval` after the call, not
    /// immediately; an app wanting an immediate sync triggers one
    /// explicitly.
    pub fn start<R, S>(engine: Arc<SyncEngine<R, S>>, interval: Duration) -> Self
    where
        R: RemoteStore + 'static,
        S: LocalStore + 'static,
    {
        let (shutdown, mut cancelled) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() fires immediately on the first tick; swallow it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.background_tick().await;
                    }
                    changed = cancelled.changed() => {
                        if changed.is_err() || *cancelled.borrow() {
                            tracing::debug!("background sync timer stopped");
                            break;
                        }
                    }
                }
            }
        });
        Self { shutdown, handle }
    }

    /// Stops scheduling future runs. An in-flight run completes.
    pub fn cancel(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Whether the timer task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
