//! The sync engine state machine.

use crate::config::SyncConfig;
use crate::env::{AuthGateway, DataUsagePolicy, NetworkObserver};
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteError, RemoteResult, RemoteStore};
use async_trait::async_trait;
use kata_model::time::now_millis;
use kata_model::{
    CommentId, CommentKind, CommentSnapshot, OfflineOperation, OperationPayload, OperationStatus,
    Post, ReactionState, UserId,
};
use kata_offline::{
    ConflictDetector, ConflictStore, OfflineError, OfflineResult, OperationQueue, OperationUpdate,
    ReactionSource, SnapshotCache,
};
use kata_storage::LocalStore;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Externally observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No run in progress.
    Idle,
    /// A run is in progress.
    Syncing,
    /// The last run finished successfully.
    Completed,
    /// The last run failed.
    Failed,
    /// Suspended by the user; entered only through [`SyncEngine::pause`].
    Paused,
}

/// The kind of work a sync run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperationKind {
    /// Posts pull followed by a queue drain.
    FullSync,
    /// Pull the posts collection into the cache.
    Posts,
    /// Drain pending offline operations.
    PendingOperations,
}

impl SyncOperationKind {
    /// Stable name for logs and UI.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperationKind::FullSync => "full_sync",
            SyncOperationKind::Posts => "posts",
            SyncOperationKind::PendingOperations => "pending_operations",
        }
    }
}

/// Snapshot of the engine's externally observable signals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncStatus {
    /// Current state.
    pub state: EngineState,
    /// The operation of the current or last run.
    pub operation: Option<SyncOperationKind>,
    /// Progress of the current run in `[0.0, 1.0]`.
    pub progress: f64,
}

/// Outcome of one sync run, kept in the bounded history.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRunResult {
    /// What the run did.
    pub operation: SyncOperationKind,
    /// Whether the run finished without a run-level error.
    pub success: bool,
    /// Items handled successfully.
    pub items_processed: usize,
    /// Items that failed individually without aborting the run.
    pub items_failed: usize,
    /// Run-level error, when the run failed.
    pub error: Option<String>,
    /// Completion time (unix ms).
    pub timestamp: i64,
}

/// Adapts a [`RemoteStore`] to the detector's authoritative reaction
/// lookup.
pub struct RemoteReactions<R: RemoteStore> {
    remote: Arc<R>,
}

impl<R: RemoteStore> RemoteReactions<R> {
    /// Wraps a remote store handle.
    pub fn new(remote: Arc<R>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl<R: RemoteStore> ReactionSource for RemoteReactions<R> {
    async fn reaction_state(
        &self,
        user: &UserId,
        kind: CommentKind,
        comment_id: &CommentId,
    ) -> OfflineResult<ReactionState> {
        self.remote
            .reaction_state(user, kind, comment_id)
            .await
            .map_err(|e| OfflineError::Reaction(e.to_string()))
    }
}

/// How a single drained operation ended.
enum OperationOutcome {
    Completed,
    Conflicted,
    Failed,
}

/// Routing decision for a failed dispatch.
enum DispatchError {
    /// A conflict was recorded; the operation awaits manual resolution.
    Conflict,
    /// Transient failure; retried with backoff.
    Transient(String),
    /// Terminal failure; not retried.
    Terminal(String),
}

fn classify(error: RemoteError) -> DispatchError {
    if error.is_transient() {
        DispatchError::Transient(error.to_string())
    } else if matches!(error, RemoteError::VersionConflict { .. }) {
        DispatchError::Conflict
    } else {
        DispatchError::Terminal(error.to_string())
    }
}

/// Orchestrates synchronization between the offline layer and the
/// remote backend.
///
/// One engine instance owns explicit handles to the queue, conflict
/// store, cache, and device environment - there is no ambient state.
/// Runs are serialized by an internal run-lock, so an overlapping timer
/// tick and manual trigger cannot double-drain the queue.
pub struct SyncEngine<R: RemoteStore, S: LocalStore> {
    config: SyncConfig,
    remote: Arc<R>,
    queue: Arc<OperationQueue<S>>,
    conflicts: Arc<ConflictStore<S>>,
    detector: ConflictDetector<S, RemoteReactions<R>>,
    cache: Arc<SnapshotCache<S>>,
    auth: Arc<dyn AuthGateway>,
    network: Arc<dyn NetworkObserver>,
    policy: Arc<dyn DataUsagePolicy>,
    status: RwLock<SyncStatus>,
    history: RwLock<VecDeque<SyncRunResult>>,
    bytes_used: AtomicU64,
    paused: AtomicBool,
    background_enabled: AtomicBool,
    run_lock: tokio::sync::Mutex<()>,
}

impl<R: RemoteStore, S: LocalStore> SyncEngine<R, S> {
    /// Creates an engine over explicit component handles.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SyncConfig,
        remote: Arc<R>,
        queue: Arc<OperationQueue<S>>,
        conflicts: Arc<ConflictStore<S>>,
        cache: Arc<SnapshotCache<S>>,
        auth: Arc<dyn AuthGateway>,
        network: Arc<dyn NetworkObserver>,
        policy: Arc<dyn DataUsagePolicy>,
    ) -> Self {
        let detector = ConflictDetector::new(
            Arc::clone(&conflicts),
            Arc::new(RemoteReactions::new(Arc::clone(&remote))),
        );
        Self {
            config,
            remote,
            queue,
            conflicts,
            detector,
            cache,
            auth,
            network,
            policy,
            status: RwLock::new(SyncStatus {
                state: EngineState::Idle,
                operation: None,
                progress: 0.0,
            }),
            history: RwLock::new(VecDeque::new()),
            bytes_used: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            background_enabled: AtomicBool::new(true),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// The operation queue this engine drains.
    pub fn queue(&self) -> &Arc<OperationQueue<S>> {
        &self.queue
    }

    /// The conflict store this engine records into.
    pub fn conflicts(&self) -> &Arc<ConflictStore<S>> {
        &self.conflicts
    }

    /// The snapshot cache this engine refreshes.
    pub fn cache(&self) -> &Arc<SnapshotCache<S>> {
        &self.cache
    }

    /// Current externally observable status.
    pub fn status(&self) -> SyncStatus {
        let mut status = *self.status.read();
        if self.paused.load(Ordering::SeqCst) {
            status.state = EngineState::Paused;
        }
        status
    }

    /// The most recent run results, oldest first (bounded).
    pub fn history(&self) -> Vec<SyncRunResult> {
        self.history.read().iter().cloned().collect()
    }

    /// Estimated bytes transferred by sync runs so far.
    ///
    /// Readers see eventually-consistent values; the counter is updated
    /// after each operation completes.
    pub fn bytes_used(&self) -> u64 {
        self.bytes_used.load(Ordering::Relaxed)
    }

    /// Suspends the engine. Runs refuse until [`Self::resume`].
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        tracing::info!("sync engine paused");
    }

    /// Lifts a [`Self::pause`].
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        tracing::info!("sync engine resumed");
    }

    /// Whether the engine is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Enables or disables the periodic background sync.
    pub fn set_background_sync_enabled(&self, enabled: bool) {
        self.background_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether the periodic background sync is user-enabled.
    pub fn background_sync_enabled(&self) -> bool {
        self.background_enabled.load(Ordering::SeqCst)
    }

    /// Runs a full sync: posts pull followed by a queue drain.
    pub async fn full_sync(&self) -> SyncResult<SyncRunResult> {
        self.run(SyncOperationKind::FullSync, false).await
    }

    /// Pulls the posts collection into the local cache.
    pub async fn sync_posts(&self) -> SyncResult<SyncRunResult> {
        self.run(SyncOperationKind::Posts, false).await
    }

    /// Drains pending offline operations now.
    pub async fn force_sync_pending(&self) -> SyncResult<SyncRunResult> {
        self.run(SyncOperationKind::PendingOperations, false).await
    }

    /// Reacts to the device regaining connectivity: silently drains
    /// whatever queued up while offline. Gating failures are swallowed -
    /// the next trigger will retry.
    pub async fn handle_reconnect(&self) {
        match self.run(SyncOperationKind::PendingOperations, true).await {
            Ok(result) => {
                tracing::debug!(
                    processed = result.items_processed,
                    failed = result.items_failed,
                    "reconnect drain finished"
                );
            }
            Err(e) => tracing::debug!("reconnect drain skipped: {e}"),
        }
    }

    /// One tick of the periodic background sync.
    ///
    /// Only fires when connected, user-enabled, and permitted by the
    /// data usage policy. Runs silently: the underlying work and
    /// bandwidth accounting happen, but status and progress signals are
    /// left untouched.
    pub async fn background_tick(&self) {
        if !self.background_sync_enabled() {
            tracing::debug!("background sync disabled, skipping tick");
            return;
        }
        if let Err(e) = self.run(SyncOperationKind::FullSync, true).await {
            tracing::debug!("background sync skipped: {e}");
        }
    }

    /// Removes all queue and conflict records for `user`, as one unit.
    /// Called on sign-out.
    pub fn clear_user_data(&self, user: &UserId) -> SyncResult<()> {
        self.queue.clear_operations_for_user(user)?;
        self.conflicts.clear_conflicts_for_user(user)?;
        Ok(())
    }

    /// Retention cleanup: purges completed operations and resolved
    /// conflicts older than the configured threshold. Returns
    /// `(operations, conflicts)` purged.
    pub fn run_retention_cleanup(&self) -> SyncResult<(usize, usize)> {
        let days = self.config.retention_days;
        let operations = self.queue.clear_old_operations(days)?;
        let conflicts = self.conflicts.cleanup_resolved_conflicts(days)?;
        if operations + conflicts > 0 {
            tracing::info!(operations, conflicts, "retention cleanup purged records");
        }
        Ok((operations, conflicts))
    }

    /// Deletes a comment and all its replies.
    ///
    /// The reply tree is collected with an explicit worklist (no
    /// recursion, so depth is bounded only by memory) and deleted
    /// children-first so the backend never orphans replies. Returns the
    /// number of comments deleted.
    pub async fn delete_comment_tree(
        &self,
        kind: CommentKind,
        root: &CommentId,
    ) -> SyncResult<usize> {
        let mut order = vec![root.clone()];
        let mut worklist = vec![root.clone()];
        while let Some(current) = worklist.pop() {
            let replies = self.call(self.remote.list_replies(kind, &current)).await?;
            for reply in replies {
                order.push(reply.id.clone());
                worklist.push(reply.id);
            }
        }

        let mut deleted = 0;
        for id in order.iter().rev() {
            let comment = match self.call(self.remote.get_comment(kind, id)).await {
                Ok(comment) => comment,
                Err(RemoteError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            if comment.deleted {
                continue;
            }
            match self
                .call(self.remote.delete_comment(kind, id, comment.version))
                .await
            {
                Ok(()) => {
                    deleted += 1;
                    self.cache.invalidate_comment(kind, id)?;
                }
                Err(RemoteError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(deleted)
    }

    /// Runs one sync cycle under the run-lock.
    async fn run(&self, kind: SyncOperationKind, silent: bool) -> SyncResult<SyncRunResult> {
        if self.is_paused() {
            return Err(SyncError::Paused);
        }
        if !self.network.is_connected() {
            return Err(SyncError::NotPermitted("no connectivity"));
        }
        if !self.policy.sync_allowed(self.network.connection_class()) {
            return Err(SyncError::NotPermitted("blocked by data usage policy"));
        }

        let _guard = self.run_lock.lock().await;

        if !silent {
            *self.status.write() = SyncStatus {
                state: EngineState::Syncing,
                operation: Some(kind),
                progress: 0.0,
            };
        }
        tracing::debug!(operation = kind.as_str(), silent, "sync run starting");

        let outcome = match kind {
            SyncOperationKind::Posts => self.sync_posts_inner(silent).await,
            SyncOperationKind::PendingOperations => self.drain_inner().await,
            SyncOperationKind::FullSync => match self.sync_posts_inner(silent).await {
                Ok((posts_ok, posts_failed)) => self
                    .drain_inner()
                    .await
                    .map(|(ops_ok, ops_failed)| (posts_ok + ops_ok, posts_failed + ops_failed)),
                Err(e) => Err(e),
            },
        };

        let result = match outcome {
            Ok((items_processed, items_failed)) => {
                if !silent {
                    let mut status = self.status.write();
                    status.state = EngineState::Completed;
                    status.progress = 1.0;
                }
                SyncRunResult {
                    operation: kind,
                    success: true,
                    items_processed,
                    items_failed,
                    error: None,
                    timestamp: now_millis(),
                }
            }
            Err(e) => {
                tracing::warn!(operation = kind.as_str(), "sync run failed: {e}");
                if !silent {
                    self.status.write().state = EngineState::Failed;
                }
                SyncRunResult {
                    operation: kind,
                    success: false,
                    items_processed: 0,
                    items_failed: 0,
                    error: Some(e.to_string()),
                    timestamp: now_millis(),
                }
            }
        };

        self.push_history(result.clone());
        Ok(result)
    }

    /// Pulls the full posts collection, mapping each record defensively.
    async fn sync_posts_inner(&self, silent: bool) -> SyncResult<(usize, usize)> {
        let records = self.call(self.remote.fetch_posts()).await?;
        let total = records.len();

        let mut posts = Vec::with_capacity(total);
        let mut failed = 0usize;
        let mut bytes = 0u64;

        for (index, record) in records.iter().enumerate() {
            bytes += estimated_size(record);
            match serde_json::from_value::<Post>(record.clone()) {
                Ok(post) => posts.push(post),
                Err(e) => {
                    failed += 1;
                    tracing::warn!("skipping unreadable post record: {e}");
                }
            }
            if !silent && total > 0 {
                self.status.write().progress = (index + 1) as f64 / total as f64;
            }
        }

        self.cache.store_posts(&posts)?;
        self.bytes_used.fetch_add(bytes, Ordering::Relaxed);
        tracing::debug!(cached = posts.len(), failed, "posts snapshot refreshed");
        Ok((posts.len(), failed))
    }

    /// Drains due operations for the signed-in user, in enqueue order at
    /// batch granularity.
    async fn drain_inner(&self) -> SyncResult<(usize, usize)> {
        let user = self.auth.current_user().ok_or(SyncError::NotAuthenticated)?;
        let now = now_millis();

        let due: Vec<OfflineOperation> = self
            .queue
            .pending_operations()
            .into_iter()
            .filter(|op| op.user_id == user)
            .filter(|op| OperationQueue::<S>::is_due(op, now))
            .collect();

        let mut completed = 0usize;
        let mut failed = 0usize;

        for batch in due.chunks(self.config.batch_size) {
            for op in batch {
                let _ = self.queue.update_operation(
                    op.id,
                    OperationUpdate {
                        status: Some(OperationStatus::Processing),
                        ..OperationUpdate::default()
                    },
                );
            }

            let outcomes =
                futures::future::join_all(batch.iter().map(|op| self.process_operation(op))).await;

            for outcome in outcomes {
                match outcome {
                    OperationOutcome::Completed => completed += 1,
                    OperationOutcome::Conflicted | OperationOutcome::Failed => failed += 1,
                }
            }
        }

        Ok((completed, failed))
    }

    /// Settles one operation against the backend and records its fate.
    async fn process_operation(&self, op: &OfflineOperation) -> OperationOutcome {
        let result = self.dispatch(op).await;
        self.bytes_used
            .fetch_add(estimated_payload_size(&op.payload), Ordering::Relaxed);

        match result {
            Ok(invalidate) => {
                if let Err(e) = self.queue.mark_operation_completed(op.id) {
                    tracing::warn!("failed to mark operation {} completed: {e}", op.id);
                }
                if let Some((kind, comment_id)) = invalidate {
                    if let Err(e) = self.cache.invalidate_comment(kind, &comment_id) {
                        tracing::warn!("failed to invalidate cached comment: {e}");
                    }
                }
                OperationOutcome::Completed
            }
            Err(DispatchError::Conflict) => {
                if let Err(e) = self.queue.mark_operation_conflicted(op.id) {
                    tracing::warn!("failed to mark operation {} conflicted: {e}", op.id);
                }
                OperationOutcome::Conflicted
            }
            Err(DispatchError::Transient(message)) => {
                if let Err(e) = self.queue.mark_operation_failed(op.id, &message) {
                    tracing::warn!("failed to mark operation {} failed: {e}", op.id);
                }
                OperationOutcome::Failed
            }
            Err(DispatchError::Terminal(message)) => {
                if let Err(e) = self.queue.update_operation(
                    op.id,
                    OperationUpdate {
                        status: Some(OperationStatus::Failed),
                        error: Some(Some(message)),
                        ..OperationUpdate::default()
                    },
                ) {
                    tracing::warn!("failed to mark operation {} failed: {e}", op.id);
                }
                OperationOutcome::Failed
            }
        }
    }

    /// Dispatches an operation to its remote mutation.
    ///
    /// Returns the comment to invalidate in the cache on success.
    async fn dispatch(
        &self,
        op: &OfflineOperation,
    ) -> Result<Option<(CommentKind, CommentId)>, DispatchError> {
        match &op.payload {
            OperationPayload::AddComment {
                kind,
                target_id,
                content,
            } => {
                self.call(
                    self.remote
                        .create_comment(*kind, target_id, &op.user_id, content),
                )
                .await
                .map_err(classify)?;
                Ok(None)
            }
            OperationPayload::UpdateComment {
                kind,
                comment_id,
                content,
                base_version,
            } => {
                match self
                    .call(
                        self.remote
                            .update_comment(*kind, comment_id, content, *base_version),
                    )
                    .await
                {
                    Ok(_) => Ok(Some((*kind, comment_id.clone()))),
                    Err(RemoteError::VersionConflict { actual, .. }) => {
                        let local = CommentSnapshot {
                            version: *base_version,
                            content: Some(content.clone()),
                            ..CommentSnapshot::default()
                        };
                        Err(self
                            .record_version_conflict(op, *kind, comment_id, local, actual)
                            .await)
                    }
                    Err(e) => Err(classify(e)),
                }
            }
            OperationPayload::DeleteComment {
                kind,
                comment_id,
                base_version,
            } => {
                match self
                    .call(self.remote.delete_comment(*kind, comment_id, *base_version))
                    .await
                {
                    Ok(()) => Ok(Some((*kind, comment_id.clone()))),
                    Err(RemoteError::VersionConflict { actual, .. }) => {
                        let local = CommentSnapshot {
                            version: *base_version,
                            deleted: true,
                            ..CommentSnapshot::default()
                        };
                        Err(self
                            .record_version_conflict(op, *kind, comment_id, local, actual)
                            .await)
                    }
                    Err(e) => Err(classify(e)),
                }
            }
            OperationPayload::ToggleLike {
                kind,
                comment_id,
                liked,
            } => {
                self.apply_reaction(op, *kind, comment_id, Some(*liked), None)
                    .await
            }
            OperationPayload::ToggleDislike {
                kind,
                comment_id,
                disliked,
            } => {
                self.apply_reaction(op, *kind, comment_id, None, Some(*disliked))
                    .await
            }
        }
    }

    /// Fetches the authoritative state and records a version conflict.
    async fn record_version_conflict(
        &self,
        op: &OfflineOperation,
        kind: CommentKind,
        comment_id: &CommentId,
        local: CommentSnapshot,
        server_version: u64,
    ) -> DispatchError {
        let server = match self.call(self.remote.get_comment(kind, comment_id)).await {
            Ok(comment) => CommentSnapshot::from_comment(&comment),
            Err(RemoteError::NotFound(_)) => CommentSnapshot::deleted_on_server(server_version),
            // Can't capture the server side right now; leave the
            // operation on the retry path and classify next time.
            Err(e) => return classify(e),
        };

        match self
            .detector
            .detect(kind, comment_id, &local, &server, Some(&op.user_id))
            .await
        {
            Ok(_) => DispatchError::Conflict,
            Err(e) => DispatchError::Transient(e.to_string()),
        }
    }

    /// Runs the reaction sub-check, then applies the reaction.
    async fn apply_reaction(
        &self,
        op: &OfflineOperation,
        kind: CommentKind,
        comment_id: &CommentId,
        liked: Option<bool>,
        disliked: Option<bool>,
    ) -> Result<Option<(CommentKind, CommentId)>, DispatchError> {
        let server = match self.call(self.remote.get_comment(kind, comment_id)).await {
            Ok(comment) => CommentSnapshot::from_comment(&comment),
            Err(RemoteError::NotFound(_)) => CommentSnapshot::deleted_on_server(0),
            Err(e) => return Err(classify(e)),
        };
        let local = CommentSnapshot {
            version: server.version,
            liked,
            disliked,
            ..CommentSnapshot::default()
        };

        match self
            .detector
            .detect(kind, comment_id, &local, &server, Some(&op.user_id))
            .await
        {
            Ok(Some(_)) => return Err(DispatchError::Conflict),
            Ok(None) => {}
            Err(e) => return Err(DispatchError::Transient(e.to_string())),
        }

        let applied = if let Some(liked) = liked {
            self.call(self.remote.set_liked(&op.user_id, kind, comment_id, liked))
                .await
        } else if let Some(disliked) = disliked {
            self.call(
                self.remote
                    .set_disliked(&op.user_id, kind, comment_id, disliked),
            )
            .await
        } else {
            Ok(())
        };
        applied.map_err(classify)?;
        Ok(Some((kind, comment_id.clone())))
    }

    /// Applies the per-call timeout to a remote call.
    async fn call<T>(&self, request: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        match tokio::time::timeout(self.config.call_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        }
    }

    fn push_history(&self, result: SyncRunResult) {
        let mut history = self.history.write();
        history.push_back(result);
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }
}

/// Rough wire-size estimate of a raw record.
fn estimated_size(record: &serde_json::Value) -> u64 {
    serde_json::to_string(record).map_or(0, |s| s.len() as u64)
}

/// Rough wire-size estimate of an operation payload.
fn estimated_payload_size(payload: &OperationPayload) -> u64 {
    serde_json::to_string(payload).map_or(0, |s| s.len() as u64)
}
