//! Durable offline operation queue.

use crate::error::OfflineResult;
use crate::feed::SnapshotFeed;
use kata_model::time::{now_millis, MILLIS_PER_DAY};
use kata_model::{
    OfflineOperation, OperationId, OperationStatus, UserId, MANUAL_RESOLUTION_ERROR,
};
use kata_storage::LocalStore;
use parking_lot::RwLock;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

/// Attempts after which an operation fails terminally.
pub const MAX_RETRIES: u32 = 5;

/// Base delay of the exponential retry backoff.
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Storage key holding the serialized queue, one operation per line.
const OPERATIONS_KEY: &str = "queue/operations";

/// Partial update applied to a queued operation.
///
/// `None` fields are left untouched; `error` distinguishes "leave as is"
/// (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct OperationUpdate {
    /// New lifecycle status.
    pub status: Option<OperationStatus>,
    /// New completion timestamp.
    pub processed_at: Option<i64>,
    /// New retry count.
    pub retry_count: Option<u32>,
    /// New error message (`Some(None)` clears it).
    pub error: Option<Option<String>>,
}

/// Append-only log of pending user mutations.
///
/// Every mutating call re-persists the entire queue before returning, so
/// a crash right after an enqueue cannot lose it, and re-emits the full
/// list on the live feed. Corrupt persisted lines are logged and skipped
/// at load; a single bad record never blocks the queue.
pub struct OperationQueue<S: LocalStore> {
    store: Arc<S>,
    operations: RwLock<Vec<OfflineOperation>>,
    feed: SnapshotFeed<Vec<OfflineOperation>>,
}

impl<S: LocalStore> OperationQueue<S> {
    /// Opens the queue, loading any persisted operations.
    pub fn new(store: Arc<S>) -> Self {
        let operations = load_operations(store.as_ref());
        Self {
            store,
            operations: RwLock::new(operations),
            feed: SnapshotFeed::new(),
        }
    }

    /// Appends an operation and persists immediately.
    pub fn add_operation(&self, operation: OfflineOperation) -> OfflineResult<()> {
        let mut ops = self.operations.write();
        ops.push(operation);
        self.persist(&ops)?;
        let snapshot = ops.clone();
        drop(ops);
        self.feed.emit(snapshot);
        Ok(())
    }

    /// Removes an operation by id; absent ids are ignored.
    pub fn remove_operation(&self, id: OperationId) -> OfflineResult<()> {
        self.mutate(|ops| {
            let before = ops.len();
            ops.retain(|op| op.id != id);
            before != ops.len()
        })
    }

    /// Merges a partial update into the operation with `id`.
    ///
    /// Absent ids are ignored. A completed operation never regresses: its
    /// status is left untouched by further updates.
    pub fn update_operation(&self, id: OperationId, update: OperationUpdate) -> OfflineResult<()> {
        self.mutate(|ops| {
            let Some(op) = ops.iter_mut().find(|op| op.id == id) else {
                return false;
            };
            if let Some(status) = update.status {
                if op.status != OperationStatus::Completed {
                    op.status = status;
                }
            }
            if let Some(processed_at) = update.processed_at {
                op.processed_at = Some(processed_at);
            }
            if let Some(retry_count) = update.retry_count {
                op.retry_count = retry_count;
            }
            if let Some(error) = update.error {
                op.error = error;
            }
            true
        })
    }

    /// Records a failed attempt.
    ///
    /// Increments the retry count and stamps the attempt time. When the
    /// count reaches [`MAX_RETRIES`] the operation fails terminally;
    /// otherwise it reverts to `Pending` for the next drain cycle.
    pub fn mark_operation_failed(
        &self,
        id: OperationId,
        message: impl Into<String>,
    ) -> OfflineResult<()> {
        let message = message.into();
        self.mutate(|ops| {
            let Some(op) = ops.iter_mut().find(|op| op.id == id) else {
                return false;
            };
            if op.status == OperationStatus::Completed {
                return false;
            }
            op.retry_count += 1;
            op.error = Some(message.clone());
            op.last_attempt_at = Some(now_millis());
            op.status = if op.retry_count >= MAX_RETRIES {
                OperationStatus::Failed
            } else {
                OperationStatus::Pending
            };
            true
        })
    }

    /// Fails an operation on a detected conflict.
    ///
    /// Terminal regardless of retry count; the operation waits for the
    /// user's resolution decision instead of re-entering the backoff path.
    pub fn mark_operation_conflicted(&self, id: OperationId) -> OfflineResult<()> {
        self.mutate(|ops| {
            let Some(op) = ops.iter_mut().find(|op| op.id == id) else {
                return false;
            };
            if op.status == OperationStatus::Completed {
                return false;
            }
            op.status = OperationStatus::Failed;
            op.error = Some(MANUAL_RESOLUTION_ERROR.to_string());
            op.last_attempt_at = Some(now_millis());
            true
        })
    }

    /// Marks an operation acknowledged by the backend.
    pub fn mark_operation_completed(&self, id: OperationId) -> OfflineResult<()> {
        self.update_operation(
            id,
            OperationUpdate {
                status: Some(OperationStatus::Completed),
                processed_at: Some(now_millis()),
                error: Some(None),
                ..OperationUpdate::default()
            },
        )
    }

    /// Explicitly resets a terminally failed operation for another round
    /// of attempts. The only path out of terminal `Failed`.
    pub fn reset_operation(&self, id: OperationId) -> OfflineResult<()> {
        self.update_operation(
            id,
            OperationUpdate {
                status: Some(OperationStatus::Pending),
                retry_count: Some(0),
                error: Some(None),
                ..OperationUpdate::default()
            },
        )
    }

    /// Returns the operation with `id`, if present.
    #[must_use]
    pub fn operation(&self, id: OperationId) -> Option<OfflineOperation> {
        self.operations.read().iter().find(|op| op.id == id).cloned()
    }

    /// Returns all operations in enqueue order.
    #[must_use]
    pub fn all_operations(&self) -> Vec<OfflineOperation> {
        self.operations.read().clone()
    }

    /// Returns all operations owned by `user_id`, in enqueue order.
    #[must_use]
    pub fn operations_for_user(&self, user_id: &UserId) -> Vec<OfflineOperation> {
        self.operations
            .read()
            .iter()
            .filter(|op| &op.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Returns operations awaiting a drain (`Pending` or `Processing`),
    /// in enqueue order.
    #[must_use]
    pub fn pending_operations(&self) -> Vec<OfflineOperation> {
        self.operations
            .read()
            .iter()
            .filter(|op| {
                matches!(
                    op.status,
                    OperationStatus::Pending | OperationStatus::Processing
                )
            })
            .cloned()
            .collect()
    }

    /// Returns terminally failed operations that may still be retried.
    ///
    /// Conflicted operations are excluded: they wait for a resolution
    /// decision, not another attempt.
    #[must_use]
    pub fn retryable_operations(&self) -> Vec<OfflineOperation> {
        self.operations
            .read()
            .iter()
            .filter(|op| {
                op.status == OperationStatus::Failed
                    && op.retry_count < MAX_RETRIES
                    && !op.requires_manual_resolution()
            })
            .cloned()
            .collect()
    }

    /// Backoff delay before attempt number `retry_count + 1`.
    ///
    /// `BASE_RETRY_DELAY * 2^retry_count`, saturating rather than
    /// overflowing for absurd counts.
    #[must_use]
    pub fn retry_delay(retry_count: u32) -> Duration {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        BASE_RETRY_DELAY.saturating_mul(u32::try_from(factor).unwrap_or(u32::MAX))
    }

    /// Whether the backoff delay for `operation` has elapsed at `now`.
    ///
    /// Fresh operations are always due; retried ones wait out
    /// [`Self::retry_delay`] from their last attempt.
    #[must_use]
    pub fn is_due(operation: &OfflineOperation, now: i64) -> bool {
        match operation.last_attempt_at {
            None => true,
            Some(last) => {
                let delay = Self::retry_delay(operation.retry_count).as_millis();
                let delay = i64::try_from(delay).unwrap_or(i64::MAX);
                now.saturating_sub(last) >= delay
            }
        }
    }

    /// Purges every operation owned by `user_id`. Used on sign-out.
    pub fn clear_operations_for_user(&self, user_id: &UserId) -> OfflineResult<()> {
        self.mutate(|ops| {
            let before = ops.len();
            ops.retain(|op| &op.user_id != user_id);
            before != ops.len()
        })
    }

    /// Purges completed operations older than `days_old` days.
    ///
    /// Pending and failed operations are retained indefinitely until
    /// resolved or retried; only acknowledged work is eligible for
    /// retention cleanup. Returns the number of purged operations.
    pub fn clear_old_operations(&self, days_old: i64) -> OfflineResult<usize> {
        let cutoff = now_millis() - days_old * MILLIS_PER_DAY;
        let mut removed = 0;
        self.mutate(|ops| {
            let before = ops.len();
            ops.retain(|op| {
                op.status != OperationStatus::Completed
                    || op.processed_at.unwrap_or(op.created_at) >= cutoff
            });
            removed = before - ops.len();
            removed > 0
        })?;
        Ok(removed)
    }

    /// Subscribes to the live full-list feed.
    pub fn subscribe(&self) -> Receiver<Vec<OfflineOperation>> {
        self.feed.subscribe()
    }

    /// Number of operations currently in the queue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.read().len()
    }

    /// True when the queue holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.read().is_empty()
    }

    /// Applies `f` under the write lock; persists and emits when `f`
    /// reports a change.
    fn mutate(&self, f: impl FnOnce(&mut Vec<OfflineOperation>) -> bool) -> OfflineResult<()> {
        let mut ops = self.operations.write();
        if !f(&mut ops) {
            return Ok(());
        }
        self.persist(&ops)?;
        let snapshot = ops.clone();
        drop(ops);
        self.feed.emit(snapshot);
        Ok(())
    }

    fn persist(&self, operations: &[OfflineOperation]) -> OfflineResult<()> {
        let mut lines = Vec::with_capacity(operations.len());
        for op in operations {
            lines.push(serde_json::to_string(op)?);
        }
        self.store.set(OPERATIONS_KEY, &lines.join("\n"))?;
        Ok(())
    }
}

/// Loads the persisted queue, dropping unreadable records.
fn load_operations<S: LocalStore>(store: &S) -> Vec<OfflineOperation> {
    let raw = match store.get(OPERATIONS_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!("failed to read persisted queue, starting empty: {e}");
            return Vec::new();
        }
    };

    let mut operations = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<OfflineOperation>(line) {
            Ok(op) => operations.push(op),
            Err(e) => tracing::warn!("dropping corrupt queue record: {e}"),
        }
    }
    operations
}

#[cfg(test)]
mod tests {
    use super::*;
    use kata_model::{CommentId, CommentKind, OperationPayload};
    use kata_storage::InMemoryStore;
    use proptest::prelude::*;

    fn queue() -> OperationQueue<InMemoryStore> {
        OperationQueue::new(Arc::new(InMemoryStore::new()))
    }

    fn op(user: &str) -> OfflineOperation {
        OfflineOperation::new(
            UserId::new(user),
            OperationPayload::AddComment {
                kind: CommentKind::Post,
                target_id: "p-1".to_string(),
                content: "good class".to_string(),
            },
        )
    }

    #[test]
    fn enqueued_operations_read_back_in_order() {
        let q = queue();
        let ops: Vec<_> = (0..4).map(|_| op("u-1")).collect();
        for o in &ops {
            q.add_operation(o.clone()).unwrap();
        }

        let pending = q.pending_operations();
        assert_eq!(pending, ops);
    }

    #[test]
    fn queue_survives_reopen() {
        let store = Arc::new(InMemoryStore::new());
        let o = op("u-1");
        {
            let q = OperationQueue::new(Arc::clone(&store));
            q.add_operation(o.clone()).unwrap();
        }

        let q = OperationQueue::new(store);
        assert_eq!(q.all_operations(), vec![o]);
    }

    #[test]
    fn corrupt_line_is_skipped_on_load() {
        let store = Arc::new(InMemoryStore::new());
        let o = op("u-1");
        let good = serde_json::to_string(&o).unwrap();
        store
            .set(OPERATIONS_KEY, &format!("{good}\nnot json at all"))
            .unwrap();

        let q = OperationQueue::new(store);
        assert_eq!(q.len(), 1);
        assert_eq!(q.all_operations()[0].id, o.id);
    }

    #[test]
    fn remove_absent_is_noop() {
        let q = queue();
        let o = op("u-1");
        q.add_operation(o.clone()).unwrap();
        q.remove_operation(OperationId::new_v4()).unwrap();
        assert_eq!(q.len(), 1);
        q.remove_operation(o.id).unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn mark_failed_counts_and_terminates_at_max() {
        let q = queue();
        let o = op("u-1");
        let id = o.id;
        q.add_operation(o).unwrap();

        for n in 1..MAX_RETRIES {
            q.mark_operation_failed(id, "timeout").unwrap();
            let op = q.operation(id).unwrap();
            assert_eq!(op.retry_count, n);
            assert_eq!(op.status, OperationStatus::Pending);
            assert_eq!(op.error.as_deref(), Some("timeout"));
        }

        q.mark_operation_failed(id, "timeout").unwrap();
        let op = q.operation(id).unwrap();
        assert_eq!(op.retry_count, MAX_RETRIES);
        assert_eq!(op.status, OperationStatus::Failed);

        // Stays failed on further calls; only an explicit reset reopens it.
        q.mark_operation_failed(id, "timeout").unwrap();
        assert_eq!(q.operation(id).unwrap().status, OperationStatus::Failed);

        q.reset_operation(id).unwrap();
        let op = q.operation(id).unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert!(op.error.is_none());
    }

    #[test]
    fn completed_never_regresses() {
        let q = queue();
        let o = op("u-1");
        let id = o.id;
        q.add_operation(o).unwrap();

        q.mark_operation_completed(id).unwrap();
        let done = q.operation(id).unwrap();
        assert_eq!(done.status, OperationStatus::Completed);
        assert!(done.processed_at.is_some());

        q.mark_operation_failed(id, "late failure").unwrap();
        assert_eq!(q.operation(id).unwrap().status, OperationStatus::Completed);

        q.update_operation(
            id,
            OperationUpdate {
                status: Some(OperationStatus::Pending),
                ..OperationUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(q.operation(id).unwrap().status, OperationStatus::Completed);
    }

    #[test]
    fn conflicted_operation_is_terminal_and_not_retryable() {
        let q = queue();
        let o = op("u-1");
        let id = o.id;
        q.add_operation(o).unwrap();

        q.mark_operation_conflicted(id).unwrap();
        let op = q.operation(id).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(op.requires_manual_resolution());
        assert!(q.retryable_operations().is_empty());
    }

    #[test]
    fn user_scoping_and_logout_purge() {
        let q = queue();
        q.add_operation(op("u-1")).unwrap();
        q.add_operation(op("u-2")).unwrap();
        q.add_operation(op("u-1")).unwrap();

        assert_eq!(q.operations_for_user(&UserId::new("u-1")).len(), 2);

        q.clear_operations_for_user(&UserId::new("u-1")).unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.all_operations()[0].user_id, UserId::new("u-2"));
    }

    #[test]
    fn retention_purges_only_old_completed() {
        let q = queue();

        let mut old_done = op("u-1");
        old_done.status = OperationStatus::Completed;
        old_done.processed_at = Some(now_millis() - 8 * MILLIS_PER_DAY);

        let mut fresh_done = op("u-1");
        fresh_done.status = OperationStatus::Completed;
        fresh_done.processed_at = Some(now_millis() - MILLIS_PER_DAY);

        let mut old_failed = op("u-1");
        old_failed.status = OperationStatus::Failed;
        old_failed.created_at = now_millis() - 30 * MILLIS_PER_DAY;

        let old_pending_id = {
            let mut o = op("u-1");
            o.created_at = now_millis() - 30 * MILLIS_PER_DAY;
            let id = o.id;
            q.add_operation(o).unwrap();
            id
        };
        q.add_operation(old_done.clone()).unwrap();
        q.add_operation(fresh_done.clone()).unwrap();
        q.add_operation(old_failed.clone()).unwrap();

        let removed = q.clear_old_operations(7).unwrap();
        assert_eq!(removed, 1);

        let remaining: Vec<_> = q.all_operations().iter().map(|o| o.id).collect();
        assert!(!remaining.contains(&old_done.id));
        assert!(remaining.contains(&fresh_done.id));
        assert!(remaining.contains(&old_failed.id));
        assert!(remaining.contains(&old_pending_id));
    }

    #[test]
    fn retry_delay_doubles_per_attempt() {
        assert_eq!(OperationQueue::<InMemoryStore>::retry_delay(0), BASE_RETRY_DELAY);
        assert_eq!(
            OperationQueue::<InMemoryStore>::retry_delay(1),
            BASE_RETRY_DELAY * 2
        );
        assert_eq!(
            OperationQueue::<InMemoryStore>::retry_delay(4),
            BASE_RETRY_DELAY * 16
        );
    }

    #[test]
    fn due_check_honors_backoff() {
        let mut o = op("u-1");
        let now = now_millis();
        assert!(OperationQueue::<InMemoryStore>::is_due(&o, now));

        o.retry_count = 1;
        o.last_attempt_at = Some(now);
        // 2^1 * 30s = 60s
        assert!(!OperationQueue::<InMemoryStore>::is_due(&o, now + 59_000));
        assert!(OperationQueue::<InMemoryStore>::is_due(&o, now + 60_000));
    }

    #[test]
    fn feed_emits_full_list_on_every_mutation() {
        let q = queue();
        let rx = q.subscribe();

        let o = op("u-1");
        q.add_operation(o.clone()).unwrap();
        assert_eq!(rx.recv().unwrap().len(), 1);

        q.mark_operation_failed(o.id, "net down").unwrap();
        let snapshot = rx.recv().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].retry_count, 1);

        q.remove_operation(o.id).unwrap();
        assert!(rx.recv().unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn failure_count_matches_calls(n in 0u32..12) {
            let q = queue();
            let o = op("u-1");
            let id = o.id;
            q.add_operation(o).unwrap();

            for _ in 0..n {
                q.mark_operation_failed(id, "boom").unwrap();
            }

            let op = q.operation(id).unwrap();
            prop_assert_eq!(op.retry_count, n);
            let expected = if n >= MAX_RETRIES {
                OperationStatus::Failed
            } else {
                OperationStatus::Pending
            };
            prop_assert_eq!(op.status, expected);
        }
    }
}
