//! Persisted conflict records and the resolution lifecycle.

use crate::error::{OfflineError, OfflineResult};
use crate::feed::SnapshotFeed;
use kata_model::time::{now_millis, MILLIS_PER_DAY};
use kata_model::{CommentConflict, CommentId, CommentKind, CommentSnapshot, ConflictKind, Resolution, UserId};
use kata_storage::LocalStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Storage key holding serialized conflicts, one per line.
const CONFLICTS_KEY: &str = "conflicts/records";

/// Aggregate counts over the recorded conflicts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictStats {
    /// All recorded conflicts.
    pub total: usize,
    /// Conflicts carrying a resolution.
    pub resolved: usize,
    /// Conflicts awaiting a decision.
    pub unresolved: usize,
    /// Count per divergence classification.
    pub by_kind: HashMap<ConflictKind, usize>,
}

/// Durable store of detected conflicts and resolution decisions.
///
/// Emits the full unresolved list on the live feed after every change.
/// A resolved conflict is immutable apart from the single resolution
/// write that resolved it.
pub struct ConflictStore<S: LocalStore> {
    store: Arc<S>,
    conflicts: RwLock<Vec<CommentConflict>>,
    feed: SnapshotFeed<Vec<CommentConflict>>,
}

impl<S: LocalStore> ConflictStore<S> {
    /// Opens the store, loading any persisted conflicts.
    pub fn new(store: Arc<S>) -> Self {
        let conflicts = load_conflicts(store.as_ref());
        Self {
            store,
            conflicts: RwLock::new(conflicts),
            feed: SnapshotFeed::new(),
        }
    }

    /// Persists a freshly detected conflict.
    pub fn record_conflict(&self, conflict: CommentConflict) -> OfflineResult<()> {
        let mut conflicts = self.conflicts.write();
        conflicts.push(conflict);
        self.persist(&conflicts)?;
        let unresolved = unresolved_of(&conflicts);
        drop(conflicts);
        self.feed.emit(unresolved);
        Ok(())
    }

    /// Records the user's decision for the conflict with `id`.
    ///
    /// # Errors
    ///
    /// [`OfflineError::ConflictNotFound`] for unknown ids and
    /// [`OfflineError::ConflictAlreadyResolved`] when a decision was
    /// already recorded.
    pub fn resolve_conflict(&self, id: &str, resolution: Resolution) -> OfflineResult<()> {
        let mut conflicts = self.conflicts.write();
        let conflict = conflicts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| OfflineError::ConflictNotFound(id.to_string()))?;
        if conflict.resolved {
            return Err(OfflineError::ConflictAlreadyResolved(id.to_string()));
        }
        conflict.resolved = true;
        conflict.resolution = Some(resolution);
        self.persist(&conflicts)?;
        let unresolved = unresolved_of(&conflicts);
        drop(conflicts);
        self.feed.emit(unresolved);
        Ok(())
    }

    /// Projects the final data for a resolved conflict.
    ///
    /// # Errors
    ///
    /// [`OfflineError::ConflictNotFound`] for unknown ids and
    /// [`OfflineError::ConflictUnresolved`] when no decision has been
    /// recorded yet.
    pub fn apply_resolution(&self, id: &str) -> OfflineResult<CommentSnapshot> {
        let conflicts = self.conflicts.read();
        let conflict = conflicts
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| OfflineError::ConflictNotFound(id.to_string()))?;
        let resolution = conflict
            .resolution
            .ok_or_else(|| OfflineError::ConflictUnresolved(id.to_string()))?;
        Ok(conflict.project(resolution))
    }

    /// Returns the conflict with `id`, if recorded.
    #[must_use]
    pub fn conflict(&self, id: &str) -> Option<CommentConflict> {
        self.conflicts.read().iter().find(|c| c.id == id).cloned()
    }

    /// Returns all recorded conflicts, oldest first.
    #[must_use]
    pub fn all_conflicts(&self) -> Vec<CommentConflict> {
        self.conflicts.read().clone()
    }

    /// Returns every conflict still awaiting a decision.
    #[must_use]
    pub fn unresolved_conflicts(&self) -> Vec<CommentConflict> {
        unresolved_of(&self.conflicts.read())
    }

    /// Returns unresolved conflicts scoped to one comment.
    #[must_use]
    pub fn unresolved_for_comment(
        &self,
        comment_kind: CommentKind,
        comment_id: &CommentId,
    ) -> Vec<CommentConflict> {
        self.conflicts
            .read()
            .iter()
            .filter(|c| {
                !c.resolved && c.comment_kind == comment_kind && &c.comment_id == comment_id
            })
            .cloned()
            .collect()
    }

    /// Aggregate counts, including the per-kind histogram.
    #[must_use]
    pub fn conflict_stats(&self) -> ConflictStats {
        let conflicts = self.conflicts.read();
        let mut stats = ConflictStats {
            total: conflicts.len(),
            ..ConflictStats::default()
        };
        for conflict in conflicts.iter() {
            if conflict.resolved {
                stats.resolved += 1;
            } else {
                stats.unresolved += 1;
            }
            *stats.by_kind.entry(conflict.kind).or_insert(0) += 1;
        }
        stats
    }

    /// Purges resolved conflicts older than `days_old` days.
    ///
    /// Unresolved conflicts are never auto-purged regardless of age.
    /// Returns the number of purged conflicts.
    pub fn cleanup_resolved_conflicts(&self, days_old: i64) -> OfflineResult<usize> {
        let cutoff = now_millis() - days_old * MILLIS_PER_DAY;
        let mut conflicts = self.conflicts.write();
        let before = conflicts.len();
        conflicts.retain(|c| !c.resolved || c.detected_at >= cutoff);
        let removed = before - conflicts.len();
        if removed > 0 {
            self.persist(&conflicts)?;
            let unresolved = unresolved_of(&conflicts);
            drop(conflicts);
            self.feed.emit(unresolved);
        }
        Ok(removed)
    }

    /// Purges every conflict attributed to `user_id`. Used on sign-out
    /// together with the queue purge.
    pub fn clear_conflicts_for_user(&self, user_id: &UserId) -> OfflineResult<()> {
        let mut conflicts = self.conflicts.write();
        let before = conflicts.len();
        conflicts.retain(|c| c.user_id.as_ref() != Some(user_id));
        if before == conflicts.len() {
            return Ok(());
        }
        self.persist(&conflicts)?;
        let unresolved = unresolved_of(&conflicts);
        drop(conflicts);
        self.feed.emit(unresolved);
        Ok(())
    }

    /// Subscribes to the live unresolved-conflict feed.
    pub fn subscribe(&self) -> Receiver<Vec<CommentConflict>> {
        self.feed.subscribe()
    }

    fn persist(&self, conflicts: &[CommentConflict]) -> OfflineResult<()> {
        let mut lines = Vec::with_capacity(conflicts.len());
        for conflict in conflicts {
            lines.push(serde_json::to_string(conflict)?);
        }
        self.store.set(CONFLICTS_KEY, &lines.join("\n"))?;
        Ok(())
    }
}

fn unresolved_of(conflicts: &[CommentConflict]) -> Vec<CommentConflict> {
    conflicts.iter().filter(|c| !c.resolved).cloned().collect()
}

/// Loads persisted conflicts, dropping unreadable records.
fn load_conflicts<S: LocalStore>(store: &S) -> Vec<CommentConflict> {
    let raw = match store.get(CONFLICTS_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!("failed to read persisted conflicts, starting empty: {e}");
            return Vec::new();
        }
    };

    let mut conflicts = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<CommentConflict>(line) {
            Ok(conflict) => conflicts.push(conflict),
            Err(e) => tracing::warn!("dropping corrupt conflict record: {e}"),
        }
    }
    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use kata_storage::InMemoryStore;

    fn store() -> ConflictStore<InMemoryStore> {
        ConflictStore::new(Arc::new(InMemoryStore::new()))
    }

    fn conflict(kind: ConflictKind, comment: &str) -> CommentConflict {
        CommentConflict::new(
            kind,
            CommentKind::Post,
            CommentId::new(comment),
            CommentSnapshot {
                version: 1,
                content: Some("mine".to_string()),
                ..CommentSnapshot::default()
            },
            CommentSnapshot {
                version: 2,
                content: Some("theirs".to_string()),
                ..CommentSnapshot::default()
            },
            Some(UserId::new("u-1")),
        )
    }

    #[test]
    fn record_and_query() {
        let s = store();
        let c = conflict(ConflictKind::ConcurrentEdit, "c-1");
        s.record_conflict(c.clone()).unwrap();

        assert_eq!(s.unresolved_conflicts(), vec![c.clone()]);
        assert_eq!(
            s.unresolved_for_comment(CommentKind::Post, &CommentId::new("c-1")),
            vec![c.clone()]
        );
        assert!(s
            .unresolved_for_comment(CommentKind::Technique, &CommentId::new("c-1"))
            .is_empty());
        assert_eq!(s.conflict(&c.id).unwrap(), c);
    }

    #[test]
    fn resolve_marks_and_republishes() {
        let s = store();
        let rx = s.subscribe();
        let c = conflict(ConflictKind::ConcurrentEdit, "c-1");
        s.record_conflict(c.clone()).unwrap();
        assert_eq!(rx.recv().unwrap().len(), 1);

        s.resolve_conflict(&c.id, Resolution::KeepServer).unwrap();
        assert!(rx.recv().unwrap().is_empty());

        let resolved = s.conflict(&c.id).unwrap();
        assert!(resolved.resolved);
        assert_eq!(resolved.resolution, Some(Resolution::KeepServer));
    }

    #[test]
    fn resolve_is_single_shot() {
        let s = store();
        let c = conflict(ConflictKind::ConcurrentEdit, "c-1");
        s.record_conflict(c.clone()).unwrap();

        s.resolve_conflict(&c.id, Resolution::KeepLocal).unwrap();
        let second = s.resolve_conflict(&c.id, Resolution::KeepServer);
        assert!(matches!(
            second,
            Err(OfflineError::ConflictAlreadyResolved(_))
        ));
        // First decision stands.
        assert_eq!(
            s.conflict(&c.id).unwrap().resolution,
            Some(Resolution::KeepLocal)
        );
    }

    #[test]
    fn resolve_unknown_id_errors() {
        let s = store();
        assert!(matches!(
            s.resolve_conflict("nope", Resolution::Merge),
            Err(OfflineError::ConflictNotFound(_))
        ));
    }

    #[test]
    fn apply_resolution_requires_decision() {
        let s = store();
        let c = conflict(ConflictKind::ConcurrentEdit, "c-1");
        s.record_conflict(c.clone()).unwrap();

        assert!(matches!(
            s.apply_resolution(&c.id),
            Err(OfflineError::ConflictUnresolved(_))
        ));

        s.resolve_conflict(&c.id, Resolution::KeepLocal).unwrap();
        let data = s.apply_resolution(&c.id).unwrap();
        assert_eq!(data.content.as_deref(), Some("mine"));
    }

    #[test]
    fn stats_histogram() {
        let s = store();
        s.record_conflict(conflict(ConflictKind::ConcurrentEdit, "c-1"))
            .unwrap();
        s.record_conflict(conflict(ConflictKind::ConcurrentEdit, "c-2"))
            .unwrap();
        let resolved = conflict(ConflictKind::VersionMismatch, "c-3");
        s.record_conflict(resolved.clone()).unwrap();
        s.resolve_conflict(&resolved.id, Resolution::Discard).unwrap();

        let stats = s.conflict_stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.unresolved, 2);
        assert_eq!(stats.by_kind[&ConflictKind::ConcurrentEdit], 2);
        assert_eq!(stats.by_kind[&ConflictKind::VersionMismatch], 1);
    }

    #[test]
    fn cleanup_respects_age_and_resolution() {
        let s = store();

        let mut old_resolved = conflict(ConflictKind::ConcurrentEdit, "c-old");
        old_resolved.detected_at = now_millis() - 8 * MILLIS_PER_DAY;
        old_resolved.resolved = true;
        old_resolved.resolution = Some(Resolution::KeepServer);

        let mut fresh_resolved = conflict(ConflictKind::ConcurrentEdit, "c-fresh");
        fresh_resolved.detected_at = now_millis() - MILLIS_PER_DAY;
        fresh_resolved.resolved = true;
        fresh_resolved.resolution = Some(Resolution::KeepServer);

        let mut old_unresolved = conflict(ConflictKind::VersionMismatch, "c-open");
        old_unresolved.detected_at = now_millis() - 90 * MILLIS_PER_DAY;

        s.record_conflict(old_resolved.clone()).unwrap();
        s.record_conflict(fresh_resolved.clone()).unwrap();
        s.record_conflict(old_unresolved.clone()).unwrap();

        let removed = s.cleanup_resolved_conflicts(7).unwrap();
        assert_eq!(removed, 1);

        let ids: Vec<_> = s.all_conflicts().iter().map(|c| c.id.clone()).collect();
        assert!(!ids.contains(&old_resolved.id));
        assert!(ids.contains(&fresh_resolved.id));
        assert!(ids.contains(&old_unresolved.id));
    }

    #[test]
    fn user_purge_removes_attributed_conflicts() {
        let s = store();
        let mine = conflict(ConflictKind::ConcurrentEdit, "c-1");
        let mut other = conflict(ConflictKind::ConcurrentEdit, "c-2");
        other.user_id = Some(UserId::new("u-2"));
        let mut anonymous = conflict(ConflictKind::ConcurrentEdit, "c-3");
        anonymous.user_id = None;

        s.record_conflict(mine.clone()).unwrap();
        s.record_conflict(other.clone()).unwrap();
        s.record_conflict(anonymous.clone()).unwrap();

        s.clear_conflicts_for_user(&UserId::new("u-1")).unwrap();
        let ids: Vec<_> = s.all_conflicts().iter().map(|c| c.id.clone()).collect();
        assert!(!ids.contains(&mine.id));
        assert!(ids.contains(&other.id));
        assert!(ids.contains(&anonymous.id));
    }

    #[test]
    fn conflicts_survive_reopen() {
        let backing = Arc::new(InMemoryStore::new());
        let c = conflict(ConflictKind::DeletedByAnother, "c-1");
        {
            let s = ConflictStore::new(Arc::clone(&backing));
            s.record_conflict(c.clone()).unwrap();
        }

        let s = ConflictStore::new(backing);
        assert_eq!(s.all_conflicts(), vec![c]);
    }
}
