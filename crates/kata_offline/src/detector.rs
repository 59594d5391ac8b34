//! Divergence classification for versioned comments.

use crate::conflicts::ConflictStore;
use crate::error::OfflineResult;
use async_trait::async_trait;
use kata_model::{
    CommentConflict, CommentId, CommentKind, CommentSnapshot, ConflictKind, ReactionState, UserId,
};
use kata_storage::LocalStore;
use std::sync::Arc;

/// Authoritative like/dislike lookup.
///
/// The reaction sub-check cannot be answered from the snapshots alone;
/// it needs the backend's record of whether the user's reaction is
/// already applied. Implemented by the sync engine over its remote
/// store handle.
#[async_trait]
pub trait ReactionSource: Send + Sync {
    /// Returns the user's current reaction to a comment as the backend
    /// sees it.
    async fn reaction_state(
        &self,
        user: &UserId,
        kind: CommentKind,
        comment_id: &CommentId,
    ) -> OfflineResult<ReactionState>;
}

/// Classifies a local/server divergence from the snapshots alone.
///
/// Rules are evaluated in order and a later applicable rule replaces the
/// earlier classification:
///
/// 1. Differing versions: [`ConflictKind::ConcurrentEdit`] when both
///    sides carry content and it differs, otherwise
///    [`ConflictKind::VersionMismatch`].
/// 2. Server-side deletion while the local state still carries content:
///    [`ConflictKind::DeletedByAnother`], even when versions agree.
///
/// Returns `None` when the snapshots do not diverge. The reaction
/// sub-check is separate ([`ConflictDetector::detect`]) because it needs
/// the authoritative lookup.
#[must_use]
pub fn classify_divergence(
    local: &CommentSnapshot,
    server: &CommentSnapshot,
) -> Option<ConflictKind> {
    let mut kind = None;

    if local.version != server.version {
        kind = Some(match (&local.content, &server.content) {
            (Some(local_content), Some(server_content)) if local_content != server_content => {
                ConflictKind::ConcurrentEdit
            }
            _ => ConflictKind::VersionMismatch,
        });
    }

    if server.deleted && local.content.is_some() {
        kind = Some(ConflictKind::DeletedByAnother);
    }

    kind
}

/// Whether a reaction mutation conflicts with the authoritative state.
///
/// Flags a conflict when the action was already applied server-side
/// (double-apply) or when the local state claims liked and disliked at
/// the same time (invalid local state).
fn reaction_conflict(local: &CommentSnapshot, authoritative: ReactionState) -> bool {
    let double_like = local.liked == Some(true) && authoritative.liked;
    let double_dislike = local.disliked == Some(true) && authoritative.disliked;
    let contradictory = local.liked == Some(true) && local.disliked == Some(true);
    double_like || double_dislike || contradictory
}

/// Detects and records divergences between local and server comment state.
///
/// Detection is side-effect free on the non-conflict path: no record is
/// persisted and repeated calls on identical inputs stay idempotent.
pub struct ConflictDetector<S: LocalStore, R: ReactionSource> {
    conflicts: Arc<ConflictStore<S>>,
    reactions: Arc<R>,
}

impl<S: LocalStore, R: ReactionSource> ConflictDetector<S, R> {
    /// Creates a detector writing into `conflicts` and resolving
    /// reaction state through `reactions`.
    pub fn new(conflicts: Arc<ConflictStore<S>>, reactions: Arc<R>) -> Self {
        Self { conflicts, reactions }
    }

    /// Classifies the divergence between `local` and `server`, records a
    /// conflict when one is found, and returns it.
    ///
    /// The snapshot rules of [`classify_divergence`] run first; when the
    /// local state carries a reaction flag and a user is known, the
    /// authoritative sub-check runs last and - when it flags - overrides
    /// any earlier classification.
    pub async fn detect(
        &self,
        comment_kind: CommentKind,
        comment_id: &CommentId,
        local: &CommentSnapshot,
        server: &CommentSnapshot,
        user: Option<&UserId>,
    ) -> OfflineResult<Option<CommentConflict>> {
        let mut kind = classify_divergence(local, server);

        if local.liked.is_some() || local.disliked.is_some() {
            if let Some(user) = user {
                let authoritative = self
                    .reactions
                    .reaction_state(user, comment_kind, comment_id)
                    .await?;
                if reaction_conflict(local, authoritative) {
                    kind = Some(ConflictKind::LikeDislikeConflict);
                }
            }
        }

        let Some(kind) = kind else {
            return Ok(None);
        };

        let conflict = CommentConflict::new(
            kind,
            comment_kind,
            comment_id.clone(),
            local.clone(),
            server.clone(),
            user.cloned(),
        );
        tracing::info!(
            conflict_id = %conflict.id,
            kind = conflict.kind.as_str(),
            "recorded comment conflict"
        );
        self.conflicts.record_conflict(conflict.clone())?;
        Ok(Some(conflict))
    }
}
