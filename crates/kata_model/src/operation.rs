//! Offline operation records.

use crate::ids::{CommentId, CommentKind, UserId};
use crate::time::now_millis;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a queued operation, assigned at creation.
pub type OperationId = Uuid;

/// Error message carried by operations that hit a version conflict.
///
/// Operations failed with this message are outside the retry path; they
/// wait for the user to resolve the recorded conflict.
pub const MANUAL_RESOLUTION_ERROR: &str = "manual resolution required";

/// Lifecycle state of a queued operation.
///
/// Operations move `Pending → Processing → {Completed | Pending (retry) |
/// Failed}` and never regress from `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for the next drain cycle.
    Pending,
    /// Picked up by a sync run.
    Processing,
    /// Acknowledged by the backend.
    Completed,
    /// Terminally failed; requires an explicit reset or resolution.
    Failed,
}

/// The typed payload of a queued mutation.
///
/// Decoded once at the queue boundary; each variant carries exactly the
/// parameters its remote call needs. `base_version` is the entity version
/// the client believed was current when the action was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationPayload {
    /// Create a comment on a post or technique.
    AddComment {
        /// Surface the comment targets.
        kind: CommentKind,
        /// Post or technique id.
        target_id: String,
        /// Comment text.
        content: String,
    },
    /// Edit an existing comment's text.
    UpdateComment {
        /// Surface the comment belongs to.
        kind: CommentKind,
        /// Comment to edit.
        comment_id: CommentId,
        /// Replacement text.
        content: String,
        /// Version the edit was based on.
        base_version: u64,
    },
    /// Delete an existing comment.
    DeleteComment {
        /// Surface the comment belongs to.
        kind: CommentKind,
        /// Comment to delete.
        comment_id: CommentId,
        /// Version the deletion was based on.
        base_version: u64,
    },
    /// Set or clear a like.
    ToggleLike {
        /// Surface the comment belongs to.
        kind: CommentKind,
        /// Comment being reacted to.
        comment_id: CommentId,
        /// Desired like state.
        liked: bool,
    },
    /// Set or clear a dislike.
    ToggleDislike {
        /// Surface the comment belongs to.
        kind: CommentKind,
        /// Comment being reacted to.
        comment_id: CommentId,
        /// Desired dislike state.
        disliked: bool,
    },
}

impl OperationPayload {
    /// Stable snake_case name of the operation type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            OperationPayload::AddComment { .. } => "add_comment",
            OperationPayload::UpdateComment { .. } => "update_comment",
            OperationPayload::DeleteComment { .. } => "delete_comment",
            OperationPayload::ToggleLike { .. } => "toggle_like",
            OperationPayload::ToggleDislike { .. } => "toggle_dislike",
        }
    }

    /// The comment this operation targets, when it targets an existing one.
    #[must_use]
    pub fn comment_id(&self) -> Option<&CommentId> {
        match self {
            OperationPayload::AddComment { .. } => None,
            OperationPayload::UpdateComment { comment_id, .. }
            | OperationPayload::DeleteComment { comment_id, .. }
            | OperationPayload::ToggleLike { comment_id, .. }
            | OperationPayload::ToggleDislike { comment_id, .. } => Some(comment_id),
        }
    }

    /// The surface this operation touches.
    #[must_use]
    pub fn comment_kind(&self) -> CommentKind {
        match self {
            OperationPayload::AddComment { kind, .. }
            | OperationPayload::UpdateComment { kind, .. }
            | OperationPayload::DeleteComment { kind, .. }
            | OperationPayload::ToggleLike { kind, .. }
            | OperationPayload::ToggleDislike { kind, .. } => *kind,
        }
    }
}

/// One pending or historical user mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineOperation {
    /// Unique id, assigned at creation.
    pub id: OperationId,
    /// Owning user; used for queue isolation and logout cleanup.
    pub user_id: UserId,
    /// The typed mutation parameters.
    pub payload: OperationPayload,
    /// Lifecycle state.
    pub status: OperationStatus,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Last failure message, if any.
    pub error: Option<String>,
    /// Enqueue time (unix ms).
    pub created_at: i64,
    /// Set only on terminal success (unix ms).
    pub processed_at: Option<i64>,
    /// Time of the most recent failed attempt (unix ms); used to honor
    /// the retry backoff delay.
    pub last_attempt_at: Option<i64>,
}

impl OfflineOperation {
    /// Creates a fresh pending operation for `user_id`.
    #[must_use]
    pub fn new(user_id: UserId, payload: OperationPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            payload,
            status: OperationStatus::Pending,
            retry_count: 0,
            error: None,
            created_at: now_millis(),
            processed_at: None,
            last_attempt_at: None,
        }
    }

    /// True when the operation failed on a version conflict and is
    /// waiting for the user to resolve it.
    #[must_use]
    pub fn requires_manual_resolution(&self) -> bool {
        self.status == OperationStatus::Failed
            && self.error.as_deref() == Some(MANUAL_RESOLUTION_ERROR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> OperationPayload {
        OperationPayload::UpdateComment {
            kind: CommentKind::Post,
            comment_id: CommentId::new("c-1"),
            content: "better".to_string(),
            base_version: 3,
        }
    }

    #[test]
    fn new_operation_starts_pending() {
        let op = OfflineOperation::new(UserId::new("u-1"), sample_payload());
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert!(op.error.is_none());
        assert!(op.processed_at.is_none());
        assert!(op.created_at > 0);
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let json = serde_json::to_value(sample_payload()).unwrap();
        assert_eq!(json["type"], "update_comment");
        assert_eq!(json["comment_id"], "c-1");
        assert_eq!(json["base_version"], 3);
    }

    #[test]
    fn payload_type_names() {
        let add = OperationPayload::AddComment {
            kind: CommentKind::Technique,
            target_id: "t-9".to_string(),
            content: "nice hip throw".to_string(),
        };
        assert_eq!(add.type_name(), "add_comment");
        assert!(add.comment_id().is_none());
        assert_eq!(add.comment_kind(), CommentKind::Technique);

        let like = OperationPayload::ToggleLike {
            kind: CommentKind::Post,
            comment_id: CommentId::new("c-2"),
            liked: true,
        };
        assert_eq!(like.type_name(), "toggle_like");
        assert_eq!(like.comment_id().unwrap().as_str(), "c-2");
    }

    #[test]
    fn operation_roundtrips_through_json() {
        let op = OfflineOperation::new(UserId::new("u-1"), sample_payload());
        let json = serde_json::to_string(&op).unwrap();
        let back: OfflineOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn manual_resolution_detection() {
        let mut op = OfflineOperation::new(UserId::new("u-1"), sample_payload());
        assert!(!op.requires_manual_resolution());

        op.status = OperationStatus::Failed;
        op.error = Some(MANUAL_RESOLUTION_ERROR.to_string());
        assert!(op.requires_manual_resolution());

        op.error = Some("timeout".to_string());
        assert!(!op.requires_manual_resolution());
    }
}
