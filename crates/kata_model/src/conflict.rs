//! Comment conflict records and the resolution projection.

use crate::entity::Comment;
use crate::ids::{CommentId, CommentKind, UserId};
use crate::time::now_millis;
use serde::{Deserialize, Serialize};

/// Classification of a detected local/server divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Versions differ but the content does not (or is absent).
    VersionMismatch,
    /// Versions differ and both sides edited the content.
    ConcurrentEdit,
    /// The comment was deleted server-side while the local edit kept content.
    DeletedByAnother,
    /// A like/dislike was already applied, or local state claims both.
    LikeDislikeConflict,
}

impl ConflictKind {
    /// Stable snake_case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::VersionMismatch => "version_mismatch",
            ConflictKind::ConcurrentEdit => "concurrent_edit",
            ConflictKind::DeletedByAnother => "deleted_by_another",
            ConflictKind::LikeDislikeConflict => "like_dislike_conflict",
        }
    }
}

/// The user's decision for a recorded conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the local snapshot.
    KeepLocal,
    /// Accept the server snapshot.
    KeepServer,
    /// Overlay local content onto the server snapshot.
    Merge,
    /// Drop the local change; equivalent to accepting the server.
    Discard,
}

/// Full capture of one side of a divergence at detection time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentSnapshot {
    /// Optimistic-concurrency version.
    pub version: u64,
    /// Comment text, absent for deletions and pure reaction changes.
    pub content: Option<String>,
    /// Whether the comment is (soft-)deleted on this side.
    #[serde(default)]
    pub deleted: bool,
    /// Like flag carried by a reaction mutation.
    pub liked: Option<bool>,
    /// Dislike flag carried by a reaction mutation.
    pub disliked: Option<bool>,
    /// Comment author, when known.
    pub author_id: Option<UserId>,
    /// Last update time (unix ms), when known.
    pub updated_at: Option<i64>,
}

impl CommentSnapshot {
    /// Captures the authoritative server state of a comment.
    #[must_use]
    pub fn from_comment(comment: &Comment) -> Self {
        Self {
            version: comment.version,
            content: if comment.deleted {
                None
            } else {
                Some(comment.content.clone())
            },
            deleted: comment.deleted,
            liked: None,
            disliked: None,
            author_id: Some(comment.author_id.clone()),
            updated_at: Some(comment.updated_at),
        }
    }

    /// A snapshot representing a comment the server no longer has.
    #[must_use]
    pub fn deleted_on_server(version: u64) -> Self {
        Self {
            version,
            deleted: true,
            ..Self::default()
        }
    }
}

/// A detected divergence awaiting a resolution decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentConflict {
    /// Unique per detection event: `{comment_kind}:{comment_id}:{detected_at}`.
    pub id: String,
    /// Divergence classification.
    pub kind: ConflictKind,
    /// Surface of the affected comment.
    pub comment_kind: CommentKind,
    /// The affected comment.
    pub comment_id: CommentId,
    /// Local state at detection time.
    pub local: CommentSnapshot,
    /// Server state at detection time.
    pub server: CommentSnapshot,
    /// Detection time (unix ms).
    pub detected_at: i64,
    /// User whose mutation triggered detection, when known.
    pub user_id: Option<UserId>,
    /// Whether a resolution has been recorded.
    pub resolved: bool,
    /// The recorded resolution, set exactly once.
    pub resolution: Option<Resolution>,
}

impl CommentConflict {
    /// Creates an unresolved conflict detected now.
    #[must_use]
    pub fn new(
        kind: ConflictKind,
        comment_kind: CommentKind,
        comment_id: CommentId,
        local: CommentSnapshot,
        server: CommentSnapshot,
        user_id: Option<UserId>,
    ) -> Self {
        let detected_at = now_millis();
        Self {
            id: format!("{comment_kind}:{comment_id}:{detected_at}"),
            kind,
            comment_kind,
            comment_id,
            local,
            server,
            detected_at,
            user_id,
            resolved: false,
            resolution: None,
        }
    }

    /// Projects the final data for a resolution decision.
    ///
    /// Pure with respect to the conflict record:
    /// - `KeepLocal` yields the local snapshot
    /// - `KeepServer` and `Discard` yield the server snapshot
    /// - `Merge` yields the server snapshot with local content overlaid,
    ///   `updated_at` stamped to now, and
    ///   `version = max(local.version, server.version + 1)`
    ///
    /// Reaction conflicts cannot be merged (boolean flags have no merge);
    /// `Merge` on a [`ConflictKind::LikeDislikeConflict`] falls back to
    /// the server snapshot.
    #[must_use]
    pub fn project(&self, resolution: Resolution) -> CommentSnapshot {
        match resolution {
            Resolution::KeepLocal => self.local.clone(),
            Resolution::KeepServer | Resolution::Discard => self.server.clone(),
            Resolution::Merge => {
                if self.kind == ConflictKind::LikeDislikeConflict {
                    return self.server.clone();
                }
                let mut merged = self.server.clone();
                if let Some(content) = &self.local.content {
                    merged.content = Some(content.clone());
                }
                merged.updated_at = Some(now_millis());
                merged.version = self.local.version.max(self.server.version + 1);
                merged
            }
        }
    }
}
