//! Server-side entity models mirrored by the sync layer.

use crate::ids::{CommentId, CommentKind, PostId, UserId};
use serde::{Deserialize, Serialize};

/// A community post as served by the backend.
///
/// Posts are versioned with a monotonically increasing integer used for
/// optimistic concurrency; the sync layer caches full post collections
/// and never mutates them locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Backend row id.
    pub id: PostId,
    /// Author of the post.
    pub author_id: UserId,
    /// Post title.
    pub title: String,
    /// Post body.
    pub body: String,
    /// Optimistic-concurrency version.
    pub version: u64,
    /// Creation time (unix ms).
    pub created_at: i64,
    /// Last update time (unix ms).
    pub updated_at: i64,
}

/// A comment as served by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Backend row id.
    pub id: CommentId,
    /// Which surface the comment belongs to.
    pub kind: CommentKind,
    /// Id of the post or technique the comment is attached to.
    pub target_id: String,
    /// Parent comment when this is a reply.
    #[serde(default)]
    pub parent_id: Option<CommentId>,
    /// Author of the comment.
    pub author_id: UserId,
    /// Comment text.
    pub content: String,
    /// Optimistic-concurrency version.
    pub version: u64,
    /// Soft-delete marker set by the backend.
    #[serde(default)]
    pub deleted: bool,
    /// Creation time (unix ms).
    pub created_at: i64,
    /// Last update time (unix ms).
    pub updated_at: i64,
}

/// A user's authoritative like/dislike state for one comment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionState {
    /// The user has an active like on the comment.
    pub liked: bool,
    /// The user has an active dislike on the comment.
    pub disliked: bool,
}
