//! Remote backend abstraction.

use async_trait::async_trait;
use kata_model::time::now_millis;
use kata_model::{Comment, CommentId, CommentKind, ReactionState, UserId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the remote backend.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The entity does not exist (or is gone).
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller may not perform this mutation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A conditional update lost the optimistic-concurrency race.
    #[error("version conflict on {comment_id}: expected {expected}, server has {actual}")]
    VersionConflict {
        /// The contested comment.
        comment_id: CommentId,
        /// Version the client conditioned on.
        expected: u64,
        /// Version the server currently holds.
        actual: u64,
    },

    /// The call did not complete within the per-call timeout.
    #[error("remote call timed out")]
    Timeout,

    /// The network failed below the HTTP layer.
    #[error("network error: {0}")]
    Network(String),

    /// The backend reported a server-side failure.
    #[error("server error: {0}")]
    Server(String),
}

impl RemoteError {
    /// True for failures a retry can plausibly outwait.
    ///
    /// Version conflicts are deliberately *not* transient: they route to
    /// conflict detection, never to the retry path.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Timeout | RemoteError::Network(_) | RemoteError::Server(_)
        )
    }
}

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Versioned CRUD against the hosted backend.
///
/// This trait is the boundary of the sync layer: implementations wrap
/// the app's REST/Postgres client. Collection fetches return raw records
/// so the engine can map each one defensively without a single bad row
/// aborting the batch.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetches the full posts collection as raw records.
    async fn fetch_posts(&self) -> RemoteResult<Vec<serde_json::Value>>;

    /// Fetches one comment, including soft-deleted ones.
    async fn get_comment(&self, kind: CommentKind, id: &CommentId) -> RemoteResult<Comment>;

    /// Creates a comment and returns the stored row.
    async fn create_comment(
        &self,
        kind: CommentKind,
        target_id: &str,
        author: &UserId,
        content: &str,
    ) -> RemoteResult<Comment>;

    /// Conditionally updates a comment's content.
    ///
    /// Fails with [`RemoteError::VersionConflict`] when the stored
    /// version no longer matches `expected_version`.
    async fn update_comment(
        &self,
        kind: CommentKind,
        id: &CommentId,
        content: &str,
        expected_version: u64,
    ) -> RemoteResult<Comment>;

    /// Conditionally soft-deletes a comment.
    async fn delete_comment(
        &self,
        kind: CommentKind,
        id: &CommentId,
        expected_version: u64,
    ) -> RemoteResult<()>;

    /// Lists direct replies of a comment.
    async fn list_replies(
        &self,
        kind: CommentKind,
        parent: &CommentId,
    ) -> RemoteResult<Vec<Comment>>;

    /// Sets or clears the user's like on a comment.
    async fn set_liked(
        &self,
        user: &UserId,
        kind: CommentKind,
        id: &CommentId,
        liked: bool,
    ) -> RemoteResult<()>;

    /// Sets or clears the user's dislike on a comment.
    async fn set_disliked(
        &self,
        user: &UserId,
        kind: CommentKind,
        id: &CommentId,
        disliked: bool,
    ) -> RemoteResult<()>;

    /// Reads the user's authoritative reaction to a comment.
    async fn reaction_state(
        &self,
        user: &UserId,
        kind: CommentKind,
        id: &CommentId,
    ) -> RemoteResult<ReactionState>;
}

type CommentKey = (CommentKind, String);
type ReactionKey = (String, CommentKind, String);

/// An in-memory remote store for tests.
///
/// Behaves like the real backend for the paths the engine exercises:
/// conditional updates race on versions, deletes are soft, and reactions
/// are per-user. Failures can be injected for every call.
#[derive(Default)]
pub struct MockRemoteStore {
    posts: RwLock<Vec<serde_json::Value>>,
    comments: RwLock<HashMap<CommentKey, Comment>>,
    reactions: RwLock<HashMap<ReactionKey, ReactionState>>,
    // (error, remaining uses); None remaining = until cleared
    failure: Mutex<Option<(RemoteError, Option<u32>)>>,
}

impl MockRemoteStore {
    /// Creates an empty mock backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Injects `error` into every following call until cleared.
    pub fn set_failure(&self, error: RemoteError) {
        *self.failure.lock() = Some((error, None));
    }

    /// Injects `error` into the next `times` calls.
    pub fn set_failures(&self, error: RemoteError, times: u32) {
        *self.failure.lock() = Some((error, Some(times)));
    }

    /// Clears any injected failure.
    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    /// Seeds the posts collection with raw records.
    pub fn insert_raw_posts(&self, records: Vec<serde_json::Value>) {
        *self.posts.write() = records;
    }

    /// Seeds a stored comment.
    pub fn insert_comment(&self, comment: Comment) {
        self.comments
            .write()
            .insert((comment.kind, comment.id.as_str().to_string()), comment);
    }

    /// Reads a stored comment back out, bypassing failure injection.
    #[must_use]
    pub fn stored_comment(&self, kind: CommentKind, id: &CommentId) -> Option<Comment> {
        self.comments
            .read()
            .get(&(kind, id.as_str().to_string()))
            .cloned()
    }

    /// Seeds a user's reaction state.
    pub fn seed_reaction(
        &self,
        user: &UserId,
        kind: CommentKind,
        id: &CommentId,
        state: ReactionState,
    ) {
        self.reactions.write().insert(
            (user.as_str().to_string(), kind, id.as_str().to_string()),
            state,
        );
    }

    fn check_failure(&self) -> RemoteResult<()> {
        let mut failure = self.failure.lock();
        match failure.take() {
            None => Ok(()),
            // Budget exhausted; stay healthy from here on.
            Some((_, Some(0))) => Ok(()),
            Some((error, Some(n))) => {
                *failure = Some((error.clone(), Some(n - 1)));
                Err(error)
            }
            Some((error, None)) => {
                *failure = Some((error.clone(), None));
                Err(error)
            }
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn fetch_posts(&self) -> RemoteResult<Vec<serde_json::Value>> {
        self.check_failure()?;
        Ok(self.posts.read().clone())
    }

    async fn get_comment(&self, kind: CommentKind, id: &CommentId) -> RemoteResult<Comment> {
        self.check_failure()?;
        self.comments
            .read()
            .get(&(kind, id.as_str().to_string()))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn create_comment(
        &self,
        kind: CommentKind,
        target_id: &str,
        author: &UserId,
        content: &str,
    ) -> RemoteResult<Comment> {
        self.check_failure()?;
        let now = now_millis();
        let comment = Comment {
            id: CommentId::new(Uuid::new_v4().to_string()),
            kind,
            target_id: target_id.to_string(),
            parent_id: None,
            author_id: author.clone(),
            content: content.to_string(),
            version: 1,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.insert_comment(comment.clone());
        Ok(comment)
    }

    async fn update_comment(
        &self,
        kind: CommentKind,
        id: &CommentId,
        content: &str,
        expected_version: u64,
    ) -> RemoteResult<Comment> {
        self.check_failure()?;
        let mut comments = self.comments.write();
        let comment = comments
            .get_mut(&(kind, id.as_str().to_string()))
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        if comment.version != expected_version {
            return Err(RemoteError::VersionConflict {
                comment_id: id.clone(),
                expected: expected_version,
                actual: comment.version,
            });
        }
        comment.content = content.to_string();
        comment.version += 1;
        comment.updated_at = now_millis();
        Ok(comment.clone())
    }

    async fn delete_comment(
        &self,
        kind: CommentKind,
        id: &CommentId,
        expected_version: u64,
    ) -> RemoteResult<()> {
        self.check_failure()?;
        let mut comments = self.comments.write();
        let comment = comments
            .get_mut(&(kind, id.as_str().to_string()))
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        if comment.version != expected_version {
            return Err(RemoteError::VersionConflict {
                comment_id: id.clone(),
                expected: expected_version,
                actual: comment.version,
            });
        }
        comment.deleted = true;
        comment.version += 1;
        comment.updated_at = now_millis();
        Ok(())
    }

    async fn list_replies(
        &self,
        kind: CommentKind,
        parent: &CommentId,
    ) -> RemoteResult<Vec<Comment>> {
        self.check_failure()?;
        Ok(self
            .comments
            .read()
            .values()
            .filter(|c| c.kind == kind && c.parent_id.as_ref() == Some(parent) && !c.deleted)
            .cloned()
            .collect())
    }

    async fn set_liked(
        &self,
        user: &UserId,
        kind: CommentKind,
        id: &CommentId,
        liked: bool,
    ) -> RemoteResult<()> {
        self.check_failure()?;
        let mut reactions = self.reactions.write();
        let state = reactions
            .entry((user.as_str().to_string(), kind, id.as_str().to_string()))
            .or_default();
        state.liked = liked;
        Ok(())
    }

    async fn set_disliked(
        &self,
        user: &UserId,
        kind: CommentKind,
        id: &CommentId,
        disliked: bool,
    ) -> RemoteResult<()> {
        self.check_failure()?;
        let mut reactions = self.reactions.write();
        let state = reactions
            .entry((user.as_str().to_string(), kind, id.as_str().to_string()))
            .or_default();
        state.disliked = disliked;
        Ok(())
    }

    async fn reaction_state(
        &self,
        user: &UserId,
        kind: CommentKind,
        id: &CommentId,
    ) -> RemoteResult<ReactionState> {
        self.check_failure()?;
        Ok(self
            .reactions
            .read()
            .get(&(user.as_str().to_string(), kind, id.as_str().to_string()))
            .copied()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: &str, version: u64) -> Comment {
        Comment {
            id: CommentId::new(id),
            kind: CommentKind::Post,
            target_id: "p-1".to_string(),
            parent_id: None,
            author_id: UserId::new("u-1"),
            content: "text".to_string(),
            version,
            deleted: false,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn conditional_update_races_on_version() {
        let remote = MockRemoteStore::new();
        remote.insert_comment(comment("c-1", 2));

        let err = remote
            .update_comment(CommentKind::Post, &CommentId::new("c-1"), "new", 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RemoteError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));

        let updated = remote
            .update_comment(CommentKind::Post, &CommentId::new("c-1"), "new", 2)
            .await
            .unwrap();
        assert_eq!(updated.version, 3);
        assert_eq!(updated.content, "new");
    }

    #[tokio::test]
    async fn delete_is_soft() {
        let remote = MockRemoteStore::new();
        remote.insert_comment(comment("c-1", 1));

        remote
            .delete_comment(CommentKind::Post, &CommentId::new("c-1"), 1)
            .await
            .unwrap();

        let gone = remote
            .get_comment(CommentKind::Post, &CommentId::new("c-1"))
            .await
            .unwrap();
        assert!(gone.deleted);
        assert_eq!(gone.version, 2);
    }

    #[tokio::test]
    async fn injected_failures_are_bounded() {
        let remote = MockRemoteStore::new();
        remote.set_failures(RemoteError::Timeout, 2);

        assert!(remote.fetch_posts().await.is_err());
        assert!(remote.fetch_posts().await.is_err());
        assert!(remote.fetch_posts().await.is_ok());
    }

    #[tokio::test]
    async fn reactions_default_neutral_and_persist() {
        let remote = MockRemoteStore::new();
        let user = UserId::new("u-1");
        let id = CommentId::new("c-1");

        let state = remote
            .reaction_state(&user, CommentKind::Post, &id)
            .await
            .unwrap();
        assert_eq!(state, ReactionState::default());

        remote
            .set_liked(&user, CommentKind::Post, &id, true)
            .await
            .unwrap();
        let state = remote
            .reaction_state(&user, CommentKind::Post, &id)
            .await
            .unwrap();
        assert!(state.liked);
        assert!(!state.disliked);
    }

    #[tokio::test]
    async fn replies_filter_by_parent() {
        let remote = MockRemoteStore::new();
        let mut root = comment("c-root", 1);
        root.parent_id = None;
        let mut child = comment("c-child", 1);
        child.parent_id = Some(CommentId::new("c-root"));
        remote.insert_comment(root);
        remote.insert_comment(child);

        let replies = remote
            .list_replies(CommentKind::Post, &CommentId::new("c-root"))
            .await
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].id.as_str(), "c-child");
    }
}
