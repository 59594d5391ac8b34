//! Validity-window cache of server snapshots.

use crate::error::OfflineResult;
use kata_model::time::now_millis;
use kata_model::{Comment, CommentId, CommentKind, Post};
use kata_storage::LocalStore;
use std::sync::Arc;
use std::time::Duration;

/// How long a cached snapshot counts as fresh.
pub const DEFAULT_CACHE_VALIDITY: Duration = Duration::from_secs(24 * 60 * 60);

const POSTS_KEY: &str = "cache/posts";
const POSTS_SYNCED_KEY: &str = "cache/posts/synced_at";
const COMMENT_INDEX_KEY: &str = "cache/comment/index";

/// Local snapshots of server collections and entities.
///
/// Validity is a pure function of `now - last_synced < validity_window`.
/// An expired or unreadable snapshot is cleared and reported absent -
/// stale data is never served as fresh.
pub struct SnapshotCache<S: LocalStore> {
    store: Arc<S>,
    validity: Duration,
}

impl<S: LocalStore> SnapshotCache<S> {
    /// Creates a cache with the default 24 hour validity window.
    pub fn new(store: Arc<S>) -> Self {
        Self::with_validity(store, DEFAULT_CACHE_VALIDITY)
    }

    /// Creates a cache with a custom validity window.
    pub fn with_validity(store: Arc<S>, validity: Duration) -> Self {
        Self { store, validity }
    }

    /// The configured validity window.
    #[must_use]
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Overwrites the cached posts collection and stamps the sync time.
    pub fn store_posts(&self, posts: &[Post]) -> OfflineResult<()> {
        let mut lines = Vec::with_capacity(posts.len());
        for post in posts {
            lines.push(serde_json::to_string(post)?);
        }
        self.store.set(POSTS_KEY, &lines.join("\n"))?;
        self.store.set(POSTS_SYNCED_KEY, &now_millis().to_string())?;
        Ok(())
    }

    /// Returns the cached posts when still within the validity window.
    ///
    /// An expired, unstamped, or unreadable snapshot is cleared and `None`
    /// is returned. Individual corrupt records inside a fresh snapshot
    /// are dropped with a warning.
    pub fn valid_posts(&self) -> OfflineResult<Option<Vec<Post>>> {
        if !self.posts_fresh()? {
            self.clear_posts()?;
            return Ok(None);
        }

        let Some(raw) = self.store.get(POSTS_KEY)? else {
            return Ok(None);
        };

        let mut posts = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<Post>(line) {
                Ok(post) => posts.push(post),
                Err(e) => tracing::warn!("dropping corrupt cached post: {e}"),
            }
        }
        Ok(Some(posts))
    }

    /// When the posts collection was last synced, if ever.
    pub fn posts_last_synced(&self) -> OfflineResult<Option<i64>> {
        let Some(raw) = self.store.get(POSTS_SYNCED_KEY)? else {
            return Ok(None);
        };
        match raw.trim().parse::<i64>() {
            Ok(ts) => Ok(Some(ts)),
            Err(_) => {
                tracing::warn!("unreadable posts sync timestamp, treating cache as expired");
                Ok(None)
            }
        }
    }

    /// Removes the cached posts collection and its timestamp.
    pub fn clear_posts(&self) -> OfflineResult<()> {
        self.store.remove(POSTS_KEY)?;
        self.store.remove(POSTS_SYNCED_KEY)?;
        Ok(())
    }

    /// Caches a single comment snapshot, stamping its cache time.
    pub fn store_comment(&self, comment: &Comment) -> OfflineResult<()> {
        let key = comment_key(comment.kind, &comment.id);
        self.store.set(&key, &serde_json::to_string(comment)?)?;
        self.store
            .set(&stamp_key(&key), &now_millis().to_string())?;
        self.index_add(&key)?;
        Ok(())
    }

    /// Returns a cached comment when still within the validity window.
    ///
    /// Expired or unreadable entries are invalidated and reported absent.
    pub fn valid_comment(
        &self,
        kind: CommentKind,
        comment_id: &CommentId,
    ) -> OfflineResult<Option<Comment>> {
        let key = comment_key(kind, comment_id);

        let fresh = match self.read_stamp(&stamp_key(&key))? {
            Some(cached_at) => self.is_fresh(cached_at, now_millis()),
            None => false,
        };
        if !fresh {
            self.invalidate_comment(kind, comment_id)?;
            return Ok(None);
        }

        let Some(raw) = self.store.get(&key)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Comment>(&raw) {
            Ok(comment) => Ok(Some(comment)),
            Err(e) => {
                tracing::warn!("dropping corrupt cached comment {key}: {e}");
                self.invalidate_comment(kind, comment_id)?;
                Ok(None)
            }
        }
    }

    /// Drops the cached snapshot of one comment.
    ///
    /// Called by the sync engine after a drained operation mutates the
    /// comment, so the next read refetches authoritative state.
    pub fn invalidate_comment(
        &self,
        kind: CommentKind,
        comment_id: &CommentId,
    ) -> OfflineResult<()> {
        let key = comment_key(kind, comment_id);
        self.store.remove(&key)?;
        self.store.remove(&stamp_key(&key))?;
        self.index_remove(&key)?;
        Ok(())
    }

    /// Removes everything the cache holds.
    pub fn clear(&self) -> OfflineResult<()> {
        self.clear_posts()?;
        for key in self.indexed_keys()? {
            self.store.remove(&key)?;
            self.store.remove(&stamp_key(&key))?;
        }
        self.store.remove(COMMENT_INDEX_KEY)?;
        Ok(())
    }

    /// Pure freshness judgment.
    #[must_use]
    pub fn is_fresh(&self, synced_at: i64, now: i64) -> bool {
        let window = i64::try_from(self.validity.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(synced_at) < window
    }

    fn posts_fresh(&self) -> OfflineResult<bool> {
        Ok(match self.posts_last_synced()? {
            Some(synced_at) => self.is_fresh(synced_at, now_millis()),
            None => false,
        })
    }

    fn read_stamp(&self, key: &str) -> OfflineResult<Option<i64>> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        Ok(raw.trim().parse::<i64>().ok())
    }

    /// Comment cache keys are tracked in an index so `clear` can find
    /// them without store-level enumeration.
    fn indexed_keys(&self) -> OfflineResult<Vec<String>> {
        let Some(raw) = self.store.get(COMMENT_INDEX_KEY)? else {
            return Ok(Vec::new());
        };
        Ok(raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    fn index_add(&self, key: &str) -> OfflineResult<()> {
        let mut keys = self.indexed_keys()?;
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
            self.store.set(COMMENT_INDEX_KEY, &keys.join("\n"))?;
        }
        Ok(())
    }

    fn index_remove(&self, key: &str) -> OfflineResult<()> {
        let mut keys = self.indexed_keys()?;
        let before = keys.len();
        keys.retain(|k| k != key);
        if keys.len() != before {
            self.store.set(COMMENT_INDEX_KEY, &keys.join("\n"))?;
        }
        Ok(())
    }
}

fn comment_key(kind: CommentKind, comment_id: &CommentId) -> String {
    format!("cache/comment/{kind}/{comment_id}")
}

fn stamp_key(key: &str) -> String {
    format!("{key}/cached_at")
}
