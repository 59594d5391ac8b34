//! Id newtypes for the entities the sync layer touches.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user id from its backend string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a comment on some target entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(String);

impl CommentId {
    /// Creates a comment id from its backend string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a community post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    /// Creates a post id from its backend string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The comment-bearing surfaces of the app.
///
/// Comments attach either to community posts or to technique pages;
/// the backend stores them in separate tables, so every comment
/// reference carries its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    /// Comment on a community post.
    Post,
    /// Comment on a technique page.
    Technique,
}

impl CommentKind {
    /// Stable string form, used in storage keys and conflict ids.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentKind::Post => "post",
            CommentKind::Technique => "technique",
        }
    }
}

impl fmt::Display for CommentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_transparently() {
        let user = UserId::new("u-1");
        assert_eq!(serde_json::to_string(&user).unwrap(), "\"u-1\"");

        let back: UserId = serde_json::from_str("\"u-1\"").unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn comment_kind_strings() {
        assert_eq!(CommentKind::Post.as_str(), "post");
        assert_eq!(CommentKind::Technique.as_str(), "technique");
        assert_eq!(
            serde_json::to_string(&CommentKind::Technique).unwrap(),
            "\"technique\""
        );
    }
}
