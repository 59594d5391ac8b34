//! File-based store for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::store::LocalStore;
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A file-based key-value store.
///
/// Each key maps to one file under a root directory. Values survive
/// process restarts.
///
/// # Durability
///
/// Writes go to a temporary sibling file which is then renamed over the
/// target, so a crash mid-write never leaves a half-written value behind.
///
/// # Key Mapping
///
/// Keys may contain `/` as a logical namespace separator; separators are
/// encoded into the file name, so the directory stays flat and a key can
/// never escape the root.
///
/// # Example
///
/// ```no_run
/// use kata_storage::{FileStore, LocalStore};
///
/// let store = FileStore::open("/data/kata").unwrap();
/// store.set("queue/operations", "").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    // Serializes the write/rename pair; readers go straight to the fs.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let root = dir.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let name = encode_key(key)?;
        Ok(self.root.join(name))
    }
}

/// Encodes a key into a flat file name.
///
/// `/` becomes `__`, and the only other characters allowed through are
/// alphanumerics, `-`, `_`, and `.`. Anything else rejects the key rather
/// than risking a surprising path on some platform.
fn encode_key(key: &str) -> StorageResult<String> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }

    let mut name = String::with_capacity(key.len());
    for ch in key.chars() {
        match ch {
            '/' => name.push_str("__"),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => name.push(c),
            c => {
                return Err(StorageError::InvalidKey(format!(
                    "key {key:?} contains unsupported character {c:?}"
                )))
            }
        }
    }

    if name == "." || name == ".." {
        return Err(StorageError::InvalidKey(format!("reserved key {key:?}")));
    }

    Ok(name)
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock();

        // `#` cannot appear in an encoded key, so the temp name never
        // collides with another key's file.
        let mut tmp = path.clone().into_os_string();
        tmp.push("#tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_open_creates_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("store");

        let store = FileStore::open(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(store.root(), root);
    }

    #[test]
    fn file_set_then_get() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("queue/operations", "line one\nline two").unwrap();
        assert_eq!(
            store.get("queue/operations").unwrap().as_deref(),
            Some("line one\nline two")
        );
    }

    #[test]
    fn file_get_absent_returns_none() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn file_remove_absent_is_noop() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.remove("missing").is_ok());
    }

    #[test]
    fn file_set_overwrites() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("a", "1").unwrap();
        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn file_persistence_across_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(dir.path()).unwrap();
            store.set("cache/posts", "persisted").unwrap();
        }

        {
            let store = FileStore::open(dir.path()).unwrap();
            assert_eq!(
                store.get("cache/posts").unwrap().as_deref(),
                Some("persisted")
            );
        }
    }

    #[test]
    fn file_namespaced_keys_do_not_collide() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("cache/posts", "a").unwrap();
        store.set("cache/posts/synced_at", "b").unwrap();

        assert_eq!(store.get("cache/posts").unwrap().as_deref(), Some("a"));
        assert_eq!(
            store.get("cache/posts/synced_at").unwrap().as_deref(),
            Some("b")
        );
    }

    #[test]
    fn file_rejects_empty_key() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.set("", "x"),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn file_rejects_traversal_key() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.get("spaced key"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            store.get(".."),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn file_empty_value_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("empty", "").unwrap();
        assert_eq!(store.get("empty").unwrap().as_deref(), Some(""));
    }
}
