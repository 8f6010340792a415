//! In-memory filesystem for tests.
//!
//! Directories are implicit: a path is a directory if any stored file lives
//! under it, or if it was created explicitly with `create_dir_all`.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::FileSystem;

#[derive(Debug, Default)]
struct Inner {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
}

/// A mock filesystem backed by a map.
///
/// Cloning shares the same underlying storage, so a test can hold a handle
/// for assertions while the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileSystem {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryFileSystem {
    /// Create a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file (builder pattern).
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .files
            .insert(PathBuf::from(path), content.as_bytes().to_vec());
        self
    }

    /// Get the content of a file as a string (for test assertions).
    pub fn content(&self, path: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .files
            .get(&PathBuf::from(path))
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// All stored file paths (for test assertions).
    pub fn paths(&self) -> Vec<PathBuf> {
        self.inner.lock().unwrap().files.keys().cloned().collect()
    }
}

fn not_found(path: &Path) -> Error {
    Error::new(ErrorKind::NotFound, format!("File not found: {:?}", path))
}

impl FileSystem for InMemoryFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read_bytes(path)?;
        String::from_utf8(bytes).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }

    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .files
            .insert(path.to_path_buf(), content.to_vec());
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn delete_dir_all(&self, path: &Path) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.files.retain(|p, _| !p.starts_with(path));
        inner.dirs.retain(|p| !p.starts_with(path));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.files.contains_key(path) || inner.dirs.contains(path) || {
            inner.files.keys().any(|p| p.starts_with(path) && p != path)
        }
    }

    fn is_dir(&self, path: &Path) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.dirs.contains(path)
            || inner.files.keys().any(|p| p.starts_with(path) && p != path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            inner.dirs.insert(current.clone());
        }
        Ok(())
    }

    fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.files.contains_key(to) {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("refusing to overwrite {}", to.display()),
            ));
        }
        let content = inner.files.remove(from).ok_or_else(|| not_found(from))?;
        inner.files.insert(to.to_path_buf(), content);
        Ok(())
    }

    fn rename_replace(&self, from: &Path, to: &Path) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let content = inner.files.remove(from).ok_or_else(|| not_found(from))?;
        inner.files.insert(to.to_path_buf(), content);
        Ok(())
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let inner = self.inner.lock().unwrap();
        let mut children = BTreeSet::new();
        for p in inner.files.keys().chain(inner.dirs.iter()) {
            if let Ok(rest) = p.strip_prefix(dir) {
                if let Some(first) = rest.components().next() {
                    children.insert(dir.join(first));
                }
            }
        }
        Ok(children.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let fs = InMemoryFileSystem::new();
        fs.write_file(Path::new("a/b.md"), b"hello").unwrap();
        assert_eq!(fs.read_to_string(Path::new("a/b.md")).unwrap(), "hello");
        assert!(fs.is_dir(Path::new("a")));
    }

    #[test]
    fn test_list_dir_direct_children_only() {
        let fs = InMemoryFileSystem::new()
            .with_file("root/a.md", "a")
            .with_file("root/sub/b.md", "b");
        let children = fs.list_dir(Path::new("root")).unwrap();
        assert_eq!(
            children,
            vec![PathBuf::from("root/a.md"), PathBuf::from("root/sub")]
        );
    }

    #[test]
    fn test_move_refuses_overwrite() {
        let fs = InMemoryFileSystem::new()
            .with_file("a.md", "a")
            .with_file("b.md", "b");
        assert!(fs.move_file(Path::new("a.md"), Path::new("b.md")).is_err());
        assert!(
            fs.rename_replace(Path::new("a.md"), Path::new("b.md"))
                .is_ok()
        );
        assert_eq!(fs.content("b.md").unwrap(), "a");
    }
}
