//! Workspace layout and locking.
//!
//! ```text
//! <workspace>/
//!   .pagesync/
//!     config.toml      # workspace-scoped configuration
//!     state.json       # state store
//!     lock             # advisory lock, single engine per workspace
//!   <Doc>.md           # leaf page
//!   <Container>/
//!     _index.md        # container page's own content
//!     <Child>.md
//!   <Database>/
//!     _schema.yaml     # database schema (properties, views)
//!     <Entry>.md       # database entries (frontmatter = properties)
//! ```
//!
//! The lock file ensures only one engine runs against a workspace at a time.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::config::WorkspaceConfig;
use crate::error::{Result, SyncError};
use crate::fs::FileSystem;

/// Metadata directory name inside a workspace.
pub const META_DIR: &str = ".pagesync";
/// Workspace config file name inside the metadata directory.
pub const CONFIG_FILE: &str = "config.toml";
/// State store file name inside the metadata directory.
pub const STATE_FILE: &str = "state.json";
/// Lock file name inside the metadata directory.
pub const LOCK_FILE: &str = "lock";
/// A container page's own content inside its directory.
pub const INDEX_FILE: &str = "_index.md";
/// A database's schema file inside its directory.
pub const SCHEMA_FILE: &str = "_schema.yaml";

/// A local directory bound to a remote root document.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Absolute path of the workspace root
    pub root: PathBuf,
    /// Workspace configuration
    pub config: WorkspaceConfig,
}

impl Workspace {
    /// Create a new workspace at `root` bound to the given config.
    ///
    /// Errors with `WorkspaceAlreadyExists` if a metadata directory is
    /// already present.
    pub fn init<FS: FileSystem>(fs: &FS, root: &Path, config: WorkspaceConfig) -> Result<Self> {
        let meta = root.join(META_DIR);
        if fs.exists(&meta) {
            return Err(SyncError::WorkspaceAlreadyExists(root.to_path_buf()));
        }
        fs.create_dir_all(&meta)?;
        config.save_to(fs, &meta.join(CONFIG_FILE))?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    /// Open an existing workspace at `root`.
    pub fn open<FS: FileSystem>(fs: &FS, root: &Path) -> Result<Self> {
        let config_path = root.join(META_DIR).join(CONFIG_FILE);
        if !fs.exists(&config_path) {
            return Err(SyncError::WorkspaceNotFound(root.to_path_buf()));
        }
        let config = WorkspaceConfig::load_from(fs, &config_path)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    /// Path of the state store file.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.root.join(META_DIR).join(STATE_FILE)
    }

    /// Path of the lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(META_DIR).join(LOCK_FILE)
    }

    /// Resolve a workspace-relative entry path to an absolute one.
    #[must_use]
    pub fn abs(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }
}

/// Exclusive advisory lock on a workspace.
///
/// Held for the lifetime of an engine run (or the whole watch daemon).
/// Dropping the guard releases the lock.
#[derive(Debug)]
pub struct WorkspaceLock {
    _lock_file: File,
}

impl WorkspaceLock {
    /// Acquire the lock, failing immediately with `WorkspaceLocked` if
    /// another process holds it.
    pub fn acquire(workspace: &Workspace) -> Result<Self> {
        let path = workspace.lock_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| SyncError::WorkspaceLocked(workspace.root.clone()))?;
        Ok(Self { _lock_file: file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;

    #[test]
    fn test_init_then_open() {
        let fs = InMemoryFileSystem::new();
        let root = Path::new("/ws");
        Workspace::init(&fs, root, WorkspaceConfig::new("root123abc")).unwrap();

        let ws = Workspace::open(&fs, root).unwrap();
        assert_eq!(ws.config.remote_root_id, "root123abc");
        assert_eq!(ws.state_path(), PathBuf::from("/ws/.pagesync/state.json"));
    }

    #[test]
    fn test_init_twice_fails() {
        let fs = InMemoryFileSystem::new();
        let root = Path::new("/ws");
        Workspace::init(&fs, root, WorkspaceConfig::new("root123abc")).unwrap();
        let err = Workspace::init(&fs, root, WorkspaceConfig::new("other12345")).unwrap_err();
        assert!(matches!(err, SyncError::WorkspaceAlreadyExists(_)));
    }

    #[test]
    fn test_open_missing_fails() {
        let fs = InMemoryFileSystem::new();
        let err = Workspace::open(&fs, Path::new("/nowhere")).unwrap_err();
        assert!(matches!(err, SyncError::WorkspaceNotFound(_)));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let fs = crate::fs::RealFileSystem;
        let ws =
            Workspace::init(&fs, dir.path(), WorkspaceConfig::new("root123abc")).unwrap();

        let first = WorkspaceLock::acquire(&ws).unwrap();
        // fs2 locks are per-process-and-handle on some platforms, so a second
        // acquisition in the same process may succeed; only assert release.
        drop(first);
        let second = WorkspaceLock::acquire(&ws).unwrap();
        drop(second);
    }
}
