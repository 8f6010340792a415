//! Filesystem abstraction module.
//!
//! This module provides the `FileSystem` trait for abstracting filesystem
//! operations, allowing the engine to run against the real filesystem or an
//! in-memory one in tests. Local I/O is synchronous; the engine performs it
//! serially per entry.

mod memory;
mod native;

pub use memory::InMemoryFileSystem;
pub use native::RealFileSystem;

use std::io::Result;
use std::path::{Path, PathBuf};

/// Abstraction over filesystem operations.
///
/// Send + Sync required so the watcher can share it across tasks.
pub trait FileSystem: Send + Sync {
    /// Reads the file content as a string
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Reads raw file bytes
    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>>;

    /// Overwrites an existing file (creating it if needed)
    fn write_file(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Deletes a file
    fn delete_file(&self, path: &Path) -> Result<()>;

    /// Deletes a directory and everything under it
    fn delete_dir_all(&self, path: &Path) -> Result<()>;

    /// Checks if a file or directory exists
    fn exists(&self, path: &Path) -> bool;

    /// Checks if a path is a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Creates a directory and all parent directories
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Move/rename a file from `from` to `to`.
    ///
    /// Errors if the source does not exist or the destination already exists.
    fn move_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Rename `from` over `to`, replacing `to` if it exists.
    ///
    /// Used for atomic state-file replacement (write temp, then rename).
    fn rename_replace(&self, from: &Path, to: &Path) -> Result<()>;

    /// List all direct children of a directory (files and directories)
    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>>;
}

// Blanket implementation for references to FileSystem
impl<T: FileSystem + ?Sized> FileSystem for &T {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        (*self).read_to_string(path)
    }

    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        (*self).read_bytes(path)
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        (*self).write_file(path, content)
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        (*self).delete_file(path)
    }

    fn delete_dir_all(&self, path: &Path) -> Result<()> {
        (*self).delete_dir_all(path)
    }

    fn exists(&self, path: &Path) -> bool {
        (*self).exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        (*self).is_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        (*self).create_dir_all(path)
    }

    fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        (*self).move_file(from, to)
    }

    fn rename_replace(&self, from: &Path, to: &Path) -> Result<()> {
        (*self).rename_replace(from, to)
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        (*self).list_dir(dir)
    }
}
