//! Native filesystem implementation.

use std::fs;
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};

use super::FileSystem;

/// This is a simple filesystem implementation that simply maps to std::fs methods
#[derive(Clone, Copy)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path)
    }

    fn read_bytes(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_file(&self, path: &Path, content: &[u8]) -> Result<()> {
        fs::write(path, content)
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
    }

    fn delete_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
    }

    fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        if to.exists() {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("refusing to overwrite {}", to.display()),
            ));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        // rename reports a missing source itself
        fs::rename(from, to)
    }

    fn rename_replace(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(dir)? {
                entries.push(entry?.path());
            }
        }
        Ok(entries)
    }
}
