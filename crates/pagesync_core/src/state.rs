//! Durable per-entry sync state.
//!
//! The state store is the engine's memory of the last successful sync: for
//! every entry it records the content hashes of both sides and the remote
//! modification time observed at that point. It is authoritative for
//! metadata, never for content; recovery after a crash is simply loading the
//! current rows and re-reconciling.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::fs::FileSystem;
use crate::hash::ContentHash;

/// What kind of document an entry mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A single page file
    Leaf,
    /// A page with children: a directory holding `_index.md`
    ContainerPage,
    /// A database: a directory holding `_schema.yaml` and entry files
    Database,
    /// One row of a database, a file with frontmatter properties
    DatabaseEntry,
}

impl EntryKind {
    /// Whether this kind maps to a directory rather than a single file.
    #[must_use]
    pub fn is_container(self) -> bool {
        matches!(self, EntryKind::ContainerPage | EntryKind::Database)
    }
}

/// Sync status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryStatus {
    /// Both sides match the recorded hashes
    Clean,
    /// Local bytes differ from the recorded local hash
    LocalModified,
    /// Remote mtime exceeds the recorded one
    RemoteModified,
    /// Both sides changed since last sync; sticky until resolved
    Conflict,
    /// Local file deleted while the remote changed
    DeletedLocal,
    /// Remote document deleted while the local file changed
    DeletedRemote,
    /// Local file with no remote counterpart yet
    NewLocal,
    /// Remote document with no local counterpart yet
    NewRemote,
    /// Conversion failed; sticky until the local file's bytes change
    ConversionError,
}

/// One synchronized document: identity `path` locally, `remote_id` remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Workspace-relative path, forward slashes. Primary key.
    pub path: String,

    /// Opaque remote identifier. Unique.
    pub remote_id: String,

    /// Convenience display URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,

    /// Parent document id; None for children of the workspace root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_remote_id: Option<String>,

    /// Document kind
    pub kind: EntryKind,

    /// Hash of local file bytes at last successful sync
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<ContentHash>,

    /// Hash of the canonical remote rendering at last successful sync
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_hash: Option<ContentHash>,

    /// Remote's authoritative last-modified time observed at last sync
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_mtime: Option<DateTime<Utc>>,

    /// Current sync status
    pub status: EntryStatus,
}

impl Entry {
    /// Create a clean entry after a successful two-sided sync.
    pub fn synced(
        path: impl Into<String>,
        remote_id: impl Into<String>,
        kind: EntryKind,
        local_hash: ContentHash,
        remote_hash: ContentHash,
        remote_mtime: DateTime<Utc>,
    ) -> Self {
        Self {
            path: path.into(),
            remote_id: remote_id.into(),
            remote_url: None,
            parent_remote_id: None,
            kind,
            local_hash: Some(local_hash),
            remote_hash: Some(remote_hash),
            remote_mtime: Some(remote_mtime),
            status: EntryStatus::Clean,
        }
    }

    /// Set the parent id (builder pattern).
    #[must_use]
    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent_remote_id = parent;
        self
    }

    /// Set the display URL (builder pattern).
    #[must_use]
    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.remote_url = url;
        self
    }
}

/// Versioned on-disk envelope for the state file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    entries: Vec<Entry>,
}

/// Durable, transactional mapping of entries, keyed by workspace.
///
/// Held fully in memory; every mutation set is flushed atomically by writing
/// a temp file next to `state.json` and renaming it into place.
#[derive(Debug)]
pub struct StateStore<FS: FileSystem> {
    fs: FS,
    path: PathBuf,
    entries: BTreeMap<String, Entry>,
}

/// Current state file format version.
const CURRENT_VERSION: u32 = 1;

impl<FS: FileSystem> StateStore<FS> {
    /// Load the store from `path`, or start empty if the file is absent.
    ///
    /// Duplicate paths or remote ids in the file are state corruption: the
    /// engine refuses to run on them.
    pub fn load(fs: FS, path: PathBuf) -> Result<Self> {
        let entries = if fs.exists(&path) {
            let raw = fs.read_to_string(&path).map_err(|e| SyncError::FileRead {
                path: path.clone(),
                source: e,
            })?;
            let doc: StateDocument = serde_json::from_str(&raw)
                .map_err(|e| SyncError::StateCorrupt(e.to_string()))?;

            let mut map = BTreeMap::new();
            let mut seen_remote = std::collections::BTreeSet::new();
            for entry in doc.entries {
                if !seen_remote.insert(entry.remote_id.clone()) {
                    return Err(SyncError::StateCorrupt(format!(
                        "duplicate remote id '{}'",
                        entry.remote_id
                    )));
                }
                if map.insert(entry.path.clone(), entry).is_some() {
                    return Err(SyncError::StateCorrupt(
                        "duplicate entry path".to_string(),
                    ));
                }
            }
            map
        } else {
            BTreeMap::new()
        };

        debug!(entries = entries.len(), path = %path.display(), "state loaded");
        Ok(Self { fs, path, entries })
    }

    /// Point lookup by path.
    pub fn get_by_path(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    /// Point lookup by remote id.
    pub fn get_by_remote_id(&self, remote_id: &str) -> Option<&Entry> {
        self.entries.values().find(|e| e.remote_id == remote_id)
    }

    /// Snapshot iteration over all entries, ordered by path.
    pub fn list_all(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Snapshot iteration over entries in any of the given statuses.
    pub fn list_where<'a>(
        &'a self,
        statuses: &'a [EntryStatus],
    ) -> impl Iterator<Item = &'a Entry> {
        self.entries
            .values()
            .filter(move |e| statuses.contains(&e.status))
    }

    /// Atomic insert-or-update by path, flushed immediately.
    pub fn upsert(&mut self, entry: Entry) -> Result<()> {
        self.transaction(|txn| {
            txn.upsert(entry);
            Ok(())
        })
    }

    /// Atomic removal by path, flushed immediately. Missing paths are fine.
    pub fn delete_by_path(&mut self, path: &str) -> Result<()> {
        self.transaction(|txn| {
            txn.delete(path);
            Ok(())
        })
    }

    /// Run `body` against a transactional view. All mutations become visible
    /// and durable together when `body` returns Ok; on Err nothing is
    /// applied.
    pub fn transaction<F>(&mut self, body: F) -> Result<()>
    where
        F: FnOnce(&mut Transaction) -> Result<()>,
    {
        let mut txn = Transaction {
            entries: self.entries.clone(),
        };
        body(&mut txn)?;

        // Uniqueness of remote ids must hold across the whole new view.
        let mut seen = std::collections::BTreeSet::new();
        for entry in txn.entries.values() {
            if !seen.insert(entry.remote_id.as_str()) {
                return Err(SyncError::StateCorrupt(format!(
                    "upsert would duplicate remote id '{}'",
                    entry.remote_id
                )));
            }
        }

        self.flush(&txn.entries)?;
        self.entries = txn.entries;
        Ok(())
    }

    fn flush(&self, entries: &BTreeMap<String, Entry>) -> Result<()> {
        let doc = StateDocument {
            version: CURRENT_VERSION,
            entries: entries.values().cloned().collect(),
        };
        let raw = serde_json::to_string_pretty(&doc)?;

        if let Some(parent) = self.path.parent() {
            self.fs.create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        self.fs
            .write_file(&tmp, raw.as_bytes())
            .map_err(|e| SyncError::FileWrite {
                path: tmp.clone(),
                source: e,
            })?;
        self.fs
            .rename_replace(&tmp, &self.path)
            .map_err(|e| SyncError::FileWrite {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(())
    }
}

/// Mutable view inside a [`StateStore::transaction`] scope.
pub struct Transaction {
    entries: BTreeMap<String, Entry>,
}

impl Transaction {
    /// Insert or update an entry by path.
    pub fn upsert(&mut self, entry: Entry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    /// Remove an entry by path.
    pub fn delete(&mut self, path: &str) {
        self.entries.remove(path);
    }

    /// Lookup inside the transactional view.
    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;

    fn hash(data: &[u8]) -> ContentHash {
        ContentHash::from_bytes(data)
    }

    fn entry(path: &str, remote_id: &str) -> Entry {
        Entry::synced(
            path,
            remote_id,
            EntryKind::Leaf,
            hash(b"local"),
            hash(b"remote"),
            Utc::now(),
        )
    }

    fn store(fs: &InMemoryFileSystem) -> StateStore<InMemoryFileSystem> {
        StateStore::load(fs.clone(), PathBuf::from("ws/.pagesync/state.json")).unwrap()
    }

    #[test]
    fn test_upsert_and_reload() {
        let fs = InMemoryFileSystem::new();
        let mut store = store(&fs);
        store.upsert(entry("Notes.md", "r1")).unwrap();
        store.upsert(entry("Other.md", "r2")).unwrap();

        let reloaded = StateStore::load(fs.clone(), PathBuf::from("ws/.pagesync/state.json"))
            .unwrap();
        assert_eq!(reloaded.list_all().count(), 2);
        assert_eq!(reloaded.get_by_path("Notes.md").unwrap().remote_id, "r1");
        assert_eq!(reloaded.get_by_remote_id("r2").unwrap().path, "Other.md");
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let fs = InMemoryFileSystem::new();
        let mut store = store(&fs);
        store.upsert(entry("Notes.md", "r1")).unwrap();

        let result = store.transaction(|txn| {
            txn.upsert(entry("Gone.md", "r9"));
            Err(SyncError::EntryNotFound("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.get_by_path("Gone.md").is_none());

        let reloaded = StateStore::load(fs.clone(), PathBuf::from("ws/.pagesync/state.json"))
            .unwrap();
        assert!(reloaded.get_by_path("Gone.md").is_none());
    }

    #[test]
    fn test_duplicate_remote_id_rejected() {
        let fs = InMemoryFileSystem::new();
        let mut store = store(&fs);
        store.upsert(entry("A.md", "r1")).unwrap();
        let err = store.upsert(entry("B.md", "r1")).unwrap_err();
        assert!(matches!(err, SyncError::StateCorrupt(_)));
    }

    #[test]
    fn test_corrupt_file_is_fatal() {
        let fs = InMemoryFileSystem::new().with_file("ws/.pagesync/state.json", "{nope");
        let err =
            StateStore::load(fs, PathBuf::from("ws/.pagesync/state.json")).unwrap_err();
        assert!(matches!(err, SyncError::StateCorrupt(_)));
    }

    #[test]
    fn test_delete_by_path() {
        let fs = InMemoryFileSystem::new();
        let mut store = store(&fs);
        store.upsert(entry("A.md", "r1")).unwrap();
        store.delete_by_path("A.md").unwrap();
        assert!(store.get_by_path("A.md").is_none());
    }

    #[test]
    fn test_list_where() {
        let fs = InMemoryFileSystem::new();
        let mut store = store(&fs);
        let mut conflicted = entry("A.md", "r1");
        conflicted.status = EntryStatus::Conflict;
        store.upsert(conflicted).unwrap();
        store.upsert(entry("B.md", "r2")).unwrap();

        let conflicts: Vec<_> = store.list_where(&[EntryStatus::Conflict]).collect();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].path, "A.md");
    }
}
