//! Local and remote tree snapshots.
//!
//! Both snapshotters are pure: they read, never mutate. The local walk turns
//! the workspace directory into entries keyed by relative path; the remote
//! walk turns the document tree into entries keyed by the same paths, using
//! the state store to keep paths stable and to skip content fetches for
//! unchanged documents.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::convert;
use crate::error::{Result, SyncError};
use crate::fs::FileSystem;
use crate::hash::ContentHash;
use crate::remote::{RemoteClient, RemoteNode};
use crate::state::{EntryKind, StateStore};
use crate::workspace::{INDEX_FILE, META_DIR, SCHEMA_FILE};

/// One document observed on disk.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    /// Workspace-relative path (directory path for containers)
    pub path: String,
    /// Kind inferred from layout
    pub kind: EntryKind,
    /// File bytes (index or schema bytes for containers)
    pub bytes: Vec<u8>,
    /// Hash of `bytes`
    pub hash: ContentHash,
}

/// Snapshot of the local tree, keyed by relative path.
#[derive(Debug, Default)]
pub struct LocalSnapshot {
    /// Entries by relative path
    pub entries: BTreeMap<String, LocalEntry>,
}

/// One document observed remotely, located at a workspace path.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    /// Tree node
    pub node: RemoteNode,
    /// Workspace-relative path (from state when known, derived otherwise)
    pub path: String,
    /// Canonical rendering; None when the fetch was skipped as unchanged
    pub canonical: Option<String>,
    /// Hash of the canonical rendering; None only if content was never seen
    pub hash: Option<ContentHash>,
}

/// Snapshot of the remote tree, keyed by workspace path.
#[derive(Debug, Default)]
pub struct RemoteSnapshot {
    /// Entries by workspace-relative path
    pub entries: BTreeMap<String, RemoteEntry>,
}

/// Depth of a relative path (number of separators).
#[must_use]
pub fn depth(path: &str) -> usize {
    path.matches('/').count()
}

/// Parent directory of a relative path; empty string for top-level entries.
#[must_use]
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map_or("", |idx| &path[..idx])
}

fn rel_str(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root).ok().map(|p| {
        p.iter()
            .map(|c| c.to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    })
}

/// Walk the workspace directory into a [`LocalSnapshot`].
///
/// Hidden paths and the metadata directory are excluded. A directory with a
/// `_schema.yaml` is a database; any other directory is a container page; a
/// file directly inside a database is a database entry, everything else a
/// leaf page.
pub fn snapshot_local<FS: FileSystem>(fs: &FS, root: &Path) -> Result<LocalSnapshot> {
    let mut snapshot = LocalSnapshot::default();
    walk_dir(fs, root, root, EntryKind::ContainerPage, &mut snapshot)?;
    debug!(entries = snapshot.entries.len(), "local snapshot");
    Ok(snapshot)
}

fn walk_dir<FS: FileSystem>(
    fs: &FS,
    root: &Path,
    dir: &Path,
    dir_kind: EntryKind,
    snapshot: &mut LocalSnapshot,
) -> Result<()> {
    for child in fs.list_dir(dir)? {
        let name = match child.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if name.starts_with('.') || name == META_DIR {
            continue;
        }

        let rel = match rel_str(root, &child) {
            Some(r) => r,
            None => continue,
        };

        if fs.is_dir(&child) {
            let schema = child.join(SCHEMA_FILE);
            let (kind, content_file) = if fs.exists(&schema) {
                (EntryKind::Database, schema)
            } else {
                (EntryKind::ContainerPage, child.join(INDEX_FILE))
            };
            let bytes = if fs.exists(&content_file) {
                fs.read_bytes(&content_file).map_err(|e| SyncError::FileRead {
                    path: content_file.clone(),
                    source: e,
                })?
            } else {
                Vec::new()
            };
            let hash = ContentHash::from_bytes(&bytes);
            snapshot.entries.insert(
                rel.clone(),
                LocalEntry {
                    path: rel,
                    kind,
                    bytes,
                    hash,
                },
            );
            walk_dir(fs, root, &child, kind, snapshot)?;
        } else {
            if name == INDEX_FILE || name == SCHEMA_FILE {
                continue; // owned by the enclosing directory's entry
            }
            if !name.ends_with(".md") {
                continue;
            }
            let kind = if dir_kind == EntryKind::Database {
                EntryKind::DatabaseEntry
            } else {
                EntryKind::Leaf
            };
            let bytes = fs.read_bytes(&child).map_err(|e| SyncError::FileRead {
                path: child.clone(),
                source: e,
            })?;
            let hash = ContentHash::from_bytes(&bytes);
            snapshot.entries.insert(
                rel.clone(),
                LocalEntry {
                    path: rel,
                    kind,
                    bytes,
                    hash,
                },
            );
        }
    }
    Ok(())
}

/// Build a [`RemoteSnapshot`] of the subtree under `root_id`.
///
/// Content is fetched lazily: only for nodes the state has never seen, or
/// whose mtime strictly exceeds the recorded one. Fetches run concurrently;
/// the client's rate limiter bounds them.
pub async fn snapshot_remote<FS: FileSystem>(
    client: &Arc<dyn RemoteClient>,
    root_id: &str,
    state: &StateStore<FS>,
) -> Result<RemoteSnapshot> {
    let nodes = client.fetch_tree(root_id).await?;
    let paths = derive_paths(&nodes, root_id, state);

    // Decide which nodes actually need a content fetch.
    let mut to_fetch = Vec::new();
    let mut entries: BTreeMap<String, RemoteEntry> = BTreeMap::new();
    for node in nodes {
        let path = match paths.get(&node.id) {
            Some(p) => p.clone(),
            // Parent chain doesn't reach the root; node is outside the subtree.
            None => continue,
        };
        let known = state.get_by_remote_id(&node.id);
        let changed = match known {
            None => true,
            Some(e) => match e.remote_mtime {
                Some(recorded) => node.mtime > recorded,
                None => true,
            },
        };
        let stored_hash = known.and_then(|e| e.remote_hash);
        if changed {
            to_fetch.push((node.id.clone(), node.kind, path.clone()));
        }
        entries.insert(
            path.clone(),
            RemoteEntry {
                node,
                path,
                canonical: None,
                hash: stored_hash,
            },
        );
    }

    debug!(
        total = entries.len(),
        fetching = to_fetch.len(),
        "remote snapshot"
    );

    let mut set = JoinSet::new();
    for (id, kind, path) in to_fetch {
        let client = Arc::clone(client);
        set.spawn(async move {
            let result = match client.fetch_content(&id).await {
                Ok(content) => convert::render(kind, &content.to_document()),
                Err(err) => Err(err),
            };
            (path, result)
        });
    }
    while let Some(joined) = set.join_next().await {
        let (path, result) = joined.expect("fetch task panicked");
        match result {
            Ok(canonical) => {
                if let Some(entry) = entries.get_mut(&path) {
                    entry.hash = Some(ContentHash::from_bytes(canonical.as_bytes()));
                    entry.canonical = Some(canonical);
                }
            }
            // A failed fetch degrades to per-entry handling: with no hash
            // the reconciler treats the document as changed, and the
            // engine's own fetch surfaces the error for this entry alone.
            Err(err) => {
                warn!(path, error = %err, "content fetch failed");
                if let Some(entry) = entries.get_mut(&path) {
                    entry.hash = None;
                }
            }
        }
    }

    Ok(RemoteSnapshot { entries })
}

/// Map every node id to a workspace path.
///
/// A node the state already tracks keeps its recorded path; new nodes derive
/// one from the parent chain and a sanitized title.
fn derive_paths<FS: FileSystem>(
    nodes: &[RemoteNode],
    root_id: &str,
    state: &StateStore<FS>,
) -> BTreeMap<String, String> {
    let by_id: BTreeMap<&str, &RemoteNode> =
        nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut paths: BTreeMap<String, String> = BTreeMap::new();

    fn resolve<'a, FS: FileSystem>(
        node: &'a RemoteNode,
        root_id: &str,
        by_id: &BTreeMap<&str, &'a RemoteNode>,
        state: &StateStore<FS>,
        paths: &mut BTreeMap<String, String>,
    ) -> Option<String> {
        if let Some(existing) = paths.get(&node.id) {
            return Some(existing.clone());
        }
        if let Some(entry) = state.get_by_remote_id(&node.id) {
            paths.insert(node.id.clone(), entry.path.clone());
            return Some(entry.path.clone());
        }

        let prefix = match &node.parent_id {
            None => String::new(),
            Some(pid) if pid == root_id => String::new(),
            Some(pid) => match by_id.get(pid.as_str()) {
                Some(parent) => {
                    let parent_path = resolve(parent, root_id, by_id, state, paths)?;
                    format!("{parent_path}/")
                }
                None => return None,
            },
        };

        let name = convert::sanitize_title(&node.title);
        let path = if node.kind.is_container() {
            format!("{prefix}{name}")
        } else {
            format!("{prefix}{name}.md")
        };
        paths.insert(node.id.clone(), path.clone());
        Some(path)
    }

    for node in nodes {
        resolve(node, root_id, &by_id, state, &mut paths);
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;

    #[test]
    fn test_depth_and_parent() {
        assert_eq!(depth("Notes.md"), 0);
        assert_eq!(depth("Projects/Alpha.md"), 1);
        assert_eq!(parent_dir("Projects/Alpha.md"), "Projects");
        assert_eq!(parent_dir("Notes.md"), "");
    }

    #[test]
    fn test_local_walk_kinds() {
        let fs = InMemoryFileSystem::new()
            .with_file("ws/Notes.md", "hello\n")
            .with_file("ws/Projects/_index.md", "projects index\n")
            .with_file("ws/Projects/Alpha.md", "alpha\n")
            .with_file("ws/Tasks/_schema.yaml", "status: select\n")
            .with_file("ws/Tasks/Do-it.md", "---\nstatus: open\n---\nbody\n");

        let snap = snapshot_local(&fs, Path::new("ws")).unwrap();
        assert_eq!(snap.entries["Notes.md"].kind, EntryKind::Leaf);
        assert_eq!(snap.entries["Projects"].kind, EntryKind::ContainerPage);
        assert_eq!(
            String::from_utf8(snap.entries["Projects"].bytes.clone()).unwrap(),
            "projects index\n"
        );
        assert_eq!(snap.entries["Projects/Alpha.md"].kind, EntryKind::Leaf);
        assert_eq!(snap.entries["Tasks"].kind, EntryKind::Database);
        assert_eq!(
            snap.entries["Tasks/Do-it.md"].kind,
            EntryKind::DatabaseEntry
        );
        // Index and schema files never appear as their own entries.
        assert!(!snap.entries.contains_key("Projects/_index.md"));
        assert!(!snap.entries.contains_key("Tasks/_schema.yaml"));
    }

    #[test]
    fn test_local_walk_skips_metadata_and_hidden() {
        let fs = InMemoryFileSystem::new()
            .with_file("ws/.pagesync/state.json", "{}")
            .with_file("ws/.hidden.md", "x")
            .with_file("ws/Notes.md", "hello\n");

        let snap = snapshot_local(&fs, Path::new("ws")).unwrap();
        assert_eq!(snap.entries.len(), 1);
        assert!(snap.entries.contains_key("Notes.md"));
    }
}
