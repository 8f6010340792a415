//! Sync engine orchestrator.
//!
//! One engine instance owns a workspace for the duration of a run (or a
//! watch session). Each run snapshots both sides, reconciles, and executes
//! the resulting actions with the discipline: side effect first, state
//! commit second. A crash between the two leaves the side effect
//! discoverable by the next reconcile (hashes match), so no action is ever
//! applied twice.
//!
//! Execution order within a run: status marks, then creations parents-first,
//! then updates, then deletions deepest-first.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::convert;
use crate::error::{Result, SyncError};
use crate::fs::FileSystem;
use crate::hash::ContentHash;
use crate::reconcile::{self, Action, ConflictReason, Op, Resolution, SyncMode};
use crate::remote::{RemoteClient, RemoteContent, RemoteNode};
use crate::state::{Entry, EntryKind, EntryStatus, StateStore};
use crate::walker::{self, LocalSnapshot, RemoteEntry, RemoteSnapshot, depth, parent_dir};
use crate::workspace::{INDEX_FILE, SCHEMA_FILE, Workspace};

/// Summary of one run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Entries whose side effect and state commit both landed
    pub succeeded: usize,
    /// Entries newly marked conflicted (or deletion-raced)
    pub conflicted: usize,
    /// Entries that failed; the run continued past them
    pub failed: usize,
    /// Per-entry failure records
    pub errors: Vec<EntryError>,
}

/// One failed entry within a run.
#[derive(Debug)]
pub struct EntryError {
    /// Workspace-relative path
    pub path: String,
    /// What went wrong
    pub message: String,
}

impl RunSummary {
    /// Fold another summary into this one.
    pub fn merge(&mut self, other: RunSummary) {
        self.succeeded += other.succeeded;
        self.conflicted += other.conflicted;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }
}

/// Pending actions reported by `status`, without executing anything.
#[derive(Debug, Default)]
pub struct StatusReport {
    /// What a full sync would do
    pub actions: Vec<Action>,
    /// Paths currently conflicted or deletion-raced
    pub unresolved: Vec<String>,
}

impl StatusReport {
    /// Whether anything is pending.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.actions.is_empty() && self.unresolved.is_empty()
    }
}

enum Applied {
    Synced,
    Conflicted,
}

/// Orchestrates pull, push, and sync runs against one workspace.
pub struct SyncEngine<FS: FileSystem + Clone> {
    fs: FS,
    workspace: Workspace,
    store: StateStore<FS>,
    remote: Arc<dyn RemoteClient>,
    stop: Arc<AtomicBool>,
}

impl<FS: FileSystem + Clone> SyncEngine<FS> {
    /// Build an engine over an opened workspace.
    pub fn new(
        fs: FS,
        workspace: Workspace,
        store: StateStore<FS>,
        remote: Arc<dyn RemoteClient>,
    ) -> Self {
        Self {
            fs,
            workspace,
            store,
            remote,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A flag that cancels the run between entries when set.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// The workspace this engine runs against.
    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// The remote client this engine calls through.
    #[must_use]
    pub fn remote_client(&self) -> &Arc<dyn RemoteClient> {
        &self.remote
    }

    /// The state store backing this engine.
    #[must_use]
    pub fn store(&self) -> &StateStore<FS> {
        &self.store
    }

    /// Paths currently requiring explicit resolution.
    pub fn unresolved_paths(&self) -> Vec<String> {
        self.store
            .list_where(&[
                EntryStatus::Conflict,
                EntryStatus::DeletedLocal,
                EntryStatus::DeletedRemote,
            ])
            .map(|e| e.path.clone())
            .collect()
    }

    /// Run pull-direction reconciliation.
    pub async fn pull(&mut self, force: bool) -> Result<RunSummary> {
        self.run(SyncMode::Pull { force }).await
    }

    /// Run push-direction reconciliation.
    pub async fn push(&mut self, force: bool) -> Result<RunSummary> {
        self.run(SyncMode::Push { force }).await
    }

    /// Pull, then push. Conflicts marked by the pull pass stay marked; the
    /// push pass skips them.
    pub async fn sync(&mut self) -> Result<RunSummary> {
        let mut summary = self.run(SyncMode::Pull { force: false }).await?;
        summary.merge(self.run(SyncMode::Push { force: false }).await?);
        Ok(summary)
    }

    /// Reconcile without executing: report pending actions and conflicts.
    pub async fn status(&self) -> Result<StatusReport> {
        let local = walker::snapshot_local(&self.fs, &self.workspace.root)?;
        let remote = walker::snapshot_remote(
            &self.remote,
            &self.workspace.config.remote_root_id,
            &self.store,
        )
        .await?;
        let state: Vec<Entry> = self.store.list_all().cloned().collect();
        Ok(StatusReport {
            actions: reconcile::reconcile(&local, &remote, &state, SyncMode::Full),
            unresolved: self.unresolved_paths(),
        })
    }

    async fn run(&mut self, mode: SyncMode) -> Result<RunSummary> {
        let local = walker::snapshot_local(&self.fs, &self.workspace.root)?;
        let remote = walker::snapshot_remote(
            &self.remote,
            &self.workspace.config.remote_root_id,
            &self.store,
        )
        .await?;
        let state: Vec<Entry> = self.store.list_all().cloned().collect();
        let actions = order(reconcile::reconcile(&local, &remote, &state, mode));
        debug!(?mode, actions = actions.len(), "reconciled");

        // Container ids resolved so far this run, parents before children.
        let mut container_ids: BTreeMap<String, String> = self
            .store
            .list_all()
            .filter(|e| e.kind.is_container())
            .map(|e| (e.path.clone(), e.remote_id.clone()))
            .collect();

        let mut summary = RunSummary::default();
        for action in actions {
            if self.stop.load(Ordering::Relaxed) {
                info!("run cancelled between entries");
                break;
            }
            match self.apply(&action, &local, &remote, &mut container_ids).await {
                Ok(Applied::Synced) => summary.succeeded += 1,
                Ok(Applied::Conflicted) => summary.conflicted += 1,
                Err(err @ SyncError::StateCorrupt(_)) => return Err(err),
                Err(err) => {
                    warn!(path = %action.path, error = %err, "entry failed");
                    if matches!(err, SyncError::Conversion { .. }) {
                        self.mark_conversion_error(&action.path, &local)?;
                    }
                    summary.failed += 1;
                    summary.errors.push(EntryError {
                        path: action.path.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(summary)
    }

    async fn apply(
        &mut self,
        action: &Action,
        local: &LocalSnapshot,
        remote: &RemoteSnapshot,
        container_ids: &mut BTreeMap<String, String>,
    ) -> Result<Applied> {
        let path = action.path.as_str();
        match action.op {
            Op::CreateRemote => {
                self.create_remote(path, local, container_ids).await?;
                Ok(Applied::Synced)
            }
            Op::CreateLocal | Op::AdoptBoth => {
                let r = remote_entry(remote, path)?;
                let canonical = self.canonical_for(r).await?;
                let hash = ContentHash::from_bytes(canonical.as_bytes());
                let differs = local
                    .entries
                    .get(path)
                    .map_or(true, |l| l.hash != hash);
                if differs {
                    self.write_entry_file(path, r.node.kind, canonical.as_bytes())?;
                }
                let entry = self.entry_from_remote(path, r, hash);
                if entry.kind.is_container() {
                    container_ids.insert(path.to_string(), entry.remote_id.clone());
                }
                self.store.upsert(entry)?;
                Ok(Applied::Synced)
            }
            Op::Push => {
                let l = local
                    .entries
                    .get(path)
                    .ok_or_else(|| SyncError::EntryNotFound(path.to_string()))?;
                let entry = self
                    .store
                    .get_by_path(path)
                    .cloned()
                    .ok_or_else(|| SyncError::EntryNotFound(path.to_string()))?;
                let (content, canonical) = local_content(path, l.kind, &l.bytes)?;
                let mtime = self.remote.update(&entry.remote_id, &content).await?;
                let mut updated = entry;
                updated.local_hash = Some(l.hash);
                updated.remote_hash = Some(ContentHash::from_bytes(canonical.as_bytes()));
                updated.remote_mtime = Some(mtime);
                updated.status = EntryStatus::Clean;
                self.store.upsert(updated)?;
                Ok(Applied::Synced)
            }
            Op::Pull => {
                let r = remote_entry(remote, path)?;
                let entry = self
                    .store
                    .get_by_path(path)
                    .cloned()
                    .ok_or_else(|| SyncError::EntryNotFound(path.to_string()))?;
                let canonical = self.canonical_for(r).await?;
                let hash = ContentHash::from_bytes(canonical.as_bytes());
                let differs = local
                    .entries
                    .get(path)
                    .map_or(true, |l| l.hash != hash);
                if differs {
                    self.write_entry_file(path, entry.kind, canonical.as_bytes())?;
                }
                let mut updated = entry;
                updated.local_hash = Some(hash);
                updated.remote_hash = Some(hash);
                updated.remote_mtime = Some(r.node.mtime);
                updated.status = EntryStatus::Clean;
                self.store.upsert(updated)?;
                Ok(Applied::Synced)
            }
            Op::DeleteRemote => {
                let entry = self
                    .store
                    .get_by_path(path)
                    .cloned()
                    .ok_or_else(|| SyncError::EntryNotFound(path.to_string()))?;
                self.remote.delete(&entry.remote_id).await?;
                self.store.delete_by_path(path)?;
                Ok(Applied::Synced)
            }
            Op::DeleteLocal => {
                let entry = self
                    .store
                    .get_by_path(path)
                    .cloned()
                    .ok_or_else(|| SyncError::EntryNotFound(path.to_string()))?;
                self.delete_local_entry(path, entry.kind)?;
                self.store.delete_by_path(path)?;
                Ok(Applied::Synced)
            }
            Op::DeleteState => {
                self.store.delete_by_path(path)?;
                Ok(Applied::Synced)
            }
            Op::MarkConflict(reason) => {
                self.mark_status(path, EntryStatus::Conflict)?;
                match reason {
                    ConflictReason::BothModified => {
                        info!(path, "conflict: modified on both sides")
                    }
                    ConflictReason::KindChanged => {
                        info!(path, "conflict: document kind changed remotely")
                    }
                }
                Ok(Applied::Conflicted)
            }
            Op::MarkDeletedLocal => {
                self.mark_status(path, EntryStatus::DeletedLocal)?;
                info!(path, "local deletion races a remote modification");
                Ok(Applied::Conflicted)
            }
            Op::MarkDeletedRemote => {
                self.mark_status(path, EntryStatus::DeletedRemote)?;
                info!(path, "remote deletion races a local modification");
                Ok(Applied::Conflicted)
            }
        }
    }

    /// Create (or adopt) the remote counterpart of a new local entry.
    ///
    /// `create` is not idempotent, so a crash after the remote accepted it
    /// would duplicate the document on retry. The probe finds such orphans
    /// by exact title under the exact parent and adopts them instead.
    async fn create_remote(
        &mut self,
        path: &str,
        local: &LocalSnapshot,
        container_ids: &mut BTreeMap<String, String>,
    ) -> Result<()> {
        let l = local
            .entries
            .get(path)
            .ok_or_else(|| SyncError::EntryNotFound(path.to_string()))?;
        let (content, canonical) = local_content(path, l.kind, &l.bytes)?;
        let title = convert::title_from_path(path);

        let parent_path = parent_dir(path);
        let parent_id = if parent_path.is_empty() {
            self.workspace.config.remote_root_id.clone()
        } else {
            container_ids
                .get(parent_path)
                .cloned()
                .ok_or_else(|| SyncError::EntryNotFound(parent_path.to_string()))?
        };

        let siblings = self.remote.find_children(&parent_id, &title).await?;
        let mut matches: Vec<RemoteNode> =
            siblings.into_iter().filter(|n| n.title == title).collect();
        let node = match matches.len() {
            0 => {
                self.remote
                    .create(&parent_id, l.kind, &title, &content)
                    .await?
            }
            1 => {
                let node = matches.remove(0);
                info!(path, id = %node.id, "adopting orphan remote document");
                let mtime = self.remote.update(&node.id, &content).await?;
                RemoteNode { mtime, ..node }
            }
            count => {
                return Err(SyncError::AmbiguousAdoption {
                    path: path.to_string(),
                    title,
                    count,
                });
            }
        };

        let parent = (!parent_path.is_empty()).then_some(parent_id);
        let entry = Entry::synced(
            path,
            node.id.clone(),
            l.kind,
            l.hash,
            ContentHash::from_bytes(canonical.as_bytes()),
            node.mtime,
        )
        .with_parent(parent)
        .with_url(node.url);
        if l.kind.is_container() {
            container_ids.insert(path.to_string(), node.id.clone());
        }
        self.store.upsert(entry)?;
        Ok(())
    }

    /// Manual transition out of a conflicted or deletion-raced state.
    pub async fn resolve(&mut self, path: &str, resolution: Resolution) -> Result<()> {
        let entry = self
            .store
            .get_by_path(path)
            .cloned()
            .ok_or_else(|| SyncError::EntryNotFound(path.to_string()))?;

        match (entry.status, resolution) {
            (EntryStatus::Conflict, Resolution::KeepLocal) => {
                self.push_entry(&entry).await
            }
            (EntryStatus::Conflict, Resolution::KeepRemote) => {
                self.resolve_keep_remote(&entry).await
            }
            (EntryStatus::Conflict, Resolution::KeepBoth) => {
                self.keep_both(&entry).await
            }
            (EntryStatus::DeletedRemote, Resolution::KeepLocal) => {
                // The remote document is gone; drop the stale row so the
                // next push re-creates (or re-adopts) it.
                self.store.delete_by_path(path)?;
                Ok(())
            }
            (EntryStatus::DeletedRemote, Resolution::KeepRemote) => {
                self.delete_local_entry(path, entry.kind)?;
                self.store.delete_by_path(path)?;
                Ok(())
            }
            (EntryStatus::DeletedLocal, Resolution::KeepLocal) => {
                self.remote.delete(&entry.remote_id).await?;
                self.store.delete_by_path(path)?;
                Ok(())
            }
            (EntryStatus::DeletedLocal, Resolution::KeepRemote) => {
                self.resolve_keep_remote(&entry).await
            }
            _ => Err(SyncError::NotInConflict(path.to_string())),
        }
    }

    async fn push_entry(&mut self, entry: &Entry) -> Result<()> {
        let abs = self.content_file(&entry.path, entry.kind);
        let bytes = self.fs.read_bytes(&abs).map_err(|e| SyncError::FileRead {
            path: abs.clone(),
            source: e,
        })?;
        let (content, canonical) = local_content(&entry.path, entry.kind, &bytes)?;
        let mtime = self.remote.update(&entry.remote_id, &content).await?;

        let mut updated = entry.clone();
        updated.local_hash = Some(ContentHash::from_bytes(&bytes));
        updated.remote_hash = Some(ContentHash::from_bytes(canonical.as_bytes()));
        updated.remote_mtime = Some(mtime);
        updated.status = EntryStatus::Clean;
        self.store.upsert(updated)?;
        Ok(())
    }

    /// Apply the remote side as authoritative.
    ///
    /// When the document's kind changed remotely, the local entry cannot be
    /// rewritten in place (file vs. directory shapes differ): the local copy
    /// and state row are dropped instead, and the next sync materializes the
    /// document under its new kind.
    async fn resolve_keep_remote(&mut self, entry: &Entry) -> Result<()> {
        let nodes = self
            .remote
            .fetch_tree(&self.workspace.config.remote_root_id)
            .await?;
        let node = nodes
            .into_iter()
            .find(|n| n.id == entry.remote_id)
            .ok_or_else(|| SyncError::RemoteNotFound(entry.remote_id.clone()))?;

        if node.kind != entry.kind {
            self.delete_local_entry(&entry.path, entry.kind)?;
            self.store.delete_by_path(&entry.path)?;
            return Ok(());
        }

        let content = self.remote.fetch_content(&entry.remote_id).await?;
        let canonical = convert::render(entry.kind, &content.to_document())?;
        let hash = ContentHash::from_bytes(canonical.as_bytes());
        self.write_entry_file(&entry.path, entry.kind, canonical.as_bytes())?;

        let mut updated = entry.clone();
        updated.local_hash = Some(hash);
        updated.remote_hash = Some(hash);
        updated.remote_mtime = Some(node.mtime);
        updated.status = EntryStatus::Clean;
        self.store.upsert(updated)?;
        Ok(())
    }

    async fn keep_both(&mut self, entry: &Entry) -> Result<()> {
        let content_file = self.content_file(&entry.path, entry.kind);
        let stem = content_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entry".to_string());
        let renamed =
            content_file.with_file_name(format!("{stem}.conflict.{}.md", Utc::now().timestamp()));
        self.fs.move_file(&content_file, &renamed)?;
        info!(path = %entry.path, renamed = %renamed.display(), "kept local copy aside");
        self.resolve_keep_remote(entry).await
    }

    fn mark_status(&mut self, path: &str, status: EntryStatus) -> Result<()> {
        let mut entry = self
            .store
            .get_by_path(path)
            .cloned()
            .ok_or_else(|| SyncError::EntryNotFound(path.to_string()))?;
        entry.status = status;
        self.store.upsert(entry)
    }

    /// Record a sticky conversion failure so the entry is skipped until its
    /// bytes change. Entries without a state row simply retry next run.
    fn mark_conversion_error(&mut self, path: &str, local: &LocalSnapshot) -> Result<()> {
        if let (Some(mut entry), Some(l)) = (
            self.store.get_by_path(path).cloned(),
            local.entries.get(path),
        ) {
            entry.status = EntryStatus::ConversionError;
            entry.local_hash = Some(l.hash);
            self.store.upsert(entry)?;
        }
        Ok(())
    }

    async fn canonical_for(&self, r: &RemoteEntry) -> Result<String> {
        if let Some(canonical) = &r.canonical {
            return Ok(canonical.clone());
        }
        let content = self.remote.fetch_content(&r.node.id).await?;
        convert::render(r.node.kind, &content.to_document())
    }

    fn entry_from_remote(&self, path: &str, r: &RemoteEntry, hash: ContentHash) -> Entry {
        let parent = r
            .node
            .parent_id
            .clone()
            .filter(|p| *p != self.workspace.config.remote_root_id);
        Entry::synced(path, r.node.id.clone(), r.node.kind, hash, hash, r.node.mtime)
            .with_parent(parent)
            .with_url(r.node.url.clone())
    }

    /// The file holding an entry's content: the file itself for leaf kinds,
    /// the index or schema file for containers.
    fn content_file(&self, path: &str, kind: EntryKind) -> std::path::PathBuf {
        let abs = self.workspace.abs(path);
        match kind {
            EntryKind::ContainerPage => abs.join(INDEX_FILE),
            EntryKind::Database => abs.join(SCHEMA_FILE),
            EntryKind::Leaf | EntryKind::DatabaseEntry => abs,
        }
    }

    fn write_entry_file(&self, path: &str, kind: EntryKind, bytes: &[u8]) -> Result<()> {
        let target = self.content_file(path, kind);
        if kind.is_container() {
            self.fs.create_dir_all(&self.workspace.abs(path))?;
        } else if let Some(parent) = target.parent() {
            self.fs.create_dir_all(parent)?;
        }
        self.fs
            .write_file(&target, bytes)
            .map_err(|e| SyncError::FileWrite {
                path: target.clone(),
                source: e,
            })
    }

    fn delete_local_entry(&self, path: &str, kind: EntryKind) -> Result<()> {
        let abs = self.workspace.abs(path);
        if kind.is_container() {
            let content = self.content_file(path, kind);
            if self.fs.exists(&content) {
                self.fs.delete_file(&content)?;
            }
            // Deletions run deepest-first, so an emptied directory can go;
            // one still holding unsynced files stays.
            if self.fs.list_dir(&abs)?.is_empty() {
                self.fs.delete_dir_all(&abs)?;
            }
        } else if self.fs.exists(&abs) {
            self.fs.delete_file(&abs)?;
        }
        Ok(())
    }
}

/// Parse local bytes into remote content plus the canonical rendering.
fn local_content(path: &str, kind: EntryKind, bytes: &[u8]) -> Result<(RemoteContent, String)> {
    let text = std::str::from_utf8(bytes).map_err(|_| SyncError::Conversion {
        path: path.to_string(),
        message: "file is not valid UTF-8".to_string(),
    })?;
    let doc = convert::parse(kind, path, text)?;
    let canonical = convert::render(kind, &doc)?;
    Ok((RemoteContent::from_document(&doc), canonical))
}

fn remote_entry<'a>(remote: &'a RemoteSnapshot, path: &str) -> Result<&'a RemoteEntry> {
    remote
        .entries
        .get(path)
        .ok_or_else(|| SyncError::EntryNotFound(path.to_string()))
}

/// Order actions: marks, creations parents-first, updates, deletions
/// deepest-first.
fn order(mut actions: Vec<Action>) -> Vec<Action> {
    fn rank(op: Op) -> u8 {
        match op {
            Op::MarkConflict(_) | Op::MarkDeletedLocal | Op::MarkDeletedRemote => 0,
            Op::CreateRemote | Op::CreateLocal | Op::AdoptBoth => 1,
            Op::Push | Op::Pull => 2,
            Op::DeleteLocal | Op::DeleteRemote | Op::DeleteState => 3,
        }
    }
    actions.sort_by(|a, b| {
        rank(a.op).cmp(&rank(b.op)).then_with(|| match rank(a.op) {
            1 => depth(&a.path).cmp(&depth(&b.path)).then(a.path.cmp(&b.path)),
            3 => depth(&b.path).cmp(&depth(&a.path)).then(a.path.cmp(&b.path)),
            _ => a.path.cmp(&b.path),
        })
    });
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(path: &str, op: Op) -> Action {
        Action {
            path: path.to_string(),
            op,
        }
    }

    #[test]
    fn test_order_creations_parents_first() {
        let ordered = order(vec![
            action("Projects/Alpha.md", Op::CreateRemote),
            action("Projects", Op::CreateRemote),
            action("Notes.md", Op::Push),
        ]);
        assert_eq!(ordered[0].path, "Projects");
        assert_eq!(ordered[1].path, "Projects/Alpha.md");
        assert_eq!(ordered[2].path, "Notes.md");
    }

    #[test]
    fn test_order_deletions_deepest_first() {
        let ordered = order(vec![
            action("Projects", Op::DeleteRemote),
            action("Projects/Alpha.md", Op::DeleteRemote),
        ]);
        assert_eq!(ordered[0].path, "Projects/Alpha.md");
        assert_eq!(ordered[1].path, "Projects");
    }

    #[test]
    fn test_order_marks_before_everything() {
        let ordered = order(vec![
            action("B.md", Op::Pull),
            action("A.md", Op::MarkConflict(ConflictReason::BothModified)),
        ]);
        assert_eq!(ordered[0].path, "A.md");
    }
}
