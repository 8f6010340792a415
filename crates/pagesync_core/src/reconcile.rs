//! Pure reconciliation of local/remote/state into actions.
//!
//! `reconcile` is a pure decision function: given the two snapshots and the
//! state rows it produces the list of actions a run must execute. It never
//! touches the filesystem, the remote, or the store.
//!
//! Three-way change detection per entry:
//! - local changed  = hash of file bytes differs from the recorded local hash
//! - remote changed = node mtime strictly exceeds the recorded mtime, and
//!   (when the content was fetched) its canonical hash differs from the
//!   recorded remote hash — an mtime bump with identical content counts as
//!   unchanged
//!
//! A pre-existing conflict overrides every row: only `resolve` moves an
//! entry out of it.

use std::collections::BTreeSet;

use crate::state::{Entry, EntryStatus};
use crate::walker::{LocalSnapshot, RemoteSnapshot};

/// Direction and force flags for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Apply only remote-to-local actions
    Pull {
        /// Overwrite local modifications
        force: bool,
    },
    /// Apply only local-to-remote actions
    Push {
        /// Overwrite remote modifications
        force: bool,
    },
    /// Both directions (used by `status`)
    Full,
}

impl SyncMode {
    fn force_pull(self) -> bool {
        matches!(self, SyncMode::Pull { force: true })
    }

    fn force_push(self) -> bool {
        matches!(self, SyncMode::Push { force: true })
    }
}

/// Why an entry was marked conflicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// Both sides changed since the last sync
    BothModified,
    /// The document's kind changed remotely (page ↔ database)
    KindChanged,
}

/// What a run must do for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Local file with no remote counterpart: create the remote document
    CreateRemote,
    /// Remote document with no local counterpart: write the file
    CreateLocal,
    /// Both sides exist but no state row: record state, overwriting local
    /// from remote if contents differ
    AdoptBoth,
    /// Push local content to the remote
    Push,
    /// Overwrite local content from the remote
    Pull,
    /// Local deleted cleanly: archive the remote document
    DeleteRemote,
    /// Remote deleted cleanly: remove the local file
    DeleteLocal,
    /// Both sides gone: drop the state row
    DeleteState,
    /// Mark the entry conflicted
    MarkConflict(ConflictReason),
    /// Local deletion raced a remote modification
    MarkDeletedLocal,
    /// Remote deletion raced a local modification
    MarkDeletedRemote,
}

impl Op {
    /// Whether this op belongs to the pull direction.
    #[must_use]
    pub fn is_pull(self) -> bool {
        matches!(
            self,
            Op::CreateLocal
                | Op::AdoptBoth
                | Op::Pull
                | Op::DeleteLocal
                | Op::MarkDeletedRemote
                | Op::DeleteState
                | Op::MarkConflict(_)
        )
    }

    /// Whether this op belongs to the push direction.
    #[must_use]
    pub fn is_push(self) -> bool {
        matches!(
            self,
            Op::CreateRemote
                | Op::Push
                | Op::DeleteRemote
                | Op::MarkDeletedLocal
                | Op::DeleteState
                | Op::MarkConflict(_)
        )
    }
}

/// One reconciliation decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Workspace-relative path of the entry
    pub path: String,
    /// What to do
    pub op: Op,
}

/// How to exit a conflicted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Local bytes are authoritative: push, then mark clean
    KeepLocal,
    /// Remote content is authoritative: overwrite local, mark clean
    KeepRemote,
    /// Rename local aside, apply remote as the canonical entry
    KeepBoth,
}

/// Produce the actions for one run.
///
/// Keys are the union of state paths, local paths, and remote paths (remote
/// entries are located at state paths where known). Actions outside the
/// mode's direction are filtered out.
pub fn reconcile(
    local: &LocalSnapshot,
    remote: &RemoteSnapshot,
    state: &[Entry],
    mode: SyncMode,
) -> Vec<Action> {
    let mut paths: BTreeSet<&str> = BTreeSet::new();
    paths.extend(local.entries.keys().map(String::as_str));
    paths.extend(remote.entries.keys().map(String::as_str));
    paths.extend(state.iter().map(|e| e.path.as_str()));

    let mut actions = Vec::new();
    for path in paths {
        let l = local.entries.get(path);
        let r = remote.entries.get(path);
        let s = state.iter().find(|e| e.path == path);

        if let Some(op) = decide(l, r, s, mode) {
            let allowed = match mode {
                SyncMode::Pull { .. } => op.is_pull(),
                SyncMode::Push { .. } => op.is_push(),
                SyncMode::Full => true,
            };
            if allowed {
                actions.push(Action {
                    path: path.to_string(),
                    op,
                });
            }
        }
    }
    actions
}

fn decide(
    l: Option<&crate::walker::LocalEntry>,
    r: Option<&crate::walker::RemoteEntry>,
    s: Option<&Entry>,
    mode: SyncMode,
) -> Option<Op> {
    // Sticky statuses override the whole table.
    if let Some(entry) = s {
        match entry.status {
            EntryStatus::Conflict => return None,
            EntryStatus::ConversionError => {
                // Skip until the file's bytes change.
                let unchanged = match (l, entry.local_hash) {
                    (Some(local), Some(recorded)) => local.hash == recorded,
                    _ => false,
                };
                if unchanged {
                    return None;
                }
            }
            _ => {}
        }
    }

    // A remotely changed kind is a conflict pending explicit resolution.
    if let (Some(entry), Some(remote)) = (s, r) {
        if remote.node.kind != entry.kind {
            return Some(Op::MarkConflict(ConflictReason::KindChanged));
        }
    }

    match (l.is_some(), r.is_some(), s) {
        // Push mode routes untracked pairs through CreateRemote, whose
        // executor probes by title+parent and adopts instead of duplicating.
        (true, true, None) => match mode {
            SyncMode::Push { .. } => Some(Op::CreateRemote),
            _ => Some(Op::AdoptBoth),
        },
        (true, true, Some(entry)) => {
            let local_same = match (l, entry.local_hash) {
                (Some(local), Some(recorded)) => local.hash == recorded,
                _ => false,
            };
            let remote_entry = r.expect("has_remote");
            let mtime_advanced = match entry.remote_mtime {
                Some(recorded) => remote_entry.node.mtime > recorded,
                None => true,
            };
            let content_same = matches!(
                (remote_entry.hash, entry.remote_hash),
                (Some(seen), Some(recorded)) if seen == recorded
            );
            let remote_same = !mtime_advanced || content_same;

            match (local_same, remote_same) {
                (true, true) => None,
                (false, true) => {
                    if mode.force_pull() {
                        Some(Op::Pull)
                    } else {
                        Some(Op::Push)
                    }
                }
                (true, false) => {
                    if mode.force_push() {
                        Some(Op::Push)
                    } else {
                        Some(Op::Pull)
                    }
                }
                (false, false) => {
                    if mode.force_pull() {
                        Some(Op::Pull)
                    } else if mode.force_push() {
                        Some(Op::Push)
                    } else {
                        Some(Op::MarkConflict(ConflictReason::BothModified))
                    }
                }
            }
        }
        (false, true, None) => Some(Op::CreateLocal),
        (false, true, Some(entry)) => {
            let remote_entry = r.expect("has_remote");
            let mtime_advanced = match entry.remote_mtime {
                Some(recorded) => remote_entry.node.mtime > recorded,
                None => true,
            };
            let content_same = matches!(
                (remote_entry.hash, entry.remote_hash),
                (Some(seen), Some(recorded)) if seen == recorded
            );
            if !mtime_advanced || content_same {
                Some(Op::DeleteRemote)
            } else if entry.status == EntryStatus::DeletedLocal {
                None
            } else {
                Some(Op::MarkDeletedLocal)
            }
        }
        (true, false, Some(entry)) => {
            let local_same = match (l, entry.local_hash) {
                (Some(local), Some(recorded)) => local.hash == recorded,
                _ => false,
            };
            if local_same {
                Some(Op::DeleteLocal)
            } else if entry.status == EntryStatus::DeletedRemote {
                None
            } else {
                Some(Op::MarkDeletedRemote)
            }
        }
        (true, false, None) => Some(Op::CreateRemote),
        (false, false, Some(_)) => Some(Op::DeleteState),
        (false, false, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use crate::state::{Entry, EntryKind};
    use crate::walker::{LocalEntry, RemoteEntry};
    use chrono::{Duration, TimeZone, Utc};

    fn local(path: &str, text: &str) -> LocalSnapshot {
        let mut snap = LocalSnapshot::default();
        snap.entries.insert(
            path.to_string(),
            LocalEntry {
                path: path.to_string(),
                kind: EntryKind::Leaf,
                bytes: text.as_bytes().to_vec(),
                hash: ContentHash::from_bytes(text.as_bytes()),
            },
        );
        snap
    }

    fn remote(path: &str, text: &str, mtime_offset_secs: i64) -> RemoteSnapshot {
        let mut snap = RemoteSnapshot::default();
        snap.entries.insert(
            path.to_string(),
            RemoteEntry {
                node: crate::remote::RemoteNode {
                    id: format!("id-{path}"),
                    parent_id: None,
                    kind: EntryKind::Leaf,
                    title: path.trim_end_matches(".md").to_string(),
                    mtime: base_time() + Duration::seconds(mtime_offset_secs),
                    url: None,
                },
                path: path.to_string(),
                canonical: Some(text.to_string()),
                hash: Some(ContentHash::from_bytes(text.as_bytes())),
            },
        );
        snap
    }

    fn base_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn synced_entry(path: &str, local_text: &str, remote_text: &str) -> Entry {
        Entry::synced(
            path,
            format!("id-{path}"),
            EntryKind::Leaf,
            ContentHash::from_bytes(local_text.as_bytes()),
            ContentHash::from_bytes(remote_text.as_bytes()),
            base_time(),
        )
    }

    fn ops(actions: &[Action]) -> Vec<Op> {
        actions.iter().map(|a| a.op).collect()
    }

    #[test]
    fn test_clean_entry_is_noop() {
        let l = local("Notes.md", "hello\n");
        let r = remote("Notes.md", "hello\n", 0);
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        assert!(reconcile(&l, &r, &s, SyncMode::Full).is_empty());
    }

    #[test]
    fn test_local_edit_pushes() {
        let l = local("Notes.md", "hello world\n");
        let r = remote("Notes.md", "hello\n", 0);
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        assert_eq!(ops(&reconcile(&l, &r, &s, SyncMode::Full)), vec![Op::Push]);
    }

    #[test]
    fn test_remote_edit_pulls() {
        let l = local("Notes.md", "hello\n");
        let r = remote("Notes.md", "hello there\n", 60);
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        assert_eq!(ops(&reconcile(&l, &r, &s, SyncMode::Full)), vec![Op::Pull]);
    }

    #[test]
    fn test_mtime_bump_with_same_content_is_noop() {
        let l = local("Notes.md", "hello\n");
        let r = remote("Notes.md", "hello\n", 60);
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        assert!(reconcile(&l, &r, &s, SyncMode::Full).is_empty());
    }

    #[test]
    fn test_equal_mtime_counts_as_unchanged() {
        let l = local("Notes.md", "hello\n");
        // Different content but identical mtime: not changed remotely.
        let r = remote("Notes.md", "different\n", 0);
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        assert!(reconcile(&l, &r, &s, SyncMode::Full).is_empty());
    }

    #[test]
    fn test_both_changed_is_conflict() {
        let l = local("Notes.md", "local edit\n");
        let r = remote("Notes.md", "remote edit\n", 60);
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        assert_eq!(
            ops(&reconcile(&l, &r, &s, SyncMode::Full)),
            vec![Op::MarkConflict(ConflictReason::BothModified)]
        );
    }

    #[test]
    fn test_force_pull_overrides_conflict_row() {
        let l = local("Notes.md", "local edit\n");
        let r = remote("Notes.md", "remote edit\n", 60);
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        assert_eq!(
            ops(&reconcile(&l, &r, &s, SyncMode::Pull { force: true })),
            vec![Op::Pull]
        );
        assert_eq!(
            ops(&reconcile(&l, &r, &s, SyncMode::Push { force: true })),
            vec![Op::Push]
        );
    }

    #[test]
    fn test_force_never_clears_sticky_conflict() {
        let l = local("Notes.md", "local edit\n");
        let r = remote("Notes.md", "remote edit\n", 60);
        let mut entry = synced_entry("Notes.md", "hello\n", "hello\n");
        entry.status = EntryStatus::Conflict;
        let s = vec![entry];
        assert!(reconcile(&l, &r, &s, SyncMode::Pull { force: true }).is_empty());
        assert!(reconcile(&l, &r, &s, SyncMode::Push { force: true }).is_empty());
    }

    #[test]
    fn test_new_remote_creates_local() {
        let l = LocalSnapshot::default();
        let r = remote("Notes.md", "hello\n", 0);
        assert_eq!(
            ops(&reconcile(&l, &r, &[], SyncMode::Full)),
            vec![Op::CreateLocal]
        );
    }

    #[test]
    fn test_untracked_pair_adopts_in_pull_creates_in_push() {
        let l = local("Notes.md", "hello\n");
        let r = remote("Notes.md", "hello\n", 0);
        assert_eq!(
            ops(&reconcile(&l, &r, &[], SyncMode::Pull { force: false })),
            vec![Op::AdoptBoth]
        );
        assert_eq!(
            ops(&reconcile(&l, &r, &[], SyncMode::Push { force: false })),
            vec![Op::CreateRemote]
        );
    }

    #[test]
    fn test_new_local_creates_remote() {
        let l = local("Notes.md", "hello\n");
        let r = RemoteSnapshot::default();
        assert_eq!(
            ops(&reconcile(&l, &r, &[], SyncMode::Full)),
            vec![Op::CreateRemote]
        );
    }

    #[test]
    fn test_clean_local_deletion_deletes_remote() {
        let l = LocalSnapshot::default();
        let r = remote("Notes.md", "hello\n", 0);
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        assert_eq!(
            ops(&reconcile(&l, &r, &s, SyncMode::Full)),
            vec![Op::DeleteRemote]
        );
    }

    #[test]
    fn test_local_deletion_with_remote_change_marks_deleted_local() {
        let l = LocalSnapshot::default();
        let r = remote("Notes.md", "changed remotely\n", 60);
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        assert_eq!(
            ops(&reconcile(&l, &r, &s, SyncMode::Full)),
            vec![Op::MarkDeletedLocal]
        );
    }

    #[test]
    fn test_clean_remote_deletion_deletes_local() {
        let l = local("Notes.md", "hello\n");
        let r = RemoteSnapshot::default();
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        assert_eq!(
            ops(&reconcile(&l, &r, &s, SyncMode::Full)),
            vec![Op::DeleteLocal]
        );
    }

    #[test]
    fn test_remote_deletion_with_local_edit_marks_deleted_remote() {
        let l = local("Notes.md", "edited\n");
        let r = RemoteSnapshot::default();
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        assert_eq!(
            ops(&reconcile(&l, &r, &s, SyncMode::Full)),
            vec![Op::MarkDeletedRemote]
        );
    }

    #[test]
    fn test_both_gone_drops_state() {
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        assert_eq!(
            ops(&reconcile(
                &LocalSnapshot::default(),
                &RemoteSnapshot::default(),
                &s,
                SyncMode::Full
            )),
            vec![Op::DeleteState]
        );
    }

    #[test]
    fn test_kind_change_is_conflict() {
        let l = local("Tasks", "");
        let mut r = remote("Tasks", "", 60);
        r.entries.get_mut("Tasks").unwrap().node.kind = EntryKind::Database;
        let mut entry = synced_entry("Tasks", "", "");
        entry.kind = EntryKind::ContainerPage;
        let s = vec![entry];
        assert_eq!(
            ops(&reconcile(&l, &r, &s, SyncMode::Full)),
            vec![Op::MarkConflict(ConflictReason::KindChanged)]
        );
    }

    #[test]
    fn test_pull_mode_filters_push_actions() {
        let l = local("Notes.md", "local edit\n");
        let r = remote("Notes.md", "hello\n", 0);
        let s = vec![synced_entry("Notes.md", "hello\n", "hello\n")];
        // Local-modified produces a push op, which pull mode filters out.
        assert!(reconcile(&l, &r, &s, SyncMode::Pull { force: false }).is_empty());
    }

    #[test]
    fn test_conversion_error_skipped_until_bytes_change() {
        let l = local("Notes.md", "bad\n");
        let r = remote("Notes.md", "hello\n", 0);
        let mut entry = synced_entry("Notes.md", "bad\n", "hello\n");
        entry.status = EntryStatus::ConversionError;
        let s = vec![entry.clone()];
        assert!(reconcile(&l, &r, &s, SyncMode::Full).is_empty());

        // Once the file changes, the entry reconciles normally again.
        let l2 = local("Notes.md", "fixed\n");
        assert_eq!(ops(&reconcile(&l2, &r, &s, SyncMode::Full)), vec![Op::Push]);
    }
}
