//! Debounced watch daemon.
//!
//! Three concurrent activities: a local change listener over filesystem
//! events, a periodic remote poller comparing tree mtimes against state, and
//! a queue processor that runs `sync()` once per quiet window. A sync is
//! never preempted mid-entry; events arriving during a run batch into the
//! next window.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::SyncEngine;
use crate::error::Result;
use crate::fs::FileSystem;
use crate::remote::RemoteClient;
use crate::state::StateStore;
use crate::workspace::META_DIR;

/// Watch-mode tunables.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Seconds between remote polls
    pub interval: Duration,
    /// Quiet window before a batched sync runs
    pub debounce: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            debounce: Duration::from_secs(2),
        }
    }
}

/// Whether a changed path belongs to the sync-managed set.
///
/// Everything under the metadata directory and hidden components is noise;
/// so are non-markdown files other than a database schema.
fn is_managed(root: &Path, path: &Path) -> bool {
    let rel = match path.strip_prefix(root) {
        Ok(rel) => rel,
        Err(_) => return false,
    };
    for component in rel.components() {
        let name = component.as_os_str().to_string_lossy();
        if name == META_DIR || name.starts_with('.') {
            return false;
        }
    }
    match rel.extension().and_then(|e| e.to_str()) {
        Some("md") => true,
        Some("yaml") => rel
            .file_name()
            .is_some_and(|n| n == crate::workspace::SCHEMA_FILE),
        _ => path.is_dir(),
    }
}

/// Long-running watch mode over one workspace.
pub struct WatchDaemon<FS: FileSystem + Clone> {
    engine: SyncEngine<FS>,
    options: WatchOptions,
    stop: Arc<AtomicBool>,
}

impl<FS: FileSystem + Clone> WatchDaemon<FS> {
    /// Wrap an engine for watch mode.
    pub fn new(engine: SyncEngine<FS>, options: WatchOptions) -> Self {
        let stop = engine.stop_flag();
        Self {
            engine,
            options,
            stop,
        }
    }

    /// A flag that shuts the daemon down after the current window.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Run until the stop flag is set or the event stream closes.
    pub async fn run(&mut self) -> Result<()> {
        let root = self.engine.workspace().root.clone();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();

        let watch_root = root.clone();
        let mut debouncer = new_debouncer(
            self.options.debounce,
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events
                        .iter()
                        .flat_map(|e| e.paths.iter())
                        .filter(|p| is_managed(&watch_root, p))
                        .cloned()
                        .collect();
                    if !paths.is_empty() {
                        let _ = tx.send(paths);
                    }
                }
                Err(errors) => {
                    for err in errors {
                        warn!(error = %err, "watch error");
                    }
                }
            },
        )?;
        debouncer.watch(&root, RecursiveMode::Recursive)?;

        info!(root = %root.display(), "watching for changes");

        let mut poll = tokio::time::interval(self.options.interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        poll.tick().await; // immediate first tick

        loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("watch daemon stopping");
                return Ok(());
            }

            let run_sync = tokio::select! {
                changed = rx.recv() => match changed {
                    Some(paths) => {
                        debug!(count = paths.len(), "local changes detected");
                        // Batch anything else already queued into this run.
                        while rx.try_recv().is_ok() {}
                        true
                    }
                    None => return Ok(()),
                },
                _ = poll.tick() => {
                    match self.remote_changed().await {
                        Ok(changed) => changed,
                        Err(err) => {
                            warn!(error = %err, "remote poll failed");
                            false
                        }
                    }
                }
            };

            if run_sync {
                match self.engine.sync().await {
                    Ok(summary) => info!(
                        succeeded = summary.succeeded,
                        conflicted = summary.conflicted,
                        failed = summary.failed,
                        "sync complete"
                    ),
                    Err(err) => error!(error = %err, "sync failed"),
                }
            }
        }
    }

    /// Whether any remote document's mtime exceeds the recorded one.
    async fn remote_changed(&self) -> Result<bool> {
        remote_tree_changed(
            self.engine.remote_client(),
            &self.engine.workspace().config.remote_root_id,
            self.engine.store(),
        )
        .await
    }
}

/// Compare the remote tree's mtimes against state. Any unknown node or
/// advanced mtime (or a tracked node now missing) means a sync is due.
pub async fn remote_tree_changed<FS: FileSystem>(
    client: &Arc<dyn RemoteClient>,
    root_id: &str,
    state: &StateStore<FS>,
) -> Result<bool> {
    let nodes = client.fetch_tree(root_id).await?;
    let mut seen = 0usize;
    for node in &nodes {
        match state.get_by_remote_id(&node.id) {
            None => return Ok(true),
            Some(entry) => {
                seen += 1;
                match entry.remote_mtime {
                    Some(recorded) if node.mtime > recorded => return Ok(true),
                    Some(_) => {}
                    None => return Ok(true),
                }
            }
        }
    }
    Ok(seen != state.list_all().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_managed_filters_metadata_and_hidden() {
        let root = Path::new("/ws");
        assert!(is_managed(root, Path::new("/ws/Notes.md")));
        assert!(is_managed(root, Path::new("/ws/Tasks/_schema.yaml")));
        assert!(!is_managed(root, Path::new("/ws/.pagesync/state.json")));
        assert!(!is_managed(root, Path::new("/ws/.git/config")));
        assert!(!is_managed(root, Path::new("/ws/image.png")));
        assert!(!is_managed(root, Path::new("/elsewhere/Notes.md")));
    }
}
