//! pagesync_core: local-first sync engine for markdown workspaces.
//!
//! Keeps a directory tree of markdown documents bidirectionally synchronized
//! with a hierarchical remote document store (pages, child pages, database
//! entries). Sync is explicit; conflicts surface as first-class entry state
//! and require an explicit resolution.

#![warn(missing_docs)]

/// Workspace and global configuration
pub mod config;

/// Canonical markdown form and document rendering
pub mod convert;

/// Sync engine orchestrator
pub mod engine;

/// Error (common error types)
pub mod error;

/// YAML frontmatter parsing and serialization
pub mod frontmatter;

/// Filesystem abstraction
pub mod fs;

/// Content-addressed hashing
pub mod hash;

/// Pure reconciliation of local/remote/state into actions
pub mod reconcile;

/// Rate-limited remote document service client
pub mod remote;

/// Durable per-entry sync state
pub mod state;

/// Local and remote tree snapshots
pub mod walker;

/// Debounced watch daemon
pub mod watcher;

/// Workspace layout and locking
pub mod workspace;

pub use engine::{RunSummary, SyncEngine};
pub use error::{Result, SyncError};
pub use hash::ContentHash;
pub use reconcile::{Action, Resolution, SyncMode};
pub use state::{Entry, EntryKind, EntryStatus, StateStore};
