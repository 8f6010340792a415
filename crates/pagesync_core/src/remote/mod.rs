//! Rate-limited remote document service client.
//!
//! The engine sees the remote store through the [`RemoteClient`] trait: a
//! typed surface over the service's tree, content, and mutation endpoints.
//! All outbound calls in a workspace go through one [`RateLimiter`], which
//! bounds concurrency, spaces request starts, and retries transient failures
//! with jittered exponential backoff.
//!
//! ## Object safety
//!
//! `RemoteClient` is designed to be object-safe so it can be used behind
//! `dyn RemoteClient` inside the engine. To enable this, all methods return
//! boxed futures.

mod http;
mod limiter;

pub use http::HttpRemote;
pub use limiter::{RateLimiter, RateLimiterConfig, backoff_delay};

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_yaml::Value;

use crate::error::Result;
use crate::frontmatter::ParsedDocument;
use crate::state::EntryKind;

/// A boxed future for object-safe async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One node of the remote document tree, as reported by `fetch_tree`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    /// Opaque remote identifier
    pub id: String,
    /// Parent document id; None when the node is a child of the tree root
    pub parent_id: Option<String>,
    /// Document kind
    pub kind: EntryKind,
    /// Document title
    pub title: String,
    /// Authoritative last-modified time
    pub mtime: DateTime<Utc>,
    /// Display URL
    pub url: Option<String>,
}

/// A remote document's content: rendered markdown body plus properties.
#[derive(Debug, Clone, Default)]
pub struct RemoteContent {
    /// Property values (database entries) or schema (databases)
    pub properties: IndexMap<String, Value>,
    /// Rendered markdown body
    pub markdown: String,
}

impl RemoteContent {
    /// Build from a parsed local document.
    #[must_use]
    pub fn from_document(doc: &ParsedDocument) -> Self {
        Self {
            properties: doc.properties.clone(),
            markdown: doc.body.clone(),
        }
    }

    /// View as a parsed document for rendering.
    #[must_use]
    pub fn to_document(&self) -> ParsedDocument {
        ParsedDocument {
            properties: self.properties.clone(),
            body: self.markdown.clone(),
        }
    }
}

/// Typed surface over the remote document service.
///
/// `update` is idempotent by content; `create` is not, so the engine probes
/// with `find_children` before re-creating after a crash.
pub trait RemoteClient: Send + Sync {
    /// Traverse the remote subtree under `root_id`.
    ///
    /// Returns every descendant node (not the root itself), parents before
    /// children.
    fn fetch_tree<'a>(&'a self, root_id: &'a str) -> BoxFuture<'a, Result<Vec<RemoteNode>>>;

    /// Retrieve one document's rendered content and properties.
    fn fetch_content<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<RemoteContent>>;

    /// Create a new remote document under `parent_id`.
    fn create<'a>(
        &'a self,
        parent_id: &'a str,
        kind: EntryKind,
        title: &'a str,
        content: &'a RemoteContent,
    ) -> BoxFuture<'a, Result<RemoteNode>>;

    /// Replace a document's content, returning the new modification time.
    fn update<'a>(
        &'a self,
        remote_id: &'a str,
        content: &'a RemoteContent,
    ) -> BoxFuture<'a, Result<DateTime<Utc>>>;

    /// Archive the remote document.
    fn delete<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Find direct children of `parent_id` with exactly the given title.
    /// Used by the orphan-adoption probe after a crashed create.
    fn find_children<'a>(
        &'a self,
        parent_id: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<Vec<RemoteNode>>>;
}
