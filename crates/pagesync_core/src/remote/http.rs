//! HTTP implementation of [`RemoteClient`].
//!
//! Speaks the document service's JSON API with bearer-token auth. Every
//! request goes through the shared [`RateLimiter`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{BoxFuture, RateLimiter, RemoteClient, RemoteContent, RemoteNode};
use crate::error::{Result, SyncError};
use crate::state::EntryKind;

/// Rate-limited reqwest client for the remote document service.
pub struct HttpRemote {
    http: reqwest::Client,
    base_url: String,
    token: String,
    limiter: Arc<RateLimiter>,
}

/// Wire representation of a document node.
#[derive(Debug, Deserialize)]
struct NodeDto {
    id: String,
    #[serde(default)]
    parent_id: Option<String>,
    kind: EntryKind,
    title: String,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    url: Option<String>,
}

impl From<NodeDto> for RemoteNode {
    fn from(dto: NodeDto) -> Self {
        RemoteNode {
            id: dto.id,
            parent_id: dto.parent_id,
            kind: dto.kind,
            title: dto.title,
            mtime: dto.updated_at,
            url: dto.url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DocumentListDto {
    documents: Vec<NodeDto>,
}

#[derive(Debug, Deserialize)]
struct ContentDto {
    #[serde(default)]
    markdown: String,
    #[serde(default)]
    properties: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct UpdatedDto {
    updated_at: DateTime<Utc>,
}

impl HttpRemote {
    /// Build a client for `base_url` with the given bearer token.
    pub fn new(base_url: &str, token: &str, limiter: Arc<RateLimiter>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(limiter.config().attempt_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            limiter,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/documents{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => SyncError::Auth(message),
            404 => SyncError::RemoteNotFound(message),
            code => SyncError::RemoteStatus { code, message },
        })
    }

    fn properties_to_json(properties: &IndexMap<String, serde_yaml::Value>) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(properties)?)
    }

    fn properties_from_json(value: serde_json::Value) -> Result<IndexMap<String, serde_yaml::Value>> {
        if value.is_null() {
            return Ok(IndexMap::new());
        }
        Ok(serde_json::from_value(value)?)
    }
}

impl RemoteClient for HttpRemote {
    fn fetch_tree<'a>(&'a self, root_id: &'a str) -> BoxFuture<'a, Result<Vec<RemoteNode>>> {
        Box::pin(async move {
            self.limiter
                .run("fetch_tree", || async {
                    let response = self
                        .http
                        .get(self.url(&format!("/{root_id}/tree")))
                        .bearer_auth(&self.token)
                        .send()
                        .await?;
                    let list: DocumentListDto = Self::check(response).await?.json().await?;
                    debug!(root_id, nodes = list.documents.len(), "fetched remote tree");
                    Ok(list.documents.into_iter().map(RemoteNode::from).collect())
                })
                .await
        })
    }

    fn fetch_content<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<RemoteContent>> {
        Box::pin(async move {
            self.limiter
                .run("fetch_content", || async {
                    let response = self
                        .http
                        .get(self.url(&format!("/{remote_id}/content")))
                        .bearer_auth(&self.token)
                        .send()
                        .await?;
                    let dto: ContentDto = Self::check(response).await?.json().await?;
                    Ok(RemoteContent {
                        properties: Self::properties_from_json(dto.properties)?,
                        markdown: dto.markdown,
                    })
                })
                .await
        })
    }

    fn create<'a>(
        &'a self,
        parent_id: &'a str,
        kind: EntryKind,
        title: &'a str,
        content: &'a RemoteContent,
    ) -> BoxFuture<'a, Result<RemoteNode>> {
        Box::pin(async move {
            let properties = Self::properties_to_json(&content.properties)?;
            let body = json!({
                "parent_id": parent_id,
                "kind": kind,
                "title": title,
                "markdown": content.markdown,
                "properties": properties,
            });
            self.limiter
                .run("create", || async {
                    let response = self
                        .http
                        .post(self.url(""))
                        .bearer_auth(&self.token)
                        .json(&body)
                        .send()
                        .await?;
                    let dto: NodeDto = Self::check(response).await?.json().await?;
                    Ok(RemoteNode::from(dto))
                })
                .await
        })
    }

    fn update<'a>(
        &'a self,
        remote_id: &'a str,
        content: &'a RemoteContent,
    ) -> BoxFuture<'a, Result<DateTime<Utc>>> {
        Box::pin(async move {
            let properties = Self::properties_to_json(&content.properties)?;
            let body = json!({
                "markdown": content.markdown,
                "properties": properties,
            });
            self.limiter
                .run("update", || async {
                    let response = self
                        .http
                        .patch(self.url(&format!("/{remote_id}/content")))
                        .bearer_auth(&self.token)
                        .json(&body)
                        .send()
                        .await?;
                    let dto: UpdatedDto = Self::check(response).await?.json().await?;
                    Ok(dto.updated_at)
                })
                .await
        })
    }

    fn delete<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.limiter
                .run("delete", || async {
                    let response = self
                        .http
                        .delete(self.url(&format!("/{remote_id}")))
                        .bearer_auth(&self.token)
                        .send()
                        .await?;
                    Self::check(response).await?;
                    Ok(())
                })
                .await
        })
    }

    fn find_children<'a>(
        &'a self,
        parent_id: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<Vec<RemoteNode>>> {
        Box::pin(async move {
            self.limiter
                .run("find_children", || async {
                    let response = self
                        .http
                        .get(self.url(&format!("/{parent_id}/children")))
                        .bearer_auth(&self.token)
                        .query(&[("title", title)])
                        .send()
                        .await?;
                    let list: DocumentListDto = Self::check(response).await?.json().await?;
                    Ok(list.documents.into_iter().map(RemoteNode::from).collect())
                })
                .await
        })
    }
}
