//! Workspace and global configuration.
//!
//! Two layers: a global config under the user's config directory (API token,
//! registry of workspaces for `pagesync list`), and a per-workspace config
//! inside the workspace metadata directory (remote binding, intervals).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::fs::FileSystem;

/// Environment variable consulted before the global config for the API token.
pub const TOKEN_ENV_VAR: &str = "PAGESYNC_TOKEN";

fn default_base_url() -> String {
    "https://api.pagestore.dev".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_debounce() -> u64 {
    2
}

/// Per-workspace configuration, stored at `.pagesync/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Remote root document id this workspace is bound to
    pub remote_root_id: String,

    /// Base URL of the remote document service
    #[serde(default = "default_base_url")]
    pub remote_base_url: String,

    /// Seconds between remote polls in watch mode
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds of quiet before a debounced sync runs in watch mode
    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,
}

impl WorkspaceConfig {
    /// Create a config bound to the given remote root.
    pub fn new(remote_root_id: impl Into<String>) -> Self {
        Self {
            remote_root_id: remote_root_id.into(),
            remote_base_url: default_base_url(),
            poll_interval_secs: default_poll_interval(),
            debounce_secs: default_debounce(),
        }
    }

    /// Load from a specific path using a FileSystem
    pub fn load_from<FS: FileSystem>(fs: &FS, path: &Path) -> Result<Self> {
        let contents = fs.read_to_string(path).map_err(|e| SyncError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: WorkspaceConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save to a specific path using a FileSystem
    pub fn save_to<FS: FileSystem>(&self, fs: &FS, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs.create_dir_all(parent)?;
            }
        }
        let contents = toml::to_string_pretty(self)?;
        fs.write_file(path, contents.as_bytes())?;
        Ok(())
    }
}

/// Global configuration, stored at `~/.config/pagesync/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// API token for the remote document service.
    /// The `PAGESYNC_TOKEN` environment variable takes precedence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Workspaces registered by `pagesync init`
    #[serde(default)]
    pub workspaces: Vec<PathBuf>,
}

impl GlobalConfig {
    /// Get the config file path (~/.config/pagesync/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pagesync").join("config.toml"))
    }

    /// Load from the default location, or return default if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                let contents = std::fs::read_to_string(&path)?;
                let config: GlobalConfig = toml::from_str(&contents)?;
                return Ok(config);
            }
        }
        Ok(GlobalConfig::default())
    }

    /// Save to the default location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or(SyncError::NoConfigDir)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    /// Resolve the API token: environment first, then the config file.
    pub fn token(&self) -> Result<String> {
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            if !token.is_empty() {
                return Ok(token);
            }
        }
        self.api_token.clone().ok_or(SyncError::NoToken)
    }

    /// Register a workspace path, ignoring duplicates.
    pub fn register_workspace(&mut self, root: &Path) {
        if !self.workspaces.iter().any(|w| w == root) {
            self.workspaces.push(root.to_path_buf());
        }
    }
}

/// Extract the root document id from a remote share URL.
///
/// Accepts a bare id, or a URL whose last path segment is (or ends with) the
/// id, e.g. `https://pagestore.dev/w/Team-Notes-8a4f2c` -> `8a4f2c`.
pub fn parse_remote_url(url: &str) -> Result<String> {
    let candidate = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .rsplit('-')
        .next()
        .unwrap_or(url);

    let valid = candidate.len() >= 6 && candidate.chars().all(|c| c.is_ascii_alphanumeric());
    if !valid {
        return Err(SyncError::InvalidRemoteUrl(url.to_string()));
    }
    Ok(candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;

    #[test]
    fn test_workspace_config_roundtrip() {
        let fs = InMemoryFileSystem::new();
        let config = WorkspaceConfig::new("abc123def");
        let path = Path::new("ws/.pagesync/config.toml");
        config.save_to(&fs, path).unwrap();

        let loaded = WorkspaceConfig::load_from(&fs, path).unwrap();
        assert_eq!(loaded.remote_root_id, "abc123def");
        assert_eq!(loaded.poll_interval_secs, 30);
        assert_eq!(loaded.debounce_secs, 2);
    }

    #[test]
    fn test_parse_remote_url_forms() {
        assert_eq!(parse_remote_url("8a4f2c91d0").unwrap(), "8a4f2c91d0");
        assert_eq!(
            parse_remote_url("https://pagestore.dev/w/Team-Notes-8a4f2c91d0").unwrap(),
            "8a4f2c91d0"
        );
        assert_eq!(
            parse_remote_url("https://pagestore.dev/w/8a4f2c91d0/").unwrap(),
            "8a4f2c91d0"
        );
        assert!(parse_remote_url("https://pagestore.dev/").is_err());
    }
}
