use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for pagesync operations
///
/// The remote variants distinguish transient failures (retried by the rate
/// limiter) from permanent ones (fail the entry immediately).
#[derive(Debug, Error)]
pub enum SyncError {
    /// General error for any kind of I/O issue not otherwise documented here.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A failed file read. The sync run continues with other entries.
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to be read
        path: PathBuf,
        /// std::io error that caused this error
        source: std::io::Error,
    },

    /// A failed file write. The sync run continues with other entries.
    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to file that failed to be written
        path: PathBuf,
        /// std::io error that caused this error
        source: std::io::Error,
    },

    /// Frontmatter or schema YAML that could not be parsed or serialized.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// State file that could not be parsed or serialized.
    #[error("State parse error: {0}")]
    State(#[from] serde_json::Error),

    /// Error deserializing a config.toml file.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Config failed to serialize.
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Failure to find the user config directory.
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// No API token in the environment or the global config.
    #[error("No API token. Set PAGESYNC_TOKEN or add `api_token` to the global config")]
    NoToken,

    /// The given directory is not a pagesync workspace.
    #[error("Workspace not found at '{0}'. Run 'pagesync init' first")]
    WorkspaceNotFound(PathBuf),

    /// `init` into a directory that is already a workspace.
    #[error("Workspace already exists at '{0}'")]
    WorkspaceAlreadyExists(PathBuf),

    /// Another engine holds the workspace lock.
    #[error("Workspace '{0}' is locked by another pagesync process")]
    WorkspaceLocked(PathBuf),

    /// State invariants violated at load. Fatal; the engine refuses to run.
    #[error("State corrupt: {0}. Remove .pagesync/state.json and re-pull to rebuild")]
    StateCorrupt(String),

    /// Transient remote failure that survived the whole retry budget.
    #[error("Remote request failed after {attempts} attempts: {message}")]
    RemoteExhausted {
        /// Attempts made, including the first
        attempts: u32,
        /// Last underlying error
        message: String,
    },

    /// Non-success HTTP status from the remote service.
    #[error("Remote returned status {code}: {message}")]
    RemoteStatus {
        /// HTTP status code
        code: u16,
        /// Response body or reason
        message: String,
    },

    /// Authentication or authorization failure. Never retried.
    #[error("Remote authentication failed: {0}")]
    Auth(String),

    /// The remote document does not exist (or is archived).
    #[error("Remote document not found: {0}")]
    RemoteNotFound(String),

    /// Transport-level HTTP failure (connect, timeout, TLS).
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// A single attempt exceeded its timeout.
    #[error("Remote request timed out after {0:?}")]
    RemoteTimeout(std::time::Duration),

    /// Filesystem watch setup or delivery failure.
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// A document that cannot be converted between markdown and the remote
    /// representation. Sticky per entry until the file changes.
    #[error("Cannot convert '{path}': {message}")]
    Conversion {
        /// Workspace-relative path of the entry
        path: String,
        /// What went wrong
        message: String,
    },

    /// More than one remote document matched an orphan-adoption probe.
    #[error(
        "Ambiguous adoption for '{path}': {count} remote documents titled '{title}' under the same parent"
    )]
    AmbiguousAdoption {
        /// Workspace-relative path of the local entry
        path: String,
        /// Probed title
        title: String,
        /// Number of matching remote documents
        count: usize,
    },

    /// A remote URL that does not contain a document id.
    #[error("Invalid remote URL: '{0}'")]
    InvalidRemoteUrl(String),

    /// Lookup of a path with no state entry.
    #[error("No entry for path '{0}'")]
    EntryNotFound(String),

    /// `resolve` on an entry that is not in conflict.
    #[error("Entry '{0}' is not in conflict")]
    NotInConflict(String),
}

/// Result type alias for pagesync operations
pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Whether the rate limiter should retry this error with backoff.
    ///
    /// Throttling, server errors and transport failures are transient;
    /// every other remote status fails immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::RemoteStatus { code, .. } => *code == 429 || (500..600).contains(code),
            SyncError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SyncError::RemoteTimeout(_) => true,
            _ => false,
        }
    }

    /// Whether this is a throttling response (drives the backoff schedule).
    pub fn is_throttle(&self) -> bool {
        matches!(self, SyncError::RemoteStatus { code: 429, .. })
    }
}
