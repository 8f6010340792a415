//! pagesync: keep a local markdown tree in sync with a remote document store
//!
//! - Explicit pull/push/sync with three-way change detection
//! - Conflicts are first-class state, resolved explicitly
//! - Watch mode with debounced local events and periodic remote polls

/// CLI module - command-line interface for pagesync
mod cli;

#[tokio::main]
async fn main() {
    let code = cli::run().await;
    std::process::exit(code);
}
