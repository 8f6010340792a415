//! Command-line argument structures and enums

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pagesync")]
#[command(version)]
#[command(
    about = "Sync a local markdown workspace with a remote document store",
    long_about = None
)]
pub struct Cli {
    /// Override workspace location (default: current directory)
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a workspace bound to a remote root document
    Init {
        /// Remote root document URL (or bare id)
        remote_url: String,

        /// Directory for the workspace (default: current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Apply remote changes to the local tree
    Pull {
        /// Overwrite local modifications (never clears conflicts)
        #[arg(long)]
        force: bool,
    },

    /// Apply local changes to the remote tree
    Push {
        /// Overwrite remote modifications (never clears conflicts)
        #[arg(long)]
        force: bool,
    },

    /// Pull, then push
    Sync,

    /// Show pending actions without writing anything
    Status,

    /// Exit a conflict by choosing a side
    Resolve {
        /// Workspace-relative path of the conflicted entry
        path: String,

        #[command(flatten)]
        choice: ResolveChoice,
    },

    /// Watch for local and remote changes, syncing continuously
    Watch {
        /// Seconds between remote polls
        #[arg(long)]
        interval: Option<u64>,

        /// Seconds of quiet before a batched sync runs
        #[arg(long)]
        debounce: Option<u64>,
    },

    /// Show configured workspaces
    List,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct ResolveChoice {
    /// Treat local bytes as authoritative
    #[arg(long)]
    pub keep_local: bool,

    /// Treat remote content as authoritative
    #[arg(long)]
    pub keep_remote: bool,

    /// Keep a renamed local copy, apply remote as the canonical entry
    #[arg(long)]
    pub keep_both: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_resolve_requires_exactly_one_choice() {
        assert!(Cli::try_parse_from(["pagesync", "resolve", "Notes.md"]).is_err());
        assert!(
            Cli::try_parse_from([
                "pagesync",
                "resolve",
                "Notes.md",
                "--keep-local",
                "--keep-remote"
            ])
            .is_err()
        );
        let cli =
            Cli::try_parse_from(["pagesync", "resolve", "Notes.md", "--keep-both"]).unwrap();
        match cli.command {
            Commands::Resolve { path, choice } => {
                assert_eq!(path, "Notes.md");
                assert!(choice.keep_both);
            }
            _ => panic!("expected resolve command"),
        }
    }
}
