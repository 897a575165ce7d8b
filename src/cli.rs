use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "kidlingo-sync",
    version,
    about = "Track a learner's progress offline and sync it with the KidLingo backend"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Learner whose progress is tracked
    #[arg(short = 'l', long, env = "KIDLINGO_LEARNER", default_value = "default", global = true)]
    pub learner: String,

    /// Backend base URL
    #[arg(long, env = "KIDLINGO_SERVER", global = true)]
    pub server: Option<String>,

    /// Bearer token for the backend.
    /// Prefer the KIDLINGO_TOKEN environment variable over the flag.
    #[arg(long, env = "KIDLINGO_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Directory holding the state database and downloaded content
    #[arg(long, default_value = "~/.kidlingo-sync", global = true)]
    pub data_dir: String,

    /// Treat this as today's date: ISO date (2025-01-02) or days ago (3d)
    #[arg(long, global = true)]
    pub today: Option<String>,

    /// Queue changes without contacting the backend
    #[arg(long, global = true)]
    pub offline: bool,

    /// XP needed per level; level N needs N times this
    #[arg(long, default_value_t = 100, global = true)]
    pub xp_per_level: u64,

    /// Max retries per sync item or asset before giving up
    #[arg(long, default_value_t = 3, global = true)]
    pub max_retries: u32,

    /// Initial retry delay in seconds (doubles each retry)
    #[arg(long, default_value_t = 2, global = true)]
    pub retry_delay: u64,

    /// Cap on storage used by downloaded content, in megabytes
    #[arg(long, global = true)]
    pub content_budget_mb: Option<u64>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show progress, queued sync items and downloaded content
    Status {
        /// List persistent sync failures
        #[arg(long)]
        failed: bool,
    },

    /// Award XP
    Xp { amount: u64 },

    /// Record today's practice
    Practice,

    /// Credit a finished story, lesson, word or game
    Complete {
        /// Content id as kind:id, e.g. story:the-red-kite
        content: String,

        /// XP granted for the first completion
        #[arg(long, default_value_t = 10)]
        xp: u64,
    },

    /// Transmit queued changes
    Sync {
        /// Keep running and flush as changes arrive, until Ctrl+C
        #[arg(long)]
        watch: bool,
    },

    /// Merge the backend's copy of the learner's progress
    Pull,

    /// Requeue persistent sync failures and transmit them
    RetryFailed,

    /// Download a content package for offline use
    Download {
        package: String,

        /// Child the package is for (defaults to the learner)
        #[arg(long)]
        child: Option<String>,
    },

    /// Record progress made in a downloaded package
    OfflineProgress {
        package: String,

        #[arg(long)]
        child: Option<String>,

        /// Completed item id (repeatable)
        #[arg(long = "completed")]
        completed: Vec<String>,

        #[arg(long, default_value_t = 0)]
        points: u64,

        #[arg(long, default_value_t = 0)]
        seconds: u64,
    },

    /// Delete downloaded content and free its storage
    DeleteContent { content_id: Uuid },

    /// Clear the learner's progress
    Reset {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["kidlingo-sync", "status"]).unwrap();
        assert_eq!(cli.data_dir, "~/.kidlingo-sync");
        assert_eq!(cli.xp_per_level, 100);
        assert_eq!(cli.max_retries, 3);
        assert!(!cli.offline);
        assert!(matches!(cli.command, Command::Status { failed: false }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "kidlingo-sync",
            "complete",
            "story:red-kite",
            "--xp",
            "25",
            "--learner",
            "ana",
            "--offline",
        ])
        .unwrap();
        assert_eq!(cli.learner, "ana");
        assert!(cli.offline);
        match cli.command {
            Command::Complete { content, xp } => {
                assert_eq!(content, "story:red-kite");
                assert_eq!(xp, 25);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_offline_progress_repeated_items() {
        let cli = Cli::try_parse_from([
            "kidlingo-sync",
            "offline-progress",
            "animals-1",
            "--completed",
            "cat",
            "--completed",
            "dog",
            "--points",
            "5",
        ])
        .unwrap();
        match cli.command {
            Command::OfflineProgress {
                package,
                completed,
                points,
                ..
            } => {
                assert_eq!(package, "animals-1");
                assert_eq!(completed, vec!["cat", "dog"]);
                assert_eq!(points, 5);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_delete_requires_uuid() {
        assert!(Cli::try_parse_from(["kidlingo-sync", "delete-content", "nope"]).is_err());
    }
}
