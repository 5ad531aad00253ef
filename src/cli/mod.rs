pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gator")]
#[command(about = "A multi-user RSS feed aggregator", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/gator/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file, overriding the config
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Create a user and log in as them
    Register {
        name: String,
    },
    /// Log in as an existing user
    Login {
        name: String,
    },
    /// List users
    Users,
    /// Periodically fetch feeds and store new posts
    #[command(name = "start-aggregator", alias = "agg")]
    StartAggregator {
        /// Time between ticks (e.g., "30s", "1m", "1h30m")
        interval: String,

        /// Feeds refreshed per tick (default from config)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Concurrent fetches when batch size is above 1 (default from config)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Add a feed and follow it
    #[command(alias = "addfeed")]
    AddFeed {
        name: String,
        url: String,
    },
    /// List all feeds
    Feeds,
    /// Follow an existing feed
    Follow {
        url: String,
    },
    /// List the feeds you follow
    Following,
    /// Stop following a feed
    Unfollow {
        url: String,
    },
    /// Show the latest posts from the feeds you follow
    Browse {
        #[arg(default_value_t = 2)]
        limit: usize,
    },
    /// Delete all users, feeds and posts
    Reset,
}

impl Commands {
    /// Commands that act on behalf of the current user.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Commands::AddFeed { .. }
                | Commands::Follow { .. }
                | Commands::Following
                | Commands::Unfollow { .. }
                | Commands::Browse { .. }
        )
    }
}
