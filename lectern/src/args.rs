use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Lectern AI response cache
#[derive(Debug, Parser)]
#[command(name = "lectern", about = "AI response cache for course lectures")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lectern.toml", env = "LECTERN_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the admin HTTP server
    Serve {
        /// Override the listen address
        #[arg(long, env = "LECTERN_LISTEN")]
        listen: Option<SocketAddr>,
    },
    /// Delete entries older than a number of days
    Cleanup {
        /// Age threshold in days (defaults to `cache.cleanup_days`)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Delete every entry referencing a lecture
    Invalidate {
        /// Lecture UUID
        lecture_id: String,
    },
    /// Delete all entries
    Clear {
        /// Must be `DELETE_ALL_CACHE`
        #[arg(long)]
        confirm: String,
    },
    /// Print cache statistics as JSON
    Stats,
}
