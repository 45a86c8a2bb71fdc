//! CLI/env configuration for the outer harness binary.
//!
//! Mirrors the teacher's `clap::Parser`-derived server config: every
//! field is either a flag or falls back to an environment variable, so
//! the same binary works invoked directly or wired up by a process
//! supervisor.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "syncbase", about = "Peer-to-peer group-chat instance")]
pub struct Config {
    /// Seed phrase this instance derives its signing identity from.
    #[arg(long, env = "SYNCBASE_SEED")]
    pub seed: String,

    /// Directory the log and view are persisted under. Defaults to a
    /// platform data directory under the instance's own name.
    #[arg(long, env = "SYNCBASE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Server name to initialize with, if this is the first run.
    #[arg(long)]
    pub name: Option<String>,

    /// Invite token to claim on startup instead of initializing a server.
    #[arg(long)]
    pub join: Option<String>,
}

impl Config {
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("syncbase")
        })
    }
}
