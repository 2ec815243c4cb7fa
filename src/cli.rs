use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "noised", version, about = "randomized background request scheduler")]
pub struct Cli {
    #[arg(long, default_value = ".")]
    pub base_dir: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Version,
    /// Spawn the daemon in the background
    Start,
    /// Send SIGINT to the running daemon
    Stop,
    Status,
    History {
        #[arg(long, default_value_t = 20)]
        tail: usize,
    },
    Logs {
        #[arg(long, default_value_t = 50)]
        tail: usize,
    },
    /// Run a manual search, outside schedule and quota
    Search {
        query: Option<String>,
    },
    Enable,
    Disable,
    /// Fire a host trigger now
    Trigger {
        #[arg(value_enum, default_value_t = TriggerArg::Refresh)]
        kind: TriggerArg,
    },
    /// Execute one cycle now, ignoring the planned fire time
    RunNow,
    ResetStats,
    /// Print the effective settings
    Config,
    Daemon,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TriggerArg {
    Refresh,
    Processing,
}
