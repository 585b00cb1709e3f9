//! Clap derive structures for the `fluxsync` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// fluxsync -- watch and query a synchronized resource cache
#[derive(Debug, Parser)]
#[command(
    name = "fluxsync",
    version,
    about = "Watch pushed frames and batch-retrieve resources from a fluxsync server",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Server profile to use
    #[arg(long, short = 'p', env = "FLUXSYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "FLUXSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Stream URL (overrides profile)
    #[arg(long, env = "FLUXSYNC_STREAM_URL", global = true)]
    pub stream_url: Option<String>,

    /// Retrieve API base URL (overrides profile)
    #[arg(long, env = "FLUXSYNC_RETRIEVE_URL", global = true)]
    pub retrieve_url: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Batch window in milliseconds
    #[arg(long, global = true)]
    pub debounce_ms: Option<u64>,

    /// Output format
    #[arg(long, short = 'o', default_value = "json", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print frames pushed on one or more channels
    Watch(WatchArgs),

    /// Retrieve resources by id or by name
    Get(GetArgs),

    /// Inspect the configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Channels to subscribe to
    #[arg(required = true)]
    pub channels: Vec<String>,

    /// Exit after this many frames
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

// ── Get ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Resource type (e.g. "labels")
    pub resource: String,

    /// Numeric ids or names; all keys must be of one kind
    #[arg(required = true)]
    pub keys: Vec<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Print the effective configuration (header values redacted)
    Show,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
