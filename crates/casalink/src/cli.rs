//! Clap derive structures for the `casalink` CLI.

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// casalink -- talk to a home-automation controller from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "casalink",
    version,
    about = "Monitor and inspect Miniserver-class controllers",
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
    /// Controller profile to use
    #[arg(long, short = 'p', env = "CASALINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Controller address (overrides profile)
    #[arg(long, short = 'a', env = "CASALINK_ADDRESS", global = true)]
    pub address: Option<String>,

    /// Username (overrides profile)
    #[arg(long, short = 'u', env = "CASALINK_USERNAME", global = true)]
    pub username: Option<String>,

    /// Force insecure (plain ws://) transport instead of probing
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Probe a controller's version and transport capabilities
    Probe,

    /// Connect, subscribe, and print state changes as they arrive
    #[command(alias = "mon")]
    Monitor(MonitorArgs),

    /// Inspect the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Args)]
pub struct MonitorArgs {
    /// Print a value snapshot every this many seconds (0 disables)
    #[arg(long, default_value = "10")]
    pub snapshot_secs: u64,

    /// Only show controls whose name contains this substring
    #[arg(long)]
    pub filter: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,
    /// Print the effective configuration (passwords redacted)
    Show,
}
