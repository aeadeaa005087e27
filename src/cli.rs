use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use fleetkit::{Filter, Operation};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "moonfrp")]
#[command(version)]
#[command(about = "Bulk operations, connectivity tests and atomic config updates for FRP tunnels", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start, stop, restart or reload many services at once
    Bulk(BulkArgs),

    /// Test TCP connectivity to every client's server endpoint
    Test(TestArgs),

    /// Change a field (or the whole body) of many configs, all or nothing
    Update(UpdateArgs),

    /// Show service status (cached, refreshed in the background)
    Status(StatusArgs),

    /// Validate configs without changing anything
    Validate {
        /// Which configs to check
        #[arg(short, long, default_value = "all")]
        filter: Filter,
    },

    /// Set the tags of a config (replaces existing tags)
    Tag {
        /// Config name (file stem)
        name: String,

        /// Tags to set; none clears them
        tags: Vec<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Bulk
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OperationArg {
    Start,
    Stop,
    Restart,
    Reload,
}

impl From<OperationArg> for Operation {
    fn from(arg: OperationArg) -> Self {
        match arg {
            OperationArg::Start => Self::Start,
            OperationArg::Stop => Self::Stop,
            OperationArg::Restart => Self::Restart,
            OperationArg::Reload => Self::Reload,
        }
    }
}

#[derive(Args)]
pub struct BulkArgs {
    /// Operation to apply to every selected service
    #[arg(short, long, value_enum)]
    pub operation: OperationArg,

    /// Which services: all, type:server|client, tag:T, name:GLOB, status:active|inactive
    #[arg(short, long, default_value = "all")]
    pub filter: Filter,

    /// Maximum operations in flight (default from settings)
    #[arg(short = 'j', long)]
    pub max_parallel: Option<usize>,

    /// List the services that would be affected, then exit
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation for stop/restart
    #[arg(short, long)]
    pub yes: bool,
}

// ============================================================================
// Test
// ============================================================================

#[derive(Args)]
pub struct TestArgs {
    /// Maximum probes in flight (default from settings)
    #[arg(short = 'j', long)]
    pub max_parallel: Option<usize>,

    /// Per-endpoint connect timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Which client configs to test
    #[arg(short, long, default_value = "type:client")]
    pub filter: Filter,
}

// ============================================================================
// Update
// ============================================================================

#[derive(Args)]
#[command(group(clap::ArgGroup::new("change").required(true).args(["field", "replace_with"])))]
pub struct UpdateArgs {
    /// Dotted field path, e.g. `serverPort` or `auth.token`
    #[arg(long, requires = "value")]
    pub field: Option<String>,

    /// New value, parsed as a TOML literal when possible
    #[arg(long, requires = "field")]
    pub value: Option<String>,

    /// Replace each selected config with the contents of FILE
    #[arg(long, value_name = "FILE")]
    pub replace_with: Option<PathBuf>,

    /// Which configs to update
    #[arg(short, long, default_value = "all")]
    pub filter: Filter,

    /// Validate and show the diff without writing
    #[arg(long)]
    pub dry_run: bool,
}

// ============================================================================
// Status
// ============================================================================

#[derive(Args)]
pub struct StatusArgs {
    /// Recompute now instead of serving the cached view
    #[arg(short, long)]
    pub refresh: bool,

    /// Redraw every SECS seconds until interrupted
    #[arg(short, long, value_name = "SECS")]
    pub watch: Option<u64>,
}
