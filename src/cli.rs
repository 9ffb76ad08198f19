use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(version)]
#[command(about = "Apply a catalog of resources in dependency order", long_about = None)]
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
    /// Apply a catalog to this system
    Apply(ApplyArgs),

    /// Export the relationship graph as DOT
    Graph(GraphArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Args)]
pub struct ApplyArgs {
    /// Catalog file (default: catalog.toml in the config dir)
    pub catalog: Option<PathBuf>,

    /// Run options file (default: converge.toml in the config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Only apply resources with these tags (comma-separated)
    #[arg(short, long)]
    pub tags: Option<String>,

    /// Never apply resources with these tags (comma-separated)
    #[arg(long)]
    pub skip_tags: Option<String>,

    /// Ignore the tag filter from the config file
    #[arg(long)]
    pub ignore_tags: bool,

    /// Apply resources whose schedule says they are not due
    #[arg(long)]
    pub ignore_schedules: bool,

    /// Dry run - report what would change without changing it
    #[arg(short = 'n', long)]
    pub noop: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Write the DOT graph of any dependency cycle to this file
    #[arg(long)]
    pub cycle_graph: Option<PathBuf>,
}

// ============================================================================
// Graph
// ============================================================================

#[derive(Args)]
pub struct GraphArgs {
    /// Catalog file (default: catalog.toml in the config dir)
    pub catalog: Option<PathBuf>,

    /// Reverse every edge
    #[arg(long)]
    pub reversed: bool,

    /// Print only the dependency cycles
    #[arg(long, conflicts_with = "order")]
    pub cycles: bool,

    /// Print the evaluation order instead of the graph
    #[arg(long)]
    pub order: bool,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
