use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "archiveforge")]
#[command(
    author,
    version,
    about = "Reconstruct live-archive media assets and repackage them for delivery"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Package every asset container in the source store
    Run {
        /// Package only these containers (comma separated or repeated)
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Number of assets packaged at once (1-10)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Cancel the remaining assets after the first failure
        #[arg(long)]
        fail_fast: bool,
    },

    /// Package a single asset container
    Package {
        /// Container holding the asset
        #[arg(required = true)]
        container: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the tracks, inputs and outputs planned for an asset
    Inspect {
        /// Container holding the asset
        #[arg(required = true)]
        container: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
