use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::research::ResearchDepth;

#[derive(Parser, Debug)]
#[command(name = "deedscout")]
#[command(version)]
#[command(about = "Cached geocoding and concurrent research for property records", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    pub output_format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize configuration
    Init,
    /// Research properties from a JSON file (an array of property objects)
    Research {
        file: PathBuf,
        /// basic, standard, comprehensive or exhaustive
        #[arg(short, long)]
        depth: Option<ResearchDepth>,
        /// Properties researched at the same time
        #[arg(long)]
        concurrency: Option<usize>,
        /// Ignore cached reports
        #[arg(long)]
        force_refresh: bool,
    },
    /// Geocode a single address
    Geocode {
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        zip: Option<String>,
        /// Provider to try first
        #[arg(long)]
        provider: Option<String>,
        /// Skip the geocode cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Geocode every property in a JSON file
    GeocodeBatch {
        file: PathBuf,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Inspect or maintain the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Remove cached entries
    Clear {
        /// Only entries of this data type
        #[arg(long = "type")]
        data_type: Option<String>,
    },
    /// Remove expired and corrupted entries
    Purge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// Human-readable summary
    Text,
}
