use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sample-cache")]
#[command(about = "Cache and stage the files of analysis samples", long_about = None)]
pub struct Cli {
    /// Configuration file (default: SampleCache.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve the samples of a definition file, enumerating what is not cached
    Refresh {
        /// YAML sample definitions
        definitions: PathBuf,
        /// Re-enumerate every sample, ignoring the cache
        #[arg(long)]
        refresh: bool,
        /// Stage LOCAL files afterwards (default: site.stage)
        #[arg(long)]
        stage: bool,
        /// Worker threads
        #[arg(short, long)]
        threads: Option<usize>,
    },
    /// Resolve the samples of a definition file and stage their files locally
    Stage {
        /// YAML sample definitions
        definitions: PathBuf,
        /// Also stage files only reachable remotely
        #[arg(long)]
        remote: bool,
        /// Worker threads
        #[arg(short, long)]
        threads: Option<usize>,
    },
    /// List the samples held in the store
    List,
    /// Remove one sample from the store
    Forget {
        /// Sample path, e.g. /MC/ttbar
        sample: String,
    },
    /// Print configuration values
    PrintConfig,
    /// Truncate all store tables
    TruncateDb,
}
