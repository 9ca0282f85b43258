use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "hoard")]
#[command(about = "Versioned, deduplicated file backups", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to Hoard.toml in the working directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level unless TRACING_LEVEL says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Back up every configured location
    Backup,
    /// Verify every stored blob against the catalog
    Check {
        /// Keep going after the first mismatch and report all of them
        #[arg(long)]
        exhaustive: bool,
    },
    /// Restore entries of a backup into an empty folder
    Restore {
        /// Backup id (see `list`)
        #[arg(short, long)]
        backup: i64,
        /// Entry ids to restore (see `browse`); defaults to every location root
        #[arg(short, long)]
        entry: Vec<i64>,
        /// Target folder, created if missing, must be empty otherwise
        target: PathBuf,
        /// Leave files that failed during the backup out instead of taking
        /// them from an earlier backup
        #[arg(long)]
        no_substitute: bool,
    },
    /// List backups, oldest first
    List,
    /// List the entries below a folder of a backup
    Browse {
        #[arg(short, long)]
        backup: i64,
        /// Folder entry id; the location roots when omitted
        #[arg(short, long)]
        parent: Option<i64>,
    },
    /// Find entries by name, case-insensitively
    Search {
        needle: String,
        /// Restrict the search to one backup
        #[arg(short, long)]
        backup: Option<i64>,
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },
    /// Print catalog statistics
    Stats,
    /// Print configuration values
    PrintConfig,
}
