use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use orthostream_logging::{LogDestination, DEFAULT_LOG_FILE};

/// Progressive retrieval of orthology search results and phylogenetic trees.
#[derive(Parser, Debug)]
#[command(name = "orthostream", version, about, long_about = None)]
pub(crate) struct Cli {
    /// RON file with client, search and tree settings.
    #[arg(short, long, value_name = "FILE", env = "ORTHOSTREAM_CONFIG", global = true)]
    pub(crate) config: Option<PathBuf>,
    /// Server root; overrides the configuration file.
    #[arg(long, value_name = "URL", env = "ORTHOSTREAM_BASE_URL", global = true)]
    pub(crate) base_url: Option<String>,
    #[arg(long, value_enum, default_value_t = LogArg::File, global = true)]
    pub(crate) log: LogArg,
    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Search orthologs, streamed (default) or paginated.
    Search {
        query: String,
        /// Request chunk 1, 2, ... instead of one event stream.
        #[arg(long)]
        paginate: bool,
        #[arg(long, value_name = "N")]
        chunk_size: Option<u32>,
        #[arg(long, value_name = "N")]
        max_chunks: Option<u32>,
    },
    /// Load a tree preview, and optionally the full streamed tree.
    Tree {
        id: String,
        #[arg(long)]
        full: bool,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogArg {
    Terminal,
    File,
    Both,
}

impl LogArg {
    pub(crate) fn destination(self) -> LogDestination {
        match self {
            LogArg::Terminal => LogDestination::Terminal,
            LogArg::File => LogDestination::File(PathBuf::from(DEFAULT_LOG_FILE)),
            LogArg::Both => LogDestination::Both(PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }
}
