//! Command line argument parsing for the kvgram CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// kvgram - n-gram full-text search on an ordered key-value store
#[derive(Parser, Debug, Clone)]
#[command(name = "kvgram")]
#[command(about = "N-gram full-text search on an ordered key-value store")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct KvgramArgs {
    /// Verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Snapshot file of the store; created on first write
    #[arg(long, env = "KVGRAM_DB", value_name = "FILE")]
    pub db: PathBuf,

    /// Index configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl KvgramArgs {
    /// Effective verbosity: 0 when quiet, otherwise 1 plus the number of
    /// `-v` flags.
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose.saturating_add(1)
        }
    }

    /// Default log filter for the effective verbosity.
    pub fn log_level(&self) -> &'static str {
        match self.verbosity() {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Index one document, replacing its previous generation
    Index(IndexArgs),

    /// Index documents from a JSONL file
    Import(ImportArgs),

    /// Remove a document from a context
    Clear(ClearArgs),

    /// Search a context
    Search(SearchArgs),

    /// Remove a namespace and every context in it
    #[command(name = "drop-namespace")]
    DropNamespace(DropNamespaceArgs),
}

impl Command {
    /// Whether the command writes to the store.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Command::Search(_))
    }
}

/// Arguments for indexing one document
#[derive(Parser, Debug, Clone)]
pub struct IndexArgs {
    #[arg(value_name = "NAMESPACE")]
    pub namespace: String,

    #[arg(value_name = "CONTEXT")]
    pub context: String,

    /// Generation number; higher is newer
    #[arg(value_name = "ORDER", allow_negative_numbers = true)]
    pub order: i64,

    #[arg(value_name = "ID")]
    pub id: String,

    #[arg(value_name = "TEXT")]
    pub text: String,
}

/// Arguments for bulk import
#[derive(Parser, Debug, Clone)]
pub struct ImportArgs {
    #[arg(value_name = "NAMESPACE")]
    pub namespace: String,

    #[arg(value_name = "CONTEXT")]
    pub context: String,

    /// JSONL file with one `{"id", "order", "text"}` object per line
    #[arg(value_name = "JSONL")]
    pub file: PathBuf,
}

/// Arguments for clearing a document
#[derive(Parser, Debug, Clone)]
pub struct ClearArgs {
    #[arg(value_name = "NAMESPACE")]
    pub namespace: String,

    #[arg(value_name = "CONTEXT")]
    pub context: String,

    #[arg(value_name = "ID")]
    pub id: String,
}

/// Arguments for searching
#[derive(Parser, Debug, Clone)]
pub struct SearchArgs {
    #[arg(value_name = "NAMESPACE")]
    pub namespace: String,

    #[arg(value_name = "CONTEXT")]
    pub context: String,

    /// Substring to look for
    #[arg(value_name = "TERM")]
    pub term: String,
}

/// Arguments for dropping a namespace
#[derive(Parser, Debug, Clone)]
pub struct DropNamespaceArgs {
    #[arg(value_name = "NAMESPACE")]
    pub namespace: String,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
