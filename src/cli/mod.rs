//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "docent",
    version,
    about = "Retrieval-augmented chat over teaching knowledge bases",
    long_about = "Docent chunks and embeds course material into knowledge bases, retrieves and reranks \
                  passages across several knowledge bases for a question, and streams grounded answers \
                  with per-file citations."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/docent/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Profile to apply on top of the config file
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage knowledge bases
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Show how a file would be chunked
    Chunk {
        /// Markdown or text file
        file: PathBuf,

        /// Chunk size limit in bytes (defaults to chunking.max_chunk_bytes)
        #[arg(long)]
        max_bytes: Option<usize>,
    },

    /// Retrieve and rerank passages for a query
    Query {
        /// Search query text
        query: String,

        /// Knowledge base ids to search
        #[arg(long = "kb", required = true, value_name = "ID")]
        knowledge_bases: Vec<String>,

        /// Maximum number of results to return
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Ask a question and stream a grounded answer
    Chat {
        /// Question to ask
        question: String,

        /// Knowledge base ids to ground the answer in
        #[arg(long = "kb", required = true, value_name = "ID")]
        knowledge_bases: Vec<String>,

        /// Use the reasoning model and show its reasoning
        #[arg(long)]
        thinking: bool,

        /// Override the model name
        #[arg(long)]
        model: Option<String>,
    },

    /// Serve the HTTP API
    Serve {
        /// Address to bind (defaults to server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum KbAction {
    /// Create a knowledge base from category directories
    Create {
        /// Knowledge base name (must be unique)
        name: String,

        /// Category directory, as a path or a name under storage.category_dir
        #[arg(long = "category", required = true, value_name = "DIR")]
        categories: Vec<PathBuf>,

        /// Index one chunk per line (tabular sources)
        #[arg(long)]
        structured: bool,
    },

    /// Add files or directories to an existing knowledge base
    Add {
        /// Knowledge base id
        id: String,

        /// Files or directories to add
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Category recorded for the added files
        #[arg(long)]
        category: String,

        /// Index one chunk per line (tabular sources)
        #[arg(long)]
        structured: bool,
    },

    /// List knowledge bases
    List,

    /// Show a knowledge base manifest
    Info {
        /// Knowledge base id
        id: String,
    },

    /// Delete a knowledge base
    Delete {
        /// Knowledge base id
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
