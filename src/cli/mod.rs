//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "trawl",
    version,
    about = "Forensic semantic search over seized message and image dumps",
    long_about = "Trawl indexes tabular evidence exports (SMS/email dumps, captioned image \
                  corpora) into a persistent vector store and answers natural-language queries \
                  with ranked records and their conversational context."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/trawl/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index a normalized record file (JSONL or JSON array) or a directory of them
    Index {
        /// Record file or directory to ingest
        input: PathBuf,

        /// Batch tag appended to collection names (e.g. "case1")
        #[arg(short, long)]
        tag: Option<String>,

        /// Drop target collections before ingesting
        #[arg(long)]
        reset: bool,

        /// Treat the input as image records (captions are indexed)
        #[arg(long)]
        images: bool,
    },

    /// Semantic search in one or more collections
    Search {
        /// Natural-language query text
        query: String,

        /// Collection(s) to search; repeat for multi-collection search
        #[arg(short = 'C', long = "collection", required = true)]
        collections: Vec<String>,

        /// Maximum number of results
        #[arg(short, long)]
        k: Option<usize>,

        /// Retrieval mode: ANN or KNN (defaults to configuration)
        #[arg(short, long)]
        mode: Option<String>,

        /// Exclude records flagged as noise
        #[arg(long)]
        exclude_noise: bool,

        /// Earliest timestamp (ISO-8601 or epoch seconds)
        #[arg(long)]
        start: Option<String>,

        /// Latest timestamp (ISO-8601 or epoch seconds)
        #[arg(long)]
        end: Option<String>,

        /// Restrict by direction: incoming or outgoing
        #[arg(short, long)]
        direction: Option<String>,

        /// Restrict to one contact
        #[arg(long)]
        contact: Option<String>,

        /// Restrict by source application
        #[arg(long)]
        app: Option<String>,

        /// Restrict by record type: message, chunk, or image
        #[arg(long = "type")]
        record_type: Option<String>,

        /// Center latitude for geographic filtering
        #[arg(long)]
        lat: Option<f64>,

        /// Center longitude for geographic filtering
        #[arg(long)]
        lon: Option<f64>,

        /// Radius in kilometers around (lat, lon)
        #[arg(long)]
        radius_km: Option<f64>,

        /// Drop results with distance above this ceiling
        #[arg(long)]
        max_distance: Option<f32>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a message in its conversational context
    Context {
        /// Collection holding the message
        collection: String,

        /// Target message id
        message_id: String,

        /// Messages to show before the target
        #[arg(short, long, default_value = "5")]
        before: usize,

        /// Messages to show after the target
        #[arg(short, long, default_value = "5")]
        after: usize,

        /// Print the window as JSON
        #[arg(long)]
        json: bool,
    },

    /// Browse conversations in a messages collection
    Conversations {
        #[command(subcommand)]
        action: ConversationsAction,
    },

    /// Manage collections
    Collections {
        #[command(subcommand)]
        action: CollectionsAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConversationsAction {
    /// List conversations grouped by contact, most recent first
    List {
        /// Messages collection to inspect
        collection: String,
    },

    /// Show one conversation in chronological order
    Show {
        collection: String,

        /// Contact identifier
        contact: String,
    },

    /// Keyword search within one conversation (plain substring match)
    Grep {
        collection: String,
        contact: String,

        /// Term to look for, case-insensitive
        term: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum CollectionsAction {
    /// List collections with their sizes
    List,

    /// Count rows in a collection
    Count { name: String },

    /// Delete a collection and all of its data
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
