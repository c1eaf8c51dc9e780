use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "faqbert",
    about = "Build and query FAQ answering pipelines with sentence embeddings"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the sentence-transformers model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build a pipeline from a FAQ dataset
    Build(BuildArgs),
    /// Answer a single question with a pipeline
    Query(QueryArgs),
    /// Ask questions interactively, with session statistics
    Chat(ChatArgs),
    /// Manage built pipelines
    Pipeline {
        #[command(subcommand)]
        action: PipelineAction,
    },
    /// Inspect available datasets
    Dataset {
        #[command(subcommand)]
        action: DatasetAction,
    },
    /// Manage sentence encoder models
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Manage persistent settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show system status and statistics
    Status(StatusArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Build --

#[derive(Debug, Parser)]
pub struct BuildArgs {
    /// Dataset file path, or a name under the data directory
    pub dataset: String,

    /// Name of the pipeline to create (replaces an existing one)
    #[arg(long)]
    pub name: String,

    /// Answer selection strategy: last, cycle, random or most_similar
    #[arg(short, long)]
    pub strategy: Option<String>,

    /// Number of questions encoded per batch
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Seed for the random strategy
    #[arg(long)]
    pub seed: Option<u64>,
}

// -- Query --

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// Pipeline name or directory
    pub pipeline: String,

    /// The question to answer
    pub question: String,

    /// Similarity a match must exceed
    #[arg(short, long)]
    pub threshold: Option<f32>,

    /// Output the result as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Chat --

#[derive(Debug, Parser)]
pub struct ChatArgs {
    /// Pipeline name or directory
    pub pipeline: String,

    /// Similarity a match must exceed
    #[arg(short, long)]
    pub threshold: Option<f32>,
}

// -- Pipeline --

#[derive(Debug, Subcommand)]
pub enum PipelineAction {
    /// List built pipelines
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove one or more pipelines
    Remove {
        /// Pipeline names
        #[arg(required = true)]
        names: Vec<String>,
    },
}

// -- Dataset --

#[derive(Debug, Subcommand)]
pub enum DatasetAction {
    /// List dataset files in the data directory
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

// -- Model --

#[derive(Debug, Subcommand)]
pub enum ModelAction {
    /// Show the currently resolved model
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a default model ID or local path in config.redb
    Set {
        /// Model ID (HuggingFace) or local path
        model: String,
    },
    /// Clear the stored model setting (revert to default)
    Clear,
    /// List models downloaded to the local hub
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Download a model into the local hub
    Download {
        /// Model ID; bare names are looked up under sentence-transformers/
        model: String,
        /// Local name to store the model under
        #[arg(long)]
        save_as: Option<String>,
    },
    /// Remove a model from the local hub
    Remove {
        /// Local model name
        name: String,
    },
    /// Delete the HuggingFace download cache
    ClearCache,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show stored settings
    Show,
    /// Store a setting
    Set {
        /// One of model_name, threshold, chunk_size, answer_strategy
        key: String,
        value: String,
    },
    /// Remove a stored setting
    Unset { key: String },
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "faqbert",
            &mut std::io::stdout(),
        );
    }
}
