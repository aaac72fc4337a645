//! Cardkit CLI: assemble, validate, migrate and render model cards.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Cardkit: model cards from metadata, metrics and annotations
#[derive(Parser, Debug)]
#[command(name = "cardkit", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds `.cardkit/config.toml`)
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build a new card from a metadata snapshot, evaluation results and annotations
    Scaffold {
        /// Model id to look up in the metadata snapshot
        #[arg(long)]
        model_id: String,
        /// Metadata store snapshot (JSON)
        #[arg(long)]
        store: Option<PathBuf>,
        /// Evaluation results (JSON array of metric records)
        #[arg(long)]
        metrics: Option<PathBuf>,
        /// Partial card with hand-written annotations (JSON)
        #[arg(long)]
        annotations: Option<PathBuf>,
        /// Where to write the card document
        #[arg(short, long, default_value = "model_card.json")]
        output: PathBuf,
    },
    /// Validate a card document against the schema it declares
    Validate {
        /// Card document (JSON)
        card: PathBuf,
        /// Also require the card to be complete enough to render
        #[arg(long)]
        complete: bool,
    },
    /// Merge a partial update into a card document
    Merge {
        /// Base card document (JSON)
        base: PathBuf,
        /// Partial update (JSON)
        update: PathBuf,
        /// Where to write the merged card (defaults to overwriting the base)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Migrate a card document to a newer schema version
    Migrate {
        /// Card document (JSON)
        card: PathBuf,
        /// Target version (defaults to the configured target)
        #[arg(long)]
        to: Option<String>,
        /// Where to write the migrated document (defaults to overwriting the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Render a card through a template
    Render {
        /// Card document (JSON)
        card: PathBuf,
        /// Output format: html, md, pbtxt, json
        #[arg(short, long)]
        format: Option<String>,
        /// Registered template name (overrides --format)
        #[arg(short, long)]
        template: Option<String>,
        /// Output file (defaults to the configured output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List known schema versions
    Schemas,
    /// List registered templates
    Templates,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "cardkit", "cardkit")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "cardkit.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &commands::Workspace::new(workspace))
}
