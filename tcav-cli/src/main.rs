//! tcav - run Testing with Concept Activation Vectors from the terminal.
//!
//! Works on a bundle of precomputed model outputs, so any model that can dump
//! its embeddings and gradients to JSON can be explained.

mod bundle;
mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Test how much a concept influences a model's predictions
#[derive(Parser, Debug)]
#[command(name = "tcav", version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run TCAV over a bundle of precomputed model outputs
    Run(RunArgs),
    /// Manage run settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// JSON bundle with output_spec, examples and outputs
    bundle: PathBuf,

    /// Settings file (defaults to ./tcav.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Concept example id (repeatable)
    #[arg(long = "concept")]
    concepts: Vec<String>,

    /// Gradient class to explain; parsed as JSON, else taken as a string
    #[arg(long = "class")]
    class_to_explain: Option<String>,

    /// Gradient output field to explain
    #[arg(long)]
    grad_layer: Option<String>,

    /// Number of comparison splits
    #[arg(long = "splits")]
    num_splits: Option<usize>,

    /// Seed for probe partitioning and training
    #[arg(long = "seed", conflicts_with = "unseeded")]
    random_state: Option<u64>,

    /// Seed probes from entropy instead of the configured seed
    #[arg(long)]
    unseeded: bool,

    /// Seed for drawing comparison splits
    #[arg(long)]
    split_seed: Option<u64>,

    /// Run trials on the blocking thread pool
    #[arg(long)]
    parallel: bool,

    /// Write the result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write default settings to ./tcav.toml
    Init,
    /// Show the effective settings
    Show {
        /// Settings file (defaults to ./tcav.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable stderr, plus JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "tcav", "tcav")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tcav.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    commands::handle_command(cli.command, &workspace).await
}
