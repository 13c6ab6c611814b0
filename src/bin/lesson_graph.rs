//! Lesson Graph CLI
//!
//! Builds snapshots from a `BuildInput` JSON file and prints JSON results:
//! - `build`: the committed snapshot and its conflicts
//! - `diff`: the snapshot diffed against a second input file
//! - `bundle`: visible edges for a zoom band
//! - `route`: the highlighted path for a goal
//! - `worker`: line-delimited job messages on stdin, replies on stdout
//!
//! ## Configuration
//!
//! Environment variables:
//! - `RUST_LOG`: Log level filter (default: lesson_graph=info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: json)
//! - `LESSON_GRAPH_*`: engine settings, see `EngineConfig::from_env`
//!
//! ## Usage
//!
//! ```bash
//! lesson_graph build records.json --lens performance
//! lesson_graph route records.json "xauusd breakout entries"
//! ```

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lesson_graph_kernel::orchestrator::handle_message;
use lesson_graph_kernel::{
    BuildInput, BuildOrchestrator, ConflictResolution, EngineConfig, Filters, InMemoryKeyValueStore,
    Lens, RecordSet, ZoomBand,
};

#[derive(Parser)]
#[command(name = "lesson_graph", version, about = "Deterministic lesson graph builder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a snapshot and print it
    Build {
        #[command(flatten)]
        source: Source,
    },
    /// Diff the snapshot of INPUT against the snapshot of COMPARE
    Diff {
        #[command(flatten)]
        source: Source,
        /// Input file for the compare side
        compare: PathBuf,
    },
    /// Print the visible edges for a zoom band
    Bundle {
        #[command(flatten)]
        source: Source,
        /// Zoom band: far, mid or near
        #[arg(long, default_value = "far")]
        zoom: String,
    },
    /// Route a goal through the snapshot
    Route {
        #[command(flatten)]
        source: Source,
        /// Goal text
        goal: String,
    },
    /// Answer job messages from stdin, one per line
    Worker,
}

#[derive(clap::Args)]
struct Source {
    /// BuildInput JSON file
    input: PathBuf,
    /// Override the lens of the input filters
    #[arg(long)]
    lens: Option<String>,
    /// JSON file with an array of conflict policies to apply
    #[arg(long)]
    policies: Option<PathBuf>,
}

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "lesson_graph=info".into());

    if log_format == "pretty" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let value = serde_json::from_str(&raw)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;
    Ok(value)
}

fn split_input(input: BuildInput) -> (RecordSet, Filters) {
    let records = RecordSet {
        cases: input.cases,
        lessons: input.lessons,
        symbol_learnings: input.symbol_learnings,
    };
    (records, input.filters)
}

async fn open(
    source: &Source,
) -> Result<BuildOrchestrator<InMemoryKeyValueStore>, Box<dyn std::error::Error>> {
    let input: BuildInput = read_json(&source.input)?;
    let (records, mut filters) = split_input(input);
    if let Some(lens) = &source.lens {
        filters.lens = Lens::from_str(lens).ok_or_else(|| format!("Unknown lens: {lens}"))?;
    }

    let orchestrator = BuildOrchestrator::new(EngineConfig::from_env(), Arc::new(InMemoryKeyValueStore::new()));
    orchestrator.set_filters(filters).await;
    let snapshot = orchestrator.set_records(records).await;

    if let Some(path) = &source.policies {
        let policies: Vec<ConflictResolution> = read_json(path)?;
        for policy in policies {
            orchestrator.resolve_conflict(policy).await;
        }
    }

    info!(
        scope_key = %snapshot.scope_key,
        nodes = snapshot.stats.node_count,
        edges = snapshot.stats.edge_count,
        skipped = snapshot.stats.skipped_records,
        fallbacks = orchestrator.fallback_count(),
        "Snapshot ready"
    );
    Ok(orchestrator)
}

fn print(value: &serde_json::Value) -> Result<(), Box<dyn std::error::Error>> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn run_worker() -> Result<(), Box<dyn std::error::Error>> {
    let stdin = std::io::stdin();
    let mut out = std::io::stdout().lock();
    let mut handled = 0u64;
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        writeln!(out, "{}", handle_message(&line))?;
        out.flush()?;
        handled += 1;
    }
    info!(handled, "Worker input closed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();
    let generated_at = chrono::Utc::now().to_rfc3339();

    match cli.command {
        Commands::Build { source } => {
            let orchestrator = open(&source).await?;
            print(&json!({
                "generatedAt": generated_at,
                "snapshot": orchestrator.snapshot().as_deref(),
                "conflicts": orchestrator.conflicts(),
            }))?;
        }
        Commands::Diff { source, compare } => {
            let orchestrator = open(&source).await?;
            let compare_input: BuildInput = read_json(&compare)?;
            let other = BuildOrchestrator::new(
                EngineConfig::from_env().without_worker(),
                Arc::new(InMemoryKeyValueStore::new()),
            );
            let (records, filters) = split_input(compare_input);
            other.set_filters(filters).await;
            let compare_snapshot = other.set_records(records).await;
            print(&json!({
                "generatedAt": generated_at,
                "diff": orchestrator.diff_against(&compare_snapshot).await,
            }))?;
        }
        Commands::Bundle { source, zoom } => {
            let band = ZoomBand::from_str(&zoom).ok_or_else(|| format!("Unknown zoom band: {zoom}"))?;
            let orchestrator = open(&source).await?;
            print(&json!({
                "generatedAt": generated_at,
                "bundle": orchestrator.bundle(band).await,
            }))?;
        }
        Commands::Route { source, goal } => {
            let orchestrator = open(&source).await?;
            print(&json!({
                "generatedAt": generated_at,
                "route": orchestrator.route(&goal),
            }))?;
        }
        Commands::Worker => run_worker()?,
    }

    Ok(())
}
