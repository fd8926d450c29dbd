use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::schedule;
use std::path::{Path, PathBuf};
use storage::{IptcKeywordStore, KeywordStore};
use tagger_core::config;
use tagger_core::config::AppConfig;
use tagger_core::endpoint::Availability;
use tagger_core::pipeline;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(cfg).await,
        Commands::Sweep { root, json } => run_sweep(cfg, root, json).await,
        Commands::Probe { json } => run_probe(cfg, json).await,
        Commands::Show { path, json } => run_show(&path, json),
    }
}

#[derive(Parser)]
#[command(name = "image-tagger")]
#[command(about = "Tags images with keywords from a vision model", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sweep the image tree forever, sleeping between sweeps (default)
    Run,
    /// Run a single sweep and exit
    Sweep {
        /// Override the configured root directory
        #[arg(long)]
        root: Option<PathBuf>,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Probe endpoints in priority order and report their availability
    Probe {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the keyword field of one image
    Show {
        path: PathBuf,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run(cfg: AppConfig) -> Result<()> {
    tokio::select! {
        res = schedule::run_forever(cfg) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}

async fn run_sweep(cfg: AppConfig, root: Option<PathBuf>, json: bool) -> Result<()> {
    let mut orchestrator = pipeline::build_orchestrator(&cfg)?;
    schedule::startup_probe(&orchestrator).await?;
    let root = root.unwrap_or_else(|| PathBuf::from(&cfg.scan.root));
    let summary = orchestrator.sweep(&root).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Discovered {} image(s): {} written, {} unchanged, {} skipped ({} stale, {} tagged, {} manual), {} failed",
            summary.discovered,
            summary.written,
            summary.unchanged,
            summary.skipped(),
            summary.skipped_stale,
            summary.skipped_tagged,
            summary.skipped_manual,
            summary.failed
        );
    }
    Ok(())
}

async fn run_probe(cfg: AppConfig, json: bool) -> Result<()> {
    let pool = pipeline::build_pool(&cfg.inference)?;
    let probed = pool.probe().await;
    let status = pool.status().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        for s in &status {
            let label = match s.availability {
                Availability::Healthy => "healthy",
                Availability::Cooling => "cooling",
                Availability::Unknown => "not probed",
            };
            let marker = if s.active { "*" } else { " " };
            println!("{marker} {:<40} {label}", s.address);
        }
    }
    probed.map(|_| ()).context("no endpoint available")
}

fn run_show(path: &Path, json: bool) -> Result<()> {
    let keywords = IptcKeywordStore::new()
        .read_keywords(path)
        .with_context(|| format!("read keywords of {:?}", path))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&keywords)?);
        return Ok(());
    }
    match keywords {
        Some(list) => {
            for kw in list {
                println!("{kw}");
            }
        }
        None => println!("(no keywords)"),
    }
    Ok(())
}
