//! Scheduler loop: sweep the whole tree, sleep, repeat.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tagger_core::config::AppConfig;
use tagger_core::pipeline;
use tagger_core::sweep::Orchestrator;
use tracing::{error, info};

/// Forced initial probe. A pool that cannot validate any endpoint at
/// startup is fatal rather than a silent retry loop.
pub async fn startup_probe(orchestrator: &Orchestrator) -> Result<()> {
    let selection = orchestrator
        .pool()
        .probe()
        .await
        .context("no inference endpoint could be validated at startup")?;
    info!(endpoint = %selection.provider.address(), "inference endpoint ready");
    Ok(())
}

/// Runs sweeps back to back with `interval` between them. `max_sweeps`
/// bounds the loop; `None` runs until the process is killed.
pub async fn run_loop(
    orchestrator: &mut Orchestrator,
    root: &Path,
    interval: Duration,
    max_sweeps: Option<usize>,
) -> usize {
    let mut completed = 0;
    loop {
        match orchestrator.sweep(root).await {
            Ok(summary) => info!(
                written = summary.written,
                skipped = summary.skipped(),
                failed = summary.failed,
                "sweep complete"
            ),
            Err(e) => error!(error = %e, "sweep aborted"),
        }
        completed += 1;
        if max_sweeps.is_some_and(|max| completed >= max) {
            return completed;
        }
        info!(seconds = interval.as_secs_f64(), "sleeping");
        tokio::time::sleep(interval).await;
    }
}

pub async fn run_forever(cfg: AppConfig) -> Result<()> {
    let mut orchestrator = pipeline::build_orchestrator(&cfg)?;
    startup_probe(&orchestrator).await?;
    let root = PathBuf::from(&cfg.scan.root);
    run_loop(&mut orchestrator, &root, cfg.scan.interval(), None).await;
    Ok(())
}
