//! Tree walker / orchestrator: one full pass over the image tree with
//! per-file retry, followed by a watermark commit.

use crate::classifier::Classifier;
use crate::config::TaggingConfig;
use crate::endpoint::EndpointPool;
use crate::error::TaggerError;
use crate::processor::{FileProcessor, Outcome, SkipReason};
use crate::scanner::{self, ScanItem, ScanOptions};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use storage::{KeywordStore, WatermarkStore};
use tokio::sync::mpsc;
use tokio::task;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    /// Linear backoff: the pause after attempt `n` (1-based) is `n` units.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub started_at: DateTime<Utc>,
    pub discovered: usize,
    pub written: usize,
    pub unchanged: usize,
    pub skipped_stale: usize,
    pub skipped_tagged: usize,
    pub skipped_manual: usize,
    pub failed: usize,
    pub walk_errors: usize,
    pub watermark_committed: bool,
}

impl SweepSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            discovered: 0,
            written: 0,
            unchanged: 0,
            skipped_stale: 0,
            skipped_tagged: 0,
            skipped_manual: 0,
            failed: 0,
            walk_errors: 0,
            watermark_committed: false,
        }
    }

    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Written(_) => self.written += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Skipped(SkipReason::StaleFile) => self.skipped_stale += 1,
            Outcome::Skipped(SkipReason::AlreadyTagged) => self.skipped_tagged += 1,
            Outcome::Skipped(SkipReason::ManuallyTagged) => self.skipped_manual += 1,
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped_stale + self.skipped_tagged + self.skipped_manual
    }
}

pub struct Orchestrator {
    pool: Arc<EndpointPool>,
    classifier: Classifier,
    store: Arc<dyn KeywordStore>,
    tagging: TaggingConfig,
    scan: ScanOptions,
    retry: RetryPolicy,
    watermarks: WatermarkStore,
    watermark: Option<DateTime<Utc>>,
}

impl Orchestrator {
    /// Loads the persisted watermark; a missing file means first run.
    pub fn new(
        pool: Arc<EndpointPool>,
        classifier: Classifier,
        store: Arc<dyn KeywordStore>,
        tagging: TaggingConfig,
        scan: ScanOptions,
        retry: RetryPolicy,
        watermarks: WatermarkStore,
    ) -> anyhow::Result<Self> {
        let watermark = watermarks.load()?;
        match watermark {
            Some(at) => info!(watermark = %at, "loaded watermark"),
            None => info!("no watermark yet, full scan"),
        }
        Ok(Self {
            pool,
            classifier,
            store,
            tagging,
            scan,
            retry,
            watermarks,
            watermark,
        })
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    pub async fn sweep(&mut self, root: &Path) -> Result<SweepSummary, TaggerError> {
        let started_at = Utc::now();
        let mut summary = SweepSummary::new(started_at);
        info!(root = %root.display(), watermark = ?self.watermark, "sweep started");

        let (tx, mut rx) = mpsc::channel(100);
        let walk_root = root.to_path_buf();
        let opts = self.scan.clone();
        let walker = task::spawn_blocking(move || {
            for item in scanner::walk(&walk_root, &opts) {
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });

        let mut root_error = None;
        {
            let processor = FileProcessor::new(
                &self.classifier,
                &self.pool,
                self.store.as_ref(),
                &self.tagging,
                self.watermark,
            );
            while let Some(item) = rx.recv().await {
                match item {
                    ScanItem::Image(path) => {
                        summary.discovered += 1;
                        self.process_with_retry(&processor, &path, &mut summary)
                            .await;
                    }
                    ScanItem::Error {
                        path,
                        depth,
                        message,
                    } => {
                        summary.walk_errors += 1;
                        if depth == 0 {
                            root_error = Some(message);
                        } else {
                            warn!(path = ?path, error = %message, "walk error");
                        }
                    }
                }
            }
        }
        walker
            .await
            .map_err(|e| TaggerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        if let Some(message) = root_error {
            error!(root = %root.display(), error = %message, "root unreadable, watermark kept");
            return Err(TaggerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cannot read {}: {message}", root.display()),
            )));
        }

        let next = self
            .watermark
            .map_or(started_at, |prev| prev.max(started_at));
        match self.watermarks.save(next) {
            Ok(()) => summary.watermark_committed = true,
            Err(e) => error!(error = %e, path = ?self.watermarks.path(), "failed to persist watermark"),
        }
        self.watermark = Some(next);

        info!(
            discovered = summary.discovered,
            written = summary.written,
            unchanged = summary.unchanged,
            skipped = summary.skipped(),
            failed = summary.failed,
            "sweep finished"
        );
        Ok(summary)
    }

    async fn process_with_retry(
        &self,
        processor: &FileProcessor<'_>,
        path: &Path,
        summary: &mut SweepSummary,
    ) {
        let max = self.retry.max_attempts;
        for attempt in 1..=max {
            match processor.process(path).await {
                Ok(outcome) => {
                    summary.record(&outcome);
                    return;
                }
                Err(err) => {
                    warn!(path = %path.display(), attempt, max, error = %err, "tagging attempt failed");
                    self.pool.force_recheck().await;
                    if attempt < max {
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                    }
                }
            }
        }
        error!(path = %path.display(), attempts = max, "giving up on file for this sweep");
        summary.failed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_strictly() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_unit: Duration::from_secs(1),
        };
        let delays: Vec<Duration> = (1..policy.max_attempts).map(|a| policy.delay(a)).collect();
        assert_eq!(delays[0], Duration::from_secs(1));
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn summary_counts_by_outcome() {
        let mut s = SweepSummary::new(Utc::now());
        s.record(&Outcome::Written(3));
        s.record(&Outcome::Skipped(SkipReason::AlreadyTagged));
        s.record(&Outcome::Skipped(SkipReason::ManuallyTagged));
        s.record(&Outcome::Skipped(SkipReason::StaleFile));
        s.record(&Outcome::Unchanged);
        assert_eq!(s.written, 1);
        assert_eq!(s.unchanged, 1);
        assert_eq!(s.skipped(), 3);
    }
}
