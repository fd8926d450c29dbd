//! Per-file skip rules, classification and metadata write-back.

use crate::classifier::Classifier;
use crate::config::TaggingConfig;
use crate::endpoint::EndpointPool;
use crate::error::TaggerError;
use crate::merge::{merge, MergeOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use storage::{FileStamps, KeywordStore};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    StaleFile,
    AlreadyTagged,
    ManuallyTagged,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::StaleFile => "older than watermark",
            SkipReason::AlreadyTagged => "already tagged",
            SkipReason::ManuallyTagged => "manually tagged",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Written(usize),
    Skipped(SkipReason),
    /// The backend answered with no keywords; nothing was written.
    Unchanged,
}

/// Snapshot of one file taken at visit time.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub stamps: FileStamps,
    pub existing: Option<BTreeSet<String>>,
    pub fixed_tag_present: bool,
}

impl ImageRecord {
    pub fn inspect(
        path: &Path,
        stamps: FileStamps,
        store: &dyn KeywordStore,
        fixed_keyword: &str,
    ) -> Result<Self, TaggerError> {
        let existing: Option<BTreeSet<String>> = store
            .read_keywords(path)?
            .map(|kws| kws.into_iter().collect());
        let fixed_tag_present = existing
            .as_ref()
            .is_some_and(|set| set.contains(fixed_keyword));
        Ok(Self {
            path: path.to_path_buf(),
            stamps,
            existing,
            fixed_tag_present,
        })
    }

    fn has_manual_tags(&self) -> bool {
        self.existing.as_ref().is_some_and(|set| !set.is_empty())
    }
}

pub struct FileProcessor<'a> {
    classifier: &'a Classifier,
    pool: &'a EndpointPool,
    store: &'a dyn KeywordStore,
    tagging: &'a TaggingConfig,
    watermark: Option<DateTime<Utc>>,
}

impl<'a> FileProcessor<'a> {
    pub fn new(
        classifier: &'a Classifier,
        pool: &'a EndpointPool,
        store: &'a dyn KeywordStore,
        tagging: &'a TaggingConfig,
        watermark: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            classifier,
            pool,
            store,
            tagging,
            watermark,
        }
    }

    pub async fn process(&self, path: &Path) -> Result<Outcome, TaggerError> {
        let stamps = FileStamps::of(path)?;
        if let Some(watermark) = self.watermark {
            if DateTime::<Utc>::from(stamps.modified) < watermark {
                debug!(path = %path.display(), "skipping, older than watermark");
                return Ok(Outcome::Skipped(SkipReason::StaleFile));
            }
        }

        let record = ImageRecord::inspect(path, stamps, self.store, &self.tagging.fixed_keyword)?;
        if let Some(reason) = self.skip_reason(&record) {
            info!(path = %path.display(), reason = %reason, "skipping");
            return Ok(Outcome::Skipped(reason));
        }

        info!(path = %path.display(), "classifying");
        let selection = self.pool.current().await?;
        if selection.degraded {
            warn!(endpoint = %selection.provider.address(), "using degraded endpoint");
        }
        let fresh = self
            .classifier
            .classify_file(path.to_path_buf(), selection.provider.as_ref())
            .await?;
        info!(path = %path.display(), keywords = ?fresh, "keywords received");

        match merge(
            &fresh,
            record.existing.as_ref(),
            self.tagging.keep_existing,
            &self.tagging.fixed_keyword,
        ) {
            MergeOutcome::NoOp => {
                warn!(path = %path.display(), "empty keyword result, leaving metadata untouched");
                Ok(Outcome::Unchanged)
            }
            MergeOutcome::Write(merged) => {
                let keywords: Vec<String> = merged.into_iter().collect();
                self.store.write_keywords(path, &keywords, record.stamps)?;
                info!(path = %path.display(), count = keywords.len(), "keywords written");
                Ok(Outcome::Written(keywords.len()))
            }
        }
    }

    /// Skip rules after the watermark check, in order.
    fn skip_reason(&self, record: &ImageRecord) -> Option<SkipReason> {
        if record.fixed_tag_present {
            return Some(SkipReason::AlreadyTagged);
        }
        if self.tagging.skip_manually_tagged && record.has_manual_tags() {
            return Some(SkipReason::ManuallyTagged);
        }
        None
    }
}
