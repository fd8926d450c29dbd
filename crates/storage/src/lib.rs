//! Storage layer: the per-file keyword field and the persisted sweep watermark.
//!
//! Keywords live in the IPTC block of each JPEG; the watermark is a small
//! text file next to the service state.

use std::fs;
use std::path::Path;
use std::time::SystemTime;
use thiserror::Error;

pub mod iptc;
pub mod keywords;
pub mod watermark;

pub use keywords::IptcKeywordStore;
pub use watermark::WatermarkStore;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a JPEG file")]
    NotJpeg,
    #[error("malformed metadata: {0}")]
    Malformed(String),
    #[error("metadata segment of {0} bytes exceeds the JPEG segment limit")]
    SegmentTooLarge(usize),
    #[error("could not replace file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Access and modification times captured before a write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamps {
    pub accessed: SystemTime,
    pub modified: SystemTime,
}

impl FileStamps {
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            accessed: meta.accessed()?,
            modified: meta.modified()?,
        })
    }

    pub fn apply(&self, file: &fs::File) -> std::io::Result<()> {
        file.set_times(
            fs::FileTimes::new()
                .set_accessed(self.accessed)
                .set_modified(self.modified),
        )
    }
}

/// Keyed read/write of the keyword list of a single file.
pub trait KeywordStore: Send + Sync {
    /// `None` when the file carries no keyword field at all.
    fn read_keywords(&self, path: &Path) -> Result<Option<Vec<String>>, MetadataError>;

    /// Replaces the keyword field and leaves `stamps` as the file's times.
    /// Either the whole new list is visible afterwards or the file is untouched.
    fn write_keywords(
        &self,
        path: &Path,
        keywords: &[String],
        stamps: FileStamps,
    ) -> Result<(), MetadataError>;
}
