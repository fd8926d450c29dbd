//! File-backed keyword store: IPTC keywords embedded in JPEG files.

use crate::{iptc, FileStamps, KeywordStore, MetadataError};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct IptcKeywordStore;

impl IptcKeywordStore {
    pub fn new() -> Self {
        Self
    }
}

impl KeywordStore for IptcKeywordStore {
    fn read_keywords(&self, path: &Path) -> Result<Option<Vec<String>>, MetadataError> {
        let data = fs::read(path)?;
        iptc::read_keywords(&data)
    }

    fn write_keywords(
        &self,
        path: &Path,
        keywords: &[String],
        stamps: FileStamps,
    ) -> Result<(), MetadataError> {
        let original = fs::read(path)?;
        let updated = iptc::write_keywords(&original, keywords)?;
        replace_file(path, &updated, stamps)
    }
}

/// Writes `contents` next to the file `path` resolves to and renames it over
/// that file once permissions and timestamps are in place. Symlinks stay
/// links; the rename lands on their target.
fn replace_file(path: &Path, contents: &[u8], stamps: FileStamps) -> Result<(), MetadataError> {
    let target = fs::canonicalize(path)?;
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let meta = fs::metadata(&target)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tagger-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    fs::set_permissions(tmp.path(), meta.permissions())?;
    copy_owner(&meta, tmp.path());
    stamps.apply(tmp.as_file())?;

    tmp.persist(&target)?;
    Ok(())
}

#[cfg(unix)]
fn copy_owner(meta: &fs::Metadata, target: &Path) {
    use std::os::unix::fs::MetadataExt;
    if let Err(e) = std::os::unix::fs::chown(target, Some(meta.uid()), Some(meta.gid())) {
        debug!(path = %target.display(), error = %e, "could not carry over file owner");
    }
}

#[cfg(not(unix))]
fn copy_owner(_meta: &fs::Metadata, _target: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn tiny_jpeg() -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x04, 0x00, 0x00]);
        out.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x03, 0x00, 0xAB, 0xCD]);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    #[test]
    fn write_keeps_timestamps_and_content_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        fs::write(&path, tiny_jpeg()).unwrap();

        let stamps = FileStamps {
            accessed: SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000),
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000),
        };
        let store = IptcKeywordStore::new();
        let kws = vec!["Hund".to_string(), "LLM-Generated".to_string()];
        store.write_keywords(&path, &kws, stamps).unwrap();

        assert_eq!(store.read_keywords(&path).unwrap(), Some(kws));
        let after = FileStamps::of(&path).unwrap();
        assert_eq!(after.modified, stamps.modified);
        let data = fs::read(&path).unwrap();
        assert!(data.ends_with(&[0xAB, 0xCD, 0xFF, 0xD9]));

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_write_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        fs::write(&path, b"not really a jpeg").unwrap();
        let stamps = FileStamps::of(&path).unwrap();

        let err = IptcKeywordStore::new()
            .write_keywords(&path, &["X".to_string()], stamps)
            .unwrap_err();
        assert!(matches!(err, MetadataError::NotJpeg));
        assert_eq!(fs::read(&path).unwrap(), b"not really a jpeg");
    }

    #[cfg(unix)]
    #[test]
    fn write_through_symlink_updates_target() {
        let dir = tempfile::tempdir().unwrap();
        let albums = dir.path().join("albums");
        fs::create_dir(&albums).unwrap();
        let real = dir.path().join("real.jpg");
        let link = albums.join("link.jpg");
        fs::write(&real, tiny_jpeg()).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let store = IptcKeywordStore::new();
        let stamps = FileStamps::of(&link).unwrap();
        let kws = vec!["X".to_string()];
        store.write_keywords(&link, &kws, stamps).unwrap();

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), real);
        assert_eq!(store.read_keywords(&real).unwrap(), Some(kws));
        assert_eq!(fs::read_dir(&albums).unwrap().count(), 1);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = IptcKeywordStore::new()
            .read_keywords(&dir.path().join("gone.jpg"))
            .unwrap_err();
        assert!(matches!(err, MetadataError::Io(_)));
    }
}
