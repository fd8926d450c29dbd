//! Persisted sweep watermark: one timestamp in a plain-text file.

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct WatermarkStore {
    path: PathBuf,
}

impl WatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` on first run, when no watermark was ever committed.
    pub fn load(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read watermark {:?}", self.path));
            }
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        parse(raw)
            .map(Some)
            .with_context(|| format!("parse watermark {:?} from {:?}", raw, self.path))
    }

    pub fn save(&self, at: DateTime<Utc>) -> anyhow::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).with_context(|| format!("create state dir {:?}", dir))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        writeln!(tmp, "{}", at.to_rfc3339_opts(SecondsFormat::Nanos, true))?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("write watermark {:?}", self.path))?;
        Ok(())
    }
}

fn parse(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let secs: f64 = raw.parse().context("neither RFC 3339 nor unix seconds")?;
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos).context("unix timestamp out of range")
}
