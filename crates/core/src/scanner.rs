//! Walks the image tree depth-first: the files of a directory come before
//! any of its subdirectories.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::cmp::Ordering;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Directory names (e.g. NAS thumbnail caches) never entered.
    pub reserved_dirs: Vec<String>,
    pub excludes: GlobSet,
    pub follow_links: bool,
}

impl ScanOptions {
    pub fn new(
        reserved_dirs: &[String],
        excludes: &[String],
        follow_links: bool,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            reserved_dirs: reserved_dirs.to_vec(),
            excludes: build_globset(excludes)?,
            follow_links,
        })
    }
}

/// Walk outcome for a single entry.
#[derive(Debug)]
pub enum ScanItem {
    Image(PathBuf),
    Error {
        path: Option<PathBuf>,
        /// 0 means the root itself could not be read.
        depth: usize,
        message: String,
    },
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// True when any component of `path` is a reserved directory name.
pub fn in_reserved_dir(path: &Path, reserved: &[String]) -> bool {
    path.components()
        .any(|c| reserved.iter().any(|r| c.as_os_str() == OsStr::new(r)))
}

fn should_descend(entry: &DirEntry, opts: &ScanOptions) -> bool {
    let name = entry.file_name();
    if opts.reserved_dirs.iter().any(|r| name == OsStr::new(r)) {
        return false;
    }
    !opts.excludes.is_match(entry.path())
}

fn files_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// Lazily enumerates image files under `root`. Symlink cycles surface as
/// errors instead of looping.
pub fn walk(root: &Path, opts: &ScanOptions) -> impl Iterator<Item = ScanItem> {
    let root_reserved = in_reserved_dir(root, &opts.reserved_dirs);
    let filter_opts = opts.clone();
    WalkDir::new(root)
        .follow_links(opts.follow_links)
        .sort_by(files_first)
        .into_iter()
        .filter_entry(move |e| e.depth() == 0 || should_descend(e, &filter_opts))
        .filter_map(move |entry| match entry {
            Ok(e) => {
                let path = e.path();
                if root_reserved || e.file_type().is_dir() || !is_image(path) {
                    None
                } else {
                    Some(ScanItem::Image(e.into_path()))
                }
            }
            Err(err) => Some(ScanItem::Error {
                path: err.path().map(Path::to_path_buf),
                depth: err.depth(),
                message: err.to_string(),
            }),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn opts() -> ScanOptions {
        ScanOptions::new(&["@eaDir".to_string()], &[], true).unwrap()
    }

    fn images(root: &Path, opts: &ScanOptions) -> Vec<String> {
        walk(root, opts)
            .filter_map(|item| match item {
                ScanItem::Image(p) => Some(
                    p.strip_prefix(root)
                        .unwrap()
                        .to_string_lossy()
                        .replace('\\', "/"),
                ),
                ScanItem::Error { .. } => None,
            })
            .collect()
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_image(Path::new("a.jpg")));
        assert!(is_image(Path::new("b.JPEG")));
        assert!(is_image(Path::new("c.JpG")));
        assert!(!is_image(Path::new("d.png")));
        assert!(!is_image(Path::new("jpg")));
    }

    #[test]
    fn files_precede_subdirectories_depth_first() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/inner")).unwrap();
        fs::create_dir_all(root.join("b")).unwrap();
        for f in ["z.jpg", "a/x.jpeg", "a/inner/y.JPG", "b/w.jpg", "notes.txt"] {
            fs::write(root.join(f), b"x").unwrap();
        }
        assert_eq!(
            images(root, &opts()),
            vec!["z.jpg", "a/x.jpeg", "a/inner/y.JPG", "b/w.jpg"]
        );
    }

    #[test]
    fn reserved_directories_are_skipped_at_any_depth() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("@eaDir/photo.jpg")).unwrap();
        fs::create_dir_all(root.join("album/@eaDir/deeper")).unwrap();
        fs::write(root.join("@eaDir/photo.jpg/SYNOPHOTO_THUMB_XL.jpg"), b"x").unwrap();
        fs::write(root.join("album/@eaDir/deeper/thumb.jpg"), b"x").unwrap();
        fs::write(root.join("album/keep.jpg"), b"x").unwrap();
        assert_eq!(images(root, &opts()), vec!["album/keep.jpg"]);

        // a root that itself sits under a reserved directory yields nothing
        assert!(images(&root.join("album/@eaDir"), &opts()).is_empty());
    }

    #[test]
    fn exclude_globs_prune_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("private")).unwrap();
        fs::write(root.join("private/p.jpg"), b"x").unwrap();
        fs::write(root.join("public.jpg"), b"x").unwrap();
        let opts = ScanOptions::new(&[], &["**/private".to_string()], true).unwrap();
        assert_eq!(images(root, &opts), vec!["public.jpg"]);
    }

    #[test]
    fn missing_root_reports_depth_zero_error() {
        let dir = tempfile::tempdir().unwrap();
        let items: Vec<ScanItem> = walk(&dir.path().join("unmounted"), &opts()).collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], ScanItem::Error { depth: 0, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_do_not_loop() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("a/one.jpg"), b"x").unwrap();
        std::os::unix::fs::symlink(root, root.join("a/back")).unwrap();
        let items: Vec<ScanItem> = walk(root, &opts()).collect();
        let found = items
            .iter()
            .filter(|i| matches!(i, ScanItem::Image(_)))
            .count();
        assert_eq!(found, 1);
        assert!(items.iter().any(|i| matches!(i, ScanItem::Error { .. })));
    }
}
