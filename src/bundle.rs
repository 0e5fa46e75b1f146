//! Application bundle traversal

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::errors::{AppError, AppResult};

/// One entry of an installed bundle, addressed relative to the directory that
/// holds the `.app` (so every path starts with `Name.app`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleEntry {
    Directory {
        rel: PathBuf,
    },
    File {
        rel: PathBuf,
        /// Absolute location on disk
        path: PathBuf,
        size: u64,
        modified: Option<SystemTime>,
    },
}

impl BundleEntry {
    pub fn rel(&self) -> &Path {
        match self {
            BundleEntry::Directory { rel } | BundleEntry::File { rel, .. } => rel,
        }
    }
}

/// Sum of the sizes of all files in `entries`
pub fn total_size(entries: &[BundleEntry]) -> u64 {
    entries
        .iter()
        .map(|entry| match entry {
            BundleEntry::File { size, .. } => *size,
            BundleEntry::Directory { .. } => 0,
        })
        .sum()
}

/// Walk an installed bundle depth-first. Directories come before their
/// contents and siblings are sorted by name. Directories named in `skip_dirs`
/// are left out together with everything below them.
pub fn walk(app: &Path, skip_dirs: &[String]) -> AppResult<Vec<BundleEntry>> {
    if !app.is_dir() {
        return Err(AppError::Bundle(format!(
            "{} is not a directory",
            app.display()
        )));
    }
    let name = app
        .file_name()
        .ok_or_else(|| AppError::Bundle(format!("{} has no name", app.display())))?;

    let mut entries = Vec::new();
    walk_dir(app, &PathBuf::from(name), skip_dirs, &mut entries)?;
    debug!("{} entries in {}", entries.len(), app.display());
    Ok(entries)
}

fn walk_dir(
    dir: &Path,
    rel: &Path,
    skip_dirs: &[String],
    entries: &mut Vec<BundleEntry>,
) -> AppResult<()> {
    entries.push(BundleEntry::Directory {
        rel: rel.to_path_buf(),
    });

    let mut children = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let path = child.path();
        let name = child.file_name();
        let child_rel = rel.join(&name);
        let meta = fs::symlink_metadata(&path)?;

        if meta.is_symlink() {
            // Follow links to files; linked directories could loop
            match fs::metadata(&path) {
                Ok(target) if target.is_file() => push_file(entries, child_rel, path, &target),
                _ => debug!("Skipping link {}", child_rel.display()),
            }
        } else if meta.is_dir() {
            if skip_dirs.iter().any(|s| name.as_os_str() == s.as_str()) {
                debug!("Skipping {}", child_rel.display());
                continue;
            }
            walk_dir(&path, &child_rel, skip_dirs, entries)?;
        } else if meta.is_file() {
            push_file(entries, child_rel, path, &meta);
        }
    }
    Ok(())
}

fn push_file(entries: &mut Vec<BundleEntry>, rel: PathBuf, path: PathBuf, meta: &fs::Metadata) {
    trace!("{} ({} bytes)", rel.display(), meta.len());
    entries.push(BundleEntry::File {
        rel,
        path,
        size: meta.len(),
        modified: meta.modified().ok(),
    });
}
