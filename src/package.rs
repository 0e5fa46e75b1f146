//! IPA packaging

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::errors::AppResult;

/// Zip `payload` (a `Payload` directory) into `ipa`, keeping the directory
/// itself as the archive's top-level entry
pub fn package(payload: &Path, ipa: &Path) -> AppResult<u64> {
    let file = File::create(ipa)?;
    let mut zip = ZipWriter::new(file);
    let options = |mode: u32| {
        SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(mode)
    };

    let top = payload
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Payload".to_string());
    zip.add_directory(format!("{top}/"), options(0o755))?;

    let mut files = Vec::new();
    collect(payload, &mut files)?;
    for path in &files {
        let rel = path.strip_prefix(payload).unwrap_or(path);
        let name = archive_name(&top, rel);
        let meta = fs::metadata(path)?;
        let mode = mode_of(&meta);
        if meta.is_dir() {
            debug!("dir  {}", name);
            zip.add_directory(format!("{name}/"), options(mode))?;
        } else {
            debug!("file {}", name);
            zip.start_file(name, options(mode).large_file(meta.len() >= u32::MAX as u64))?;
            io::copy(&mut File::open(path)?, &mut zip)?;
        }
    }
    zip.finish()?;

    let size = fs::metadata(ipa)?.len();
    info!("Packaged {} entries into {} ({} bytes)", files.len(), ipa.display(), size);
    Ok(size)
}

/// Every entry below `dir`, parents before children, siblings sorted
fn collect(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut children = fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    children.sort();
    for path in children {
        let is_dir = path.is_dir();
        out.push(path.clone());
        if is_dir {
            collect(&path, out)?;
        }
    }
    Ok(())
}

fn archive_name(top: &str, rel: &Path) -> String {
    let mut name = top.to_string();
    for component in rel.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    name
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}
