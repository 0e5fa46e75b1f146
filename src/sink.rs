//! Output sink for the rebuilt bundle

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use tracing::trace;

use crate::errors::{AppError, AppResult};

/// Permission class of an emitted file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Regular,
    /// Binaries; written with the execute bits set
    Executable,
}

impl FileMode {
    pub fn bits(self) -> u32 {
        match self {
            FileMode::Regular => 0o644,
            FileMode::Executable => 0o755,
        }
    }
}

const DIR_MODE: u32 = 0o755;

/// Receives the bundle's directories and files, addressed by bundle-relative path
pub trait Sink {
    fn directory(&mut self, rel: &Path) -> AppResult<()>;

    fn file(
        &mut self,
        rel: &Path,
        data: &[u8],
        mode: FileMode,
        modified: Option<SystemTime>,
    ) -> AppResult<()>;
}

/// Counters for the run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Writes the bundle below a root directory (normally `<output>/Payload`)
pub struct DirectorySink {
    root: PathBuf,
    preserve_mtime: bool,
    stats: SinkStats,
}

impl DirectorySink {
    pub fn create(root: PathBuf, preserve_mtime: bool) -> AppResult<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            preserve_mtime,
            stats: SinkStats::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    fn target(&self, rel: &Path) -> AppResult<PathBuf> {
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AppError::Bundle(format!(
                "refusing to write outside the payload: {}",
                rel.display()
            )));
        }
        Ok(self.root.join(rel))
    }
}

impl Sink for DirectorySink {
    fn directory(&mut self, rel: &Path) -> AppResult<()> {
        let dest = self.target(rel)?;
        fs::create_dir_all(&dest)?;
        set_mode(&dest, DIR_MODE)?;
        self.stats.directories += 1;
        Ok(())
    }

    fn file(
        &mut self,
        rel: &Path,
        data: &[u8],
        mode: FileMode,
        modified: Option<SystemTime>,
    ) -> AppResult<()> {
        let dest = self.target(rel)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, data)?;
        set_mode(&dest, mode.bits())?;
        if self.preserve_mtime
            && let Some(mtime) = modified
        {
            let _ = filetime::set_file_mtime(&dest, filetime::FileTime::from_system_time(mtime));
        }
        trace!("wrote {} ({} bytes, {:?})", rel.display(), data.len(), mode);
        self.stats.files += 1;
        self.stats.bytes += data.len() as u64;
        Ok(())
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> AppResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> AppResult<()> {
    Ok(())
}
