//! Live images of the bundle's binaries
//!
//! The binaries' plaintext comes from images captured out of the running
//! process, one file per loaded binary, named after the binary. They are
//! mapped read-only and never modified.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, trace};
use unseal_macho::{LiveAddress, LiveImage};

use crate::errors::{AppError, AppResult};

/// Source of live images, keyed by the bundle-relative path of a binary
pub trait LiveImages {
    fn open(&self, binary: &Path) -> AppResult<Box<dyn LiveImage>>;
}

/// Captured image mapped from disk
pub struct MappedImage {
    base: LiveAddress,
    map: Mmap,
}

impl MappedImage {
    pub fn open(path: &Path, base: LiveAddress) -> io::Result<Self> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file) }?;
        Ok(Self { base, map })
    }
}

impl LiveImage for MappedImage {
    fn base(&self) -> LiveAddress {
        self.base
    }

    fn read(&self, addr: LiveAddress, len: usize) -> Option<&[u8]> {
        let start = addr.offset_from(self.base)?;
        self.map.get(start..start.checked_add(len)?)
    }
}

/// Directory of captured images, searched recursively and matched by file name
pub struct DumpDirectory {
    base: LiveAddress,
    by_name: HashMap<OsString, Vec<PathBuf>>,
}

impl DumpDirectory {
    pub fn open(root: &Path, base: LiveAddress) -> AppResult<Self> {
        if !root.is_dir() {
            return Err(AppError::Config(format!(
                "dump directory {} does not exist",
                root.display()
            )));
        }
        let mut by_name: HashMap<OsString, Vec<PathBuf>> = HashMap::new();
        index(root, &mut by_name)?;
        debug!("{} captured images under {}", by_name.len(), root.display());
        Ok(Self { base, by_name })
    }

    /// Images whose file name matches the binary's
    pub fn candidates(&self, binary: &Path) -> &[PathBuf] {
        binary
            .file_name()
            .and_then(|name| self.by_name.get(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn index(dir: &Path, by_name: &mut HashMap<OsString, Vec<PathBuf>>) -> AppResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = fs::symlink_metadata(&path)?;
        if meta.is_symlink() {
            // Follow links to files; linked directories could loop
            match fs::metadata(&path) {
                Ok(target) if target.is_file() && target.len() > 0 => {
                    trace!("image {} (linked)", path.display());
                    by_name.entry(entry.file_name()).or_default().push(path);
                }
                _ => debug!("Ignoring link {}", path.display()),
            }
        } else if meta.is_dir() {
            index(&path, by_name)?;
        } else if meta.len() == 0 {
            // Empty files cannot be mapped and hold nothing to copy
            debug!("Ignoring empty image {}", path.display());
        } else {
            trace!("image {}", path.display());
            by_name.entry(entry.file_name()).or_default().push(path);
        }
    }
    Ok(())
}

impl LiveImages for DumpDirectory {
    fn open(&self, binary: &Path) -> AppResult<Box<dyn LiveImage>> {
        match self.candidates(binary) {
            [path] => {
                debug!("{} -> {}", binary.display(), path.display());
                let image = MappedImage::open(path, self.base).map_err(|source| {
                    AppError::UnreadableLiveModule {
                        path: binary.to_path_buf(),
                        image: path.clone(),
                        source,
                    }
                })?;
                Ok(Box::new(image))
            }
            other => Err(AppError::MissingLiveModule {
                path: binary.to_path_buf(),
                candidates: other.len(),
            }),
        }
    }
}
