//! Rebuilds a bundle through a sink, decrypting its binaries on the way

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, trace, warn};
use unseal_macho::{DecryptedRange, Outcome, RawImage, decrypt, is_macho};

use crate::bundle::BundleEntry;
use crate::errors::{AppError, AppResult};
use crate::live::LiveImages;
use crate::sink::{FileMode, Sink};

/// A binary that could not be decrypted; it was written unchanged
#[derive(Debug)]
pub struct Failure {
    pub path: PathBuf,
    pub error: AppError,
}

#[derive(Debug, Default)]
pub struct Report {
    /// Binaries written with their encrypted ranges replaced
    pub decrypted: Vec<PathBuf>,
    /// Binaries that were not encrypted to begin with
    pub plain_binaries: usize,
    /// All other files written
    pub other_files: usize,
    pub failures: Vec<Failure>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Send every entry of the bundle to `sink`, decrypting encrypted binaries
/// against `live`.
///
/// Per-binary problems (malformed images, missing live images) are collected
/// in the report and the binary is written as found. An error is returned only
/// for conditions that make the rest of the run untrustworthy: a layout
/// mismatch between a binary and its live image, or an I/O failure.
pub fn run(
    entries: &[BundleEntry],
    live: &dyn LiveImages,
    sink: &mut dyn Sink,
) -> AppResult<Report> {
    let mut report = Report::default();

    for entry in entries {
        trace!("{}", entry.rel().display());
        match entry {
            BundleEntry::Directory { rel } => sink.directory(rel)?,
            BundleEntry::File {
                rel,
                path,
                modified,
                ..
            } => {
                let bytes = fs::read(path)?;
                if !is_macho(&bytes) {
                    sink.file(rel, &bytes, FileMode::Regular, *modified)?;
                    report.other_files += 1;
                    continue;
                }

                let mut raw = RawImage::new(bytes);
                match unseal(rel, &mut raw, live) {
                    Ok(Outcome::Decrypted(_)) => report.decrypted.push(rel.clone()),
                    Ok(Outcome::NotEncrypted) => report.plain_binaries += 1,
                    Err(e) if e.is_fatal() => {
                        error!("{}: {}", rel.display(), e);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!("{}: {}, writing it unchanged", rel.display(), e);
                        report.failures.push(Failure {
                            path: rel.clone(),
                            error: e,
                        });
                    }
                }
                sink.file(rel, raw.as_bytes(), FileMode::Executable, *modified)?;
            }
        }
    }
    Ok(report)
}

/// Decrypt one binary in place. On a non-fatal error `raw` is left untouched.
fn unseal(rel: &Path, raw: &mut RawImage, live: &dyn LiveImages) -> AppResult<Outcome> {
    let macho = raw.parse().map_err(unseal_macho::PatchError::from)?;
    if !macho.is_encrypted() {
        debug!("{} is not encrypted", rel.display());
        return Ok(Outcome::NotEncrypted);
    }

    let image = live.open(rel)?;
    info!("Dumping {}...", rel.display());
    let outcome = decrypt(raw, macho, image.as_ref())?;
    if let Outcome::Decrypted(ranges) = &outcome {
        for DecryptedRange {
            cryptoff,
            cryptsize,
            segment,
            ..
        } in ranges
        {
            info!(
                " - {} bytes at {} ({}) replaced from the live image",
                cryptsize,
                cryptoff,
                segment.as_deref().unwrap_or("no segment")
            );
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::SystemTime;
    use tempfile::TempDir;
    use unseal_macho::{LiveAddress, LiveImage, PatchError};

    const BASE: LiveAddress = LiveAddress::new(0x1_0000_0000);
    const CRYPTID_AT: usize = 32 + 16;

    /// 64-bit image with one encryption command over [0x100, 0x140)
    fn image(cryptid: u32, ncmds: u32, body: u8) -> Vec<u8> {
        let mut out: Vec<u8> = [0xFEEDFACFu32, 0x0100000C, 0, 2, ncmds, 24, 0, 0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        for v in [0x2Cu32, 24, 0x100, 0x40, cryptid, 0] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.resize(0x100, 0);
        out.resize(0x140, body);
        out
    }

    struct OwnedImage(Vec<u8>);

    impl LiveImage for OwnedImage {
        fn base(&self) -> LiveAddress {
            BASE
        }

        fn read(&self, addr: LiveAddress, len: usize) -> Option<&[u8]> {
            let start = addr.offset_from(BASE)?;
            self.0.get(start..start.checked_add(len)?)
        }
    }

    #[derive(Default)]
    struct Images(HashMap<PathBuf, Vec<u8>>);

    impl LiveImages for Images {
        fn open(&self, binary: &Path) -> AppResult<Box<dyn LiveImage>> {
            match self.0.get(binary) {
                Some(bytes) => Ok(Box::new(OwnedImage(bytes.clone()))),
                None => Err(AppError::MissingLiveModule {
                    path: binary.to_path_buf(),
                    candidates: 0,
                }),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        dirs: Vec<PathBuf>,
        files: Vec<(PathBuf, Vec<u8>, FileMode)>,
    }

    impl Sink for Recorder {
        fn directory(&mut self, rel: &Path) -> AppResult<()> {
            self.dirs.push(rel.to_path_buf());
            Ok(())
        }

        fn file(
            &mut self,
            rel: &Path,
            data: &[u8],
            mode: FileMode,
            _modified: Option<SystemTime>,
        ) -> AppResult<()> {
            self.files.push((rel.to_path_buf(), data.to_vec(), mode));
            Ok(())
        }
    }

    fn bundle(tmp: &TempDir, files: &[(&str, Vec<u8>)]) -> Vec<BundleEntry> {
        let mut entries = vec![BundleEntry::Directory {
            rel: PathBuf::from("Demo.app"),
        }];
        for (name, bytes) in files {
            let path = tmp.path().join(name);
            fs::write(&path, bytes).unwrap();
            entries.push(BundleEntry::File {
                rel: Path::new("Demo.app").join(name),
                path,
                size: bytes.len() as u64,
                modified: None,
            });
        }
        entries
    }

    #[test]
    fn test_decrypts_encrypted_binary() {
        let tmp = TempDir::new().unwrap();
        let entries = bundle(
            &tmp,
            &[("Demo", image(1, 1, 0xEE)), ("Info.plist", b"<plist/>".to_vec())],
        );
        let mut live = Images::default();
        live.0.insert(PathBuf::from("Demo.app/Demo"), image(1, 1, 0x5A));
        let mut sink = Recorder::default();

        let report = run(&entries, &live, &mut sink).unwrap();
        assert!(report.is_success());
        assert_eq!(report.decrypted, vec![PathBuf::from("Demo.app/Demo")]);
        assert_eq!(report.other_files, 1);
        assert_eq!(sink.dirs, vec![PathBuf::from("Demo.app")]);

        let (_, data, mode) = &sink.files[0];
        assert_eq!(*mode, FileMode::Executable);
        assert_eq!(&data[CRYPTID_AT..CRYPTID_AT + 4], &[0, 0, 0, 0]);
        assert!(data[0x100..0x140].iter().all(|&b| b == 0x5A));
        assert_eq!(sink.files[1].2, FileMode::Regular);
    }

    #[test]
    fn test_missing_live_image_is_reported_and_copied() {
        let tmp = TempDir::new().unwrap();
        let encrypted = image(1, 1, 0xEE);
        let entries = bundle(&tmp, &[("Demo", encrypted.clone()), ("Plain", image(0, 1, 0))]);
        let mut sink = Recorder::default();

        let report = run(&entries, &Images::default(), &mut sink).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            AppError::MissingLiveModule { .. }
        ));
        assert_eq!(report.plain_binaries, 1);
        assert_eq!(sink.files.len(), 2);
        assert_eq!(sink.files[0].1, encrypted);
    }

    #[test]
    fn test_parse_error_continues_with_next_binary() {
        let tmp = TempDir::new().unwrap();
        let broken = image(1, 2, 0xEE);
        let entries = bundle(&tmp, &[("Broken", broken.clone()), ("Demo", image(1, 1, 0xEE))]);
        let mut live = Images::default();
        live.0.insert(PathBuf::from("Demo.app/Demo"), image(1, 1, 0x5A));
        let mut sink = Recorder::default();

        let report = run(&entries, &live, &mut sink).unwrap();
        assert_eq!(report.decrypted, vec![PathBuf::from("Demo.app/Demo")]);
        assert!(matches!(
            report.failures[0].error,
            AppError::Patch(PatchError::Parse(_))
        ));
        assert_eq!(sink.files[0].1, broken);
    }

    struct Unreadable;

    impl LiveImages for Unreadable {
        fn open(&self, binary: &Path) -> AppResult<Box<dyn LiveImage>> {
            Err(AppError::UnreadableLiveModule {
                path: binary.to_path_buf(),
                image: PathBuf::from("dumps/Demo"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            })
        }
    }

    #[test]
    fn test_unreadable_live_image_is_reported_and_run_continues() {
        let tmp = TempDir::new().unwrap();
        let encrypted = image(1, 1, 0xEE);
        let entries = bundle(
            &tmp,
            &[("Demo", encrypted.clone()), ("Info.plist", b"<plist/>".to_vec())],
        );
        let mut sink = Recorder::default();

        let report = run(&entries, &Unreadable, &mut sink).unwrap();
        assert!(!report.is_success());
        assert!(matches!(
            report.failures[0].error,
            AppError::UnreadableLiveModule { .. }
        ));
        assert_eq!(report.other_files, 1);
        assert_eq!(sink.files.len(), 2);
        assert_eq!(sink.files[0].1, encrypted);
    }

    #[test]
    fn test_address_mismatch_stops_the_run() {
        let tmp = TempDir::new().unwrap();
        let entries = bundle(&tmp, &[("Demo", image(1, 1, 0xEE)), ("Later", b"x".to_vec())]);
        let mut live = Images::default();
        live.0.insert(PathBuf::from("Demo.app/Demo"), image(0, 1, 0x5A));
        let mut sink = Recorder::default();

        let err = run(&entries, &live, &mut sink).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            AppError::Patch(PatchError::AddressMismatch { .. })
        ));
        assert!(sink.files.is_empty());
    }
}
