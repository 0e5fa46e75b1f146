//! Decrypt-and-patch engine
//!
//! For every encryption command still marked encrypted, the on-disk `cryptid`
//! is cleared and the encrypted range is replaced with the plaintext the
//! loader already produced in the live image. Before anything is copied, both
//! images must agree on where the `cryptid` field lives: the raw copy must
//! read back 0 after the write and the live copy must still read 1 at the
//! same offset. A disagreement means the offsets parsed from the raw image do
//! not describe the live one, and the run stops.

use tracing::{debug, info, warn};

use crate::addr::FileOffset;
use crate::binary::MachO;
use crate::commands::{CRYPTID_OFFSET, EncryptionInfo, LoadRecord};
use crate::error::{PatchError, PatchResult, Side};
use crate::image::{LiveImage, RawImage};

/// One range replaced with plaintext
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedRange {
    /// The encryption command that described the range
    pub record: LoadRecord,
    pub cryptoff: FileOffset,
    pub cryptsize: u32,
    /// Name of the segment holding the range, when one covers it
    pub segment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No command marked a range as encrypted; the image is unchanged
    NotEncrypted,
    Decrypted(Vec<DecryptedRange>),
}

/// Parse `raw` and decrypt it against `live`
pub fn decrypt_image<L: LiveImage + ?Sized>(raw: &mut RawImage, live: &L) -> PatchResult<Outcome> {
    let macho = raw.parse()?;
    decrypt(raw, macho, live)
}

/// Patch every encrypted range of `raw` with the plaintext held by `live`.
///
/// `macho` must have been parsed from `raw`; it is consumed by the pass.
pub fn decrypt<L: LiveImage + ?Sized>(
    raw: &mut RawImage,
    macho: MachO,
    live: &L,
) -> PatchResult<Outcome> {
    let mut ranges = Vec::new();

    for command in &macho.commands {
        let Some(info) = command.encryption() else {
            continue;
        };
        match info.cryptid {
            1 => {}
            0 => {
                debug!("encryption command at {} already plaintext", command.record.offset);
                continue;
            }
            other => {
                warn!(
                    "encryption command at {} has unknown cryptid {}, leaving it untouched",
                    command.record.offset, other
                );
                continue;
            }
        }

        patch_one(raw, &command.record, info, live)?;
        ranges.push(DecryptedRange {
            record: command.record,
            cryptoff: info.cryptoff,
            cryptsize: info.cryptsize,
            segment: macho
                .segment_containing(info.cryptoff, info.cryptsize)
                .map(|seg| seg.name.clone()),
        });
    }

    if ranges.is_empty() {
        Ok(Outcome::NotEncrypted)
    } else {
        Ok(Outcome::Decrypted(ranges))
    }
}

fn patch_one<L: LiveImage + ?Sized>(
    raw: &mut RawImage,
    record: &LoadRecord,
    info: &EncryptionInfo,
    live: &L,
) -> PatchResult<()> {
    let field = record.offset + CRYPTID_OFFSET;
    let live_side = Side::Live(live.base());

    if !raw.write_u32(field, 0) {
        return Err(PatchError::AddressMismatch {
            side: Side::Raw,
            at: field,
            detail: "cryptid field lies outside the image".into(),
        });
    }
    match raw.read_u32(field) {
        Ok(0) => {}
        Ok(found) => {
            return Err(PatchError::AddressMismatch {
                side: Side::Raw,
                at: field,
                detail: format!("cryptid reads {found} after being cleared"),
            });
        }
        Err(e) => {
            return Err(PatchError::AddressMismatch {
                side: Side::Raw,
                at: field,
                detail: e.to_string(),
            });
        }
    }
    info!("changed cryptid from 1 to 0 at {}", field);

    let live_command = record.live_address(live.base());
    let live_field = live.base().at(field);
    debug!("encryption command mapped at {}", live_command);
    match live.read_u32(live_field) {
        Some(1) => {}
        Some(found) => {
            return Err(PatchError::AddressMismatch {
                side: live_side,
                at: field,
                detail: format!(
                    "cryptid of the command at {live_command} reads {found}, expected 1"
                ),
            });
        }
        None => {
            return Err(PatchError::AddressMismatch {
                side: live_side,
                at: field,
                detail: format!("cryptid of the command at {live_command} is not readable"),
            });
        }
    }

    let src = live.base().at(info.cryptoff);
    let plain = live
        .read(src, info.cryptsize as usize)
        .ok_or_else(|| PatchError::AddressMismatch {
            side: live_side,
            at: info.cryptoff,
            detail: format!("range {src}..+0x{:x} is not readable", info.cryptsize),
        })?;
    if !raw.splice(info.cryptoff, plain) {
        return Err(PatchError::AddressMismatch {
            side: Side::Raw,
            at: info.cryptoff,
            detail: format!("range of 0x{:x} bytes does not fit the image", info.cryptsize),
        });
    }
    info!(
        "replaced 0x{:x} encrypted bytes at {} from the live image",
        info.cryptsize, info.cryptoff
    );
    Ok(())
}
