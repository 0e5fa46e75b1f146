use std::fmt;

use thiserror::Error;

use crate::addr::{FileOffset, LiveAddress};

/// Structural errors in a Mach-O image.
/// Scoped to the one binary being parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid magic: 0x{0:08x}")]
    InvalidMagic(u32),

    #[error("truncated image: need {needed} bytes at {offset}, have {available}")]
    Truncated {
        offset: FileOffset,
        needed: usize,
        available: usize,
    },

    #[error("malformed record stream at {offset}: {reason}")]
    MalformedRecordStream { offset: FileOffset, reason: String },

    #[error("load command count mismatch: header declares {declared}, stream holds {observed}")]
    CountMismatch { declared: u32, observed: usize },

    #[error("encrypted range {cryptoff}..+0x{cryptsize:x} covers its own cryptid field at {field}")]
    EncryptedRangeCoversCryptid {
        cryptoff: FileOffset,
        cryptsize: u32,
        field: FileOffset,
    },

    #[error("encrypted range {cryptoff}..+0x{cryptsize:x} lies outside the {len}-byte image")]
    EncryptedRangeOutOfBounds {
        cryptoff: FileOffset,
        cryptsize: u32,
        len: usize,
    },
}

/// Which copy of the image an address check was made against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The owned on-disk copy being patched
    Raw,
    /// The image mapped in the running process
    Live(LiveAddress),
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Raw => write!(f, "raw"),
            Side::Live(base) => write!(f, "live ({base})"),
        }
    }
}

/// Errors raised while patching an encrypted image
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("address mismatch in {side} image at {at}: {detail}")]
    AddressMismatch {
        side: Side,
        at: FileOffset,
        detail: String,
    },
}

impl PatchError {
    /// Whether the whole run must stop. Only layout disagreements between the
    /// raw and live images qualify; parse errors stay with their binary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PatchError::AddressMismatch { .. })
    }
}

pub type ParseResult<T> = Result<T, ParseError>;
pub type PatchResult<T> = Result<T, PatchError>;
