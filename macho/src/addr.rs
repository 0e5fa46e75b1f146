//! File offsets and live addresses
//!
//! A Mach-O image is addressed two ways: by byte offset into the file as it
//! sits on disk, and by address inside the process that has it mapped. The two
//! never mix implicitly; [`LiveAddress::at`] is the only way across.

use std::fmt;
use std::ops::Add;

/// Byte offset into the on-disk image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileOffset(usize);

impl FileOffset {
    pub const fn new(offset: usize) -> Self {
        Self(offset)
    }

    pub const fn get(self) -> usize {
        self.0
    }

    /// Offset `n` bytes further into the file, `None` on overflow
    pub fn checked_add(self, n: usize) -> Option<Self> {
        self.0.checked_add(n).map(Self)
    }
}

impl From<u32> for FileOffset {
    fn from(value: u32) -> Self {
        Self(value as usize)
    }
}

impl Add<usize> for FileOffset {
    type Output = FileOffset;

    fn add(self, rhs: usize) -> FileOffset {
        FileOffset(self.0 + rhs)
    }
}

impl fmt::Display for FileOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+0x{:x}", self.0)
    }
}

/// Address inside the process holding the live image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LiveAddress(u64);

impl LiveAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Translate a file offset into an address, treating `self` as the image base.
    pub fn at(self, offset: FileOffset) -> LiveAddress {
        LiveAddress(self.0.wrapping_add(offset.0 as u64))
    }

    /// Distance from `base` to `self`, `None` when `self` lies below `base`
    pub fn offset_from(self, base: LiveAddress) -> Option<usize> {
        self.0
            .checked_sub(base.0)
            .and_then(|d| usize::try_from(d).ok())
    }
}

impl fmt::Display for LiveAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}
