//! On-disk and live copies of an image

use crate::addr::{FileOffset, LiveAddress};
use crate::binary::MachO;
use crate::error::ParseResult;
use crate::reader::Reader;

/// Owned on-disk bytes of one binary. Patched in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    bytes: Vec<u8>,
}

impl RawImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn parse(&self) -> ParseResult<MachO> {
        MachO::parse(&self.bytes)
    }

    pub fn read_u32(&self, at: FileOffset) -> ParseResult<u32> {
        Reader::new(&self.bytes).u32(at)
    }

    /// Overwrite a little-endian u32. Returns false when `at` is out of range.
    pub fn write_u32(&mut self, at: FileOffset, value: u32) -> bool {
        self.splice(at, &value.to_le_bytes())
    }

    /// Overwrite `data.len()` bytes starting at `at`. Returns false when the
    /// range does not fit, leaving the image untouched.
    pub fn splice(&mut self, at: FileOffset, data: &[u8]) -> bool {
        let start = at.get();
        match start
            .checked_add(data.len())
            .and_then(|end| self.bytes.get_mut(start..end))
        {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}

/// Read-only view of a binary as currently mapped by a running process
pub trait LiveImage {
    /// Address the image is mapped at
    fn base(&self) -> LiveAddress;

    /// Borrow `len` bytes at `addr`, `None` if any of them lie outside the image
    fn read(&self, addr: LiveAddress, len: usize) -> Option<&[u8]>;

    fn read_u32(&self, addr: LiveAddress) -> Option<u32> {
        self.read(addr, 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Live image backed by a byte slice, e.g. a memory-mapped dump of the
/// process's mapping
#[derive(Debug, Clone, Copy)]
pub struct SliceImage<'a> {
    base: LiveAddress,
    bytes: &'a [u8],
}

impl<'a> SliceImage<'a> {
    pub fn new(base: LiveAddress, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl LiveImage for SliceImage<'_> {
    fn base(&self) -> LiveAddress {
        self.base
    }

    fn read(&self, addr: LiveAddress, len: usize) -> Option<&[u8]> {
        let start = addr.offset_from(self.base)?;
        let end = start.checked_add(len)?;
        self.bytes.get(start..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_write_and_read_back() {
        let mut raw = RawImage::new(vec![0xFF; 8]);
        assert!(raw.write_u32(FileOffset::new(4), 0));
        assert_eq!(raw.read_u32(FileOffset::new(4)), Ok(0));
        assert_eq!(raw.as_bytes(), &[0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0]);
    }

    #[test]
    fn test_raw_splice_out_of_range_is_untouched() {
        let mut raw = RawImage::new(vec![1, 2, 3, 4]);
        assert!(!raw.splice(FileOffset::new(2), &[9, 9, 9]));
        assert!(!raw.write_u32(FileOffset::new(usize::MAX), 0));
        assert_eq!(raw.into_bytes(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_slice_image_reads() {
        let bytes = [1u8, 0, 0, 0, 0xAA, 0xBB];
        let live = SliceImage::new(LiveAddress::new(0x1000), &bytes);
        assert_eq!(live.read_u32(LiveAddress::new(0x1000)), Some(1));
        assert_eq!(live.read(LiveAddress::new(0x1004), 2), Some(&[0xAA, 0xBB][..]));
        assert_eq!(live.read(LiveAddress::new(0x1004), 3), None);
        assert_eq!(live.read(LiveAddress::new(0xFFF), 1), None);
    }
}
