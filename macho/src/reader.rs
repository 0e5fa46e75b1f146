use crate::addr::FileOffset;
use crate::error::{ParseError, ParseResult};

/// Bounds-checked little-endian reads over an image's bytes
#[derive(Clone, Copy)]
pub(crate) struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn bytes(&self, off: FileOffset, len: usize) -> ParseResult<&'a [u8]> {
        let start = off.get();
        start
            .checked_add(len)
            .and_then(|end| self.data.get(start..end))
            .ok_or(ParseError::Truncated {
                offset: off,
                needed: len,
                available: self.data.len().saturating_sub(start),
            })
    }

    pub(crate) fn u32(&self, off: FileOffset) -> ParseResult<u32> {
        let b = self.bytes(off, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&self, off: FileOffset) -> ParseResult<u64> {
        let b = self.bytes(off, 8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Fixed-size name field (segment/section names), padded with NULs
    pub(crate) fn fixed_str(&self, off: FileOffset, max_len: usize) -> ParseResult<String> {
        let slice = self.bytes(off, max_len)?;
        let nul = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
        Ok(String::from_utf8_lossy(&slice[..nul]).into_owned())
    }
}
