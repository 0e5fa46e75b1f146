//! Mach-O header

use crate::addr::FileOffset;
use crate::error::{ParseError, ParseResult};
use crate::reader::Reader;

/// Magic of a 32-bit little-endian image (raw bytes CE FA ED FE)
pub const MH_MAGIC: u32 = 0xFEEDFACE;
/// Magic of a 64-bit little-endian image (raw bytes CF FA ED FE)
pub const MH_MAGIC_64: u32 = 0xFEEDFACF;

/// Header size for 32-bit images: seven u32 fields
pub const MH_HEADER_SIZE: usize = 7 * 4;
/// Header size for 64-bit images: eight u32 fields, the last one reserved
pub const MH_HEADER_SIZE_64: usize = 8 * 4;

/// Word size selected by the header magic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    Bits32,
    Bits64,
}

impl WordSize {
    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            MH_MAGIC => Some(WordSize::Bits32),
            MH_MAGIC_64 => Some(WordSize::Bits64),
            _ => None,
        }
    }

    pub fn header_size(self) -> usize {
        match self {
            WordSize::Bits32 => MH_HEADER_SIZE,
            WordSize::Bits64 => MH_HEADER_SIZE_64,
        }
    }
}

/// Check if the given bytes start with a thin little-endian Mach-O magic
pub fn is_macho(data: &[u8]) -> bool {
    data.len() >= 4
        && WordSize::from_magic(u32::from_le_bytes([data[0], data[1], data[2], data[3]])).is_some()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub cputype: i32,
    pub cpusubtype: i32,
    pub filetype: u32,
    /// Number of load commands
    pub ncmds: u32,
    /// Total size of all load commands in bytes
    pub sizeofcmds: u32,
    pub flags: u32,
    /// Present on 64-bit images only
    pub reserved: Option<u32>,
}

impl Header {
    pub fn parse(data: &[u8]) -> ParseResult<Header> {
        let r = Reader::new(data);
        let magic = r.u32(FileOffset::new(0))?;
        let word_size = WordSize::from_magic(magic).ok_or(ParseError::InvalidMagic(magic))?;
        // Fail on the whole header rather than on whichever field runs out first
        r.bytes(FileOffset::new(0), word_size.header_size())?;

        let field = |n: usize| r.u32(FileOffset::new(n * 4));
        Ok(Header {
            magic,
            cputype: field(1)? as i32,
            cpusubtype: field(2)? as i32,
            filetype: field(3)?,
            ncmds: field(4)?,
            sizeofcmds: field(5)?,
            flags: field(6)?,
            reserved: match word_size {
                WordSize::Bits64 => Some(field(7)?),
                WordSize::Bits32 => None,
            },
        })
    }

    pub fn word_size(&self) -> WordSize {
        // `parse` only builds headers with a recognized magic
        if self.magic == MH_MAGIC_64 {
            WordSize::Bits64
        } else {
            WordSize::Bits32
        }
    }

    /// Byte length of the fixed header, where the load commands start
    pub fn size(&self) -> usize {
        self.word_size().header_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_header(magic: u32, fields: &[u32]) -> Vec<u8> {
        let mut out = magic.to_le_bytes().to_vec();
        for f in fields {
            out.extend_from_slice(&f.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_parse_64bit_header() {
        let data = raw_header(MH_MAGIC_64, &[0x0100000C, 0, 2, 5, 0x300, 0x00200085, 7]);
        let header = Header::parse(&data).unwrap();
        assert_eq!(header.word_size(), WordSize::Bits64);
        assert_eq!(header.size(), 32);
        assert_eq!(header.cputype, 0x0100000C);
        assert_eq!(header.filetype, 2);
        assert_eq!(header.ncmds, 5);
        assert_eq!(header.sizeofcmds, 0x300);
        assert_eq!(header.flags, 0x00200085);
        assert_eq!(header.reserved, Some(7));
    }

    #[test]
    fn test_parse_32bit_header() {
        let data = raw_header(MH_MAGIC, &[12, 9, 2, 3, 0x100, 0x85]);
        let header = Header::parse(&data).unwrap();
        assert_eq!(header.word_size(), WordSize::Bits32);
        assert_eq!(header.size(), 28);
        assert_eq!(header.reserved, None);
        assert_eq!(header.cpusubtype, 9);
    }

    #[test]
    fn test_invalid_magic() {
        // Big-endian and fat images are not recognized
        for magic in [0xCEFAEDFEu32, 0xCAFEBABE, 0] {
            let data = raw_header(magic, &[0; 7]);
            assert_eq!(Header::parse(&data), Err(ParseError::InvalidMagic(magic)));
        }
    }

    #[test]
    fn test_truncated_header() {
        let data = raw_header(MH_MAGIC_64, &[0; 6]);
        assert!(matches!(
            Header::parse(&data),
            Err(ParseError::Truncated { needed: 32, .. })
        ));
    }

    #[test]
    fn test_is_macho() {
        assert!(is_macho(&MH_MAGIC_64.to_le_bytes()));
        assert!(is_macho(&MH_MAGIC.to_le_bytes()));
        assert!(!is_macho(&0xCAFEBABEu32.to_be_bytes()));
        assert!(!is_macho(b"PK"));
    }
}
