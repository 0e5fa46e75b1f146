//! Load command stream
//!
//! The load commands directly follow the header. Every command starts with
//! its type tag and its total size in bytes; `walk` splits the stream on those
//! two fields alone and `decode` turns each record into a [`Command`] through a
//! dispatch table keyed by tag. Tags without a decoder stay generic records.

use tracing::trace;

use crate::addr::{FileOffset, LiveAddress};
use crate::error::{ParseError, ParseResult};
use crate::header::Header;
use crate::reader::Reader;

pub const LC_SEGMENT: u32 = 0x01;
pub const LC_SEGMENT_64: u32 = 0x19;
/// Encrypted segment information
pub const LC_ENCRYPTION_INFO: u32 = 0x21;
/// 64-bit encrypted segment information
pub const LC_ENCRYPTION_INFO_64: u32 = 0x2C;

/// Size of the tag + size prefix every load command carries
pub const LOAD_COMMAND_PREFIX: usize = 8;

/// Offset of `cryptid` from the start of either encryption command.
/// Holds for the 64-bit shape too since its extra pad field comes after.
pub const CRYPTID_OFFSET: usize = 16;

const ENCRYPTION_INFO_SIZE: usize = 20;
const ENCRYPTION_INFO_64_SIZE: usize = 24;
const SEGMENT_SIZE: usize = 56;
const SEGMENT_64_SIZE: usize = 72;

/// One entry of the load command stream, before decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRecord {
    pub tag: u32,
    /// Total size of the command in bytes, prefix included
    pub size: u32,
    /// Where the command starts in the file
    pub offset: FileOffset,
}

impl LoadRecord {
    /// Address of this command inside an image mapped at `base`
    pub fn live_address(&self, base: LiveAddress) -> LiveAddress {
        base.at(self.offset)
    }
}

/// Segment command (`LC_SEGMENT` / `LC_SEGMENT_64`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
}

impl Segment {
    /// Whether the file range `[start, start + len)` lies inside this segment
    pub fn contains(&self, start: FileOffset, len: u32) -> bool {
        let start = start.get() as u64;
        start >= self.fileoff && start + len as u64 <= self.fileoff.saturating_add(self.filesize)
    }
}

/// `encryption_info_command` / `encryption_info_command_64`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionInfo {
    /// File offset of the encrypted range
    pub cryptoff: FileOffset,
    /// Size of the encrypted range in bytes
    pub cryptsize: u32,
    /// 0 means not encrypted (or no longer), 1 means encrypted
    pub cryptid: u32,
    /// Alignment padding of the 64-bit shape
    pub pad: Option<u32>,
}

impl EncryptionInfo {
    pub fn is_encrypted(&self) -> bool {
        self.cryptid == 1
    }

    /// Encode the command back into its on-disk bytes
    pub fn encode(&self, record: &LoadRecord) -> Vec<u8> {
        let mut out = Vec::with_capacity(record.size as usize);
        out.extend_from_slice(&record.tag.to_le_bytes());
        out.extend_from_slice(&record.size.to_le_bytes());
        out.extend_from_slice(&(self.cryptoff.get() as u32).to_le_bytes());
        out.extend_from_slice(&self.cryptsize.to_le_bytes());
        out.extend_from_slice(&self.cryptid.to_le_bytes());
        if let Some(pad) = self.pad {
            out.extend_from_slice(&pad.to_le_bytes());
        }
        out.resize(out.len().max(record.size as usize), 0);
        out
    }
}

/// Decoded payload of a load command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Any command this crate has no decoder for
    Generic,
    Segment(Segment),
    Encryption(EncryptionInfo),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub record: LoadRecord,
    pub kind: CommandKind,
}

impl Command {
    pub fn encryption(&self) -> Option<&EncryptionInfo> {
        match &self.kind {
            CommandKind::Encryption(info) => Some(info),
            _ => None,
        }
    }

    pub fn segment(&self) -> Option<&Segment> {
        match &self.kind {
            CommandKind::Segment(seg) => Some(seg),
            _ => None,
        }
    }
}

type Decoder = fn(Reader<'_>, &LoadRecord) -> ParseResult<CommandKind>;

const DECODERS: &[(u32, Decoder)] = &[
    (LC_SEGMENT, decode_segment),
    (LC_SEGMENT_64, decode_segment_64),
    (LC_ENCRYPTION_INFO, decode_encryption_info),
    (LC_ENCRYPTION_INFO_64, decode_encryption_info_64),
];

fn resolve(tag: u32) -> Option<Decoder> {
    DECODERS
        .iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, decoder)| *decoder)
}

/// Split the load command stream into records.
///
/// Consumes exactly `header.sizeofcmds` bytes after the header and requires
/// the number of records found to equal `header.ncmds`.
pub fn walk(data: &[u8], header: &Header) -> ParseResult<Vec<LoadRecord>> {
    let r = Reader::new(data);
    let start = FileOffset::new(header.size());
    let stream_len = header.sizeofcmds as usize;
    r.bytes(start, stream_len)?;

    let mut records = Vec::with_capacity((header.ncmds as usize).min(1024));
    let mut consumed = 0usize;
    while consumed < stream_len {
        let offset = start + consumed;
        if stream_len - consumed < LOAD_COMMAND_PREFIX {
            return Err(ParseError::MalformedRecordStream {
                offset,
                reason: format!(
                    "{} trailing bytes cannot hold a command prefix",
                    stream_len - consumed
                ),
            });
        }
        let tag = r.u32(offset)?;
        let size = r.u32(offset + 4)?;
        if (size as usize) < LOAD_COMMAND_PREFIX {
            return Err(ParseError::MalformedRecordStream {
                offset,
                reason: format!("command 0x{tag:x} has size {size}"),
            });
        }
        if size as usize > stream_len - consumed {
            return Err(ParseError::MalformedRecordStream {
                offset,
                reason: format!(
                    "command 0x{tag:x} of size {size} overruns sizeofcmds ({} bytes left)",
                    stream_len - consumed
                ),
            });
        }
        trace!("load command 0x{:x} at {} ({} bytes)", tag, offset, size);
        records.push(LoadRecord { tag, size, offset });
        consumed += size as usize;
    }

    if records.len() != header.ncmds as usize {
        return Err(ParseError::CountMismatch {
            declared: header.ncmds,
            observed: records.len(),
        });
    }
    Ok(records)
}

/// Decode one record into a command
pub fn decode(data: &[u8], record: LoadRecord) -> ParseResult<Command> {
    let kind = match resolve(record.tag) {
        Some(decoder) => decoder(Reader::new(data), &record)?,
        None => CommandKind::Generic,
    };
    Ok(Command { record, kind })
}

fn require_size(record: &LoadRecord, min: usize) -> ParseResult<()> {
    if (record.size as usize) < min {
        return Err(ParseError::MalformedRecordStream {
            offset: record.offset,
            reason: format!(
                "command 0x{:x} needs {} bytes, declares {}",
                record.tag, min, record.size
            ),
        });
    }
    Ok(())
}

fn decode_segment(r: Reader<'_>, record: &LoadRecord) -> ParseResult<CommandKind> {
    require_size(record, SEGMENT_SIZE)?;
    let off = record.offset;
    Ok(CommandKind::Segment(Segment {
        name: r.fixed_str(off + 8, 16)?,
        vmaddr: r.u32(off + 24)? as u64,
        vmsize: r.u32(off + 28)? as u64,
        fileoff: r.u32(off + 32)? as u64,
        filesize: r.u32(off + 36)? as u64,
    }))
}

fn decode_segment_64(r: Reader<'_>, record: &LoadRecord) -> ParseResult<CommandKind> {
    require_size(record, SEGMENT_64_SIZE)?;
    let off = record.offset;
    Ok(CommandKind::Segment(Segment {
        name: r.fixed_str(off + 8, 16)?,
        vmaddr: r.u64(off + 24)?,
        vmsize: r.u64(off + 32)?,
        fileoff: r.u64(off + 40)?,
        filesize: r.u64(off + 48)?,
    }))
}

fn read_encryption_info(
    r: Reader<'_>,
    record: &LoadRecord,
    pad: bool,
) -> ParseResult<EncryptionInfo> {
    let off = record.offset;
    let info = EncryptionInfo {
        cryptoff: FileOffset::from(r.u32(off + 8)?),
        cryptsize: r.u32(off + 12)?,
        cryptid: r.u32(off + CRYPTID_OFFSET)?,
        pad: if pad { Some(r.u32(off + 20)?) } else { None },
    };
    let in_bounds = info
        .cryptoff
        .checked_add(info.cryptsize as usize)
        .is_some_and(|end| end.get() <= r.len());
    if !in_bounds {
        return Err(ParseError::EncryptedRangeOutOfBounds {
            cryptoff: info.cryptoff,
            cryptsize: info.cryptsize,
            len: r.len(),
        });
    }
    // The cleared cryptid would be copied back over from the live image
    let field = off + CRYPTID_OFFSET;
    let end = info.cryptoff.get() + info.cryptsize as usize;
    if info.cryptoff.get() < field.get() + 4 && field.get() < end {
        return Err(ParseError::EncryptedRangeCoversCryptid {
            cryptoff: info.cryptoff,
            cryptsize: info.cryptsize,
            field,
        });
    }
    Ok(info)
}

fn decode_encryption_info(r: Reader<'_>, record: &LoadRecord) -> ParseResult<CommandKind> {
    require_size(record, ENCRYPTION_INFO_SIZE)?;
    read_encryption_info(r, record, false).map(CommandKind::Encryption)
}

fn decode_encryption_info_64(r: Reader<'_>, record: &LoadRecord) -> ParseResult<CommandKind> {
    require_size(record, ENCRYPTION_INFO_64_SIZE)?;
    read_encryption_info(r, record, true).map(CommandKind::Encryption)
}
