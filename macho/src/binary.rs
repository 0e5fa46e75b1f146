use tracing::debug;

use crate::addr::FileOffset;
use crate::commands::{self, Command, EncryptionInfo, LoadRecord, Segment};
use crate::error::ParseResult;
use crate::header::{Header, WordSize};

/// A parsed thin Mach-O image: its header and every load command, in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachO {
    pub header: Header,
    pub commands: Vec<Command>,
}

impl MachO {
    /// Parse the header and load commands. Either the whole stream decodes
    /// and matches the declared command count, or nothing is returned.
    pub fn parse(data: &[u8]) -> ParseResult<MachO> {
        let header = Header::parse(data)?;
        let commands = commands::walk(data, &header)?
            .into_iter()
            .map(|record| commands::decode(data, record))
            .collect::<ParseResult<Vec<_>>>()?;
        debug!(
            "parsed {:?} image: {} load commands, {} bytes",
            header.word_size(),
            commands.len(),
            header.sizeofcmds
        );
        Ok(MachO { header, commands })
    }

    pub fn word_size(&self) -> WordSize {
        self.header.word_size()
    }

    pub fn encryption_infos(&self) -> impl Iterator<Item = (&LoadRecord, &EncryptionInfo)> {
        self.commands
            .iter()
            .filter_map(|c| c.encryption().map(|info| (&c.record, info)))
    }

    /// Whether any encryption command still marks its range as encrypted
    pub fn is_encrypted(&self) -> bool {
        self.encryption_infos().any(|(_, info)| info.is_encrypted())
    }

    /// Segment whose file range covers `[start, start + len)`
    pub fn segment_containing(&self, start: FileOffset, len: u32) -> Option<&Segment> {
        self.commands
            .iter()
            .filter_map(Command::segment)
            .find(|seg| seg.contains(start, len))
    }
}
