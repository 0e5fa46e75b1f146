//! Synthetic Mach-O images for tests

use crate::commands::{LC_ENCRYPTION_INFO, LC_ENCRYPTION_INFO_64, LC_SEGMENT_64};
use crate::header::{MH_MAGIC, MH_MAGIC_64};

#[derive(Clone)]
pub(crate) struct ImageBuilder {
    is_64bit: bool,
    commands: Vec<u8>,
    count: u32,
    ncmds: Option<u32>,
    sizeofcmds: Option<u32>,
    min_len: usize,
    fills: Vec<(usize, Vec<u8>)>,
}

impl ImageBuilder {
    fn new(is_64bit: bool) -> Self {
        Self {
            is_64bit,
            commands: Vec::new(),
            count: 0,
            ncmds: None,
            sizeofcmds: None,
            min_len: 0,
            fills: Vec::new(),
        }
    }

    pub(crate) fn new_64() -> Self {
        Self::new(true)
    }

    pub(crate) fn new_32() -> Self {
        Self::new(false)
    }

    /// Append a command with the given payload (everything after tag + size)
    pub(crate) fn command(mut self, tag: u32, payload: &[u8]) -> Self {
        self.commands.extend_from_slice(&tag.to_le_bytes());
        self.commands
            .extend_from_slice(&(8 + payload.len() as u32).to_le_bytes());
        self.commands.extend_from_slice(payload);
        self.count += 1;
        self
    }

    pub(crate) fn encryption_32(self, cryptoff: u32, cryptsize: u32, cryptid: u32) -> Self {
        let payload = [cryptoff, cryptsize, cryptid]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect::<Vec<_>>();
        self.command(LC_ENCRYPTION_INFO, &payload)
    }

    pub(crate) fn encryption_64(self, cryptoff: u32, cryptsize: u32, cryptid: u32) -> Self {
        let payload = [cryptoff, cryptsize, cryptid, 0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect::<Vec<_>>();
        self.command(LC_ENCRYPTION_INFO_64, &payload)
    }

    pub(crate) fn segment_64(
        self,
        name: &str,
        vmaddr: u64,
        vmsize: u64,
        fileoff: u64,
        filesize: u64,
    ) -> Self {
        let mut payload = [0u8; 16].to_vec();
        payload[..name.len()].copy_from_slice(name.as_bytes());
        for v in [vmaddr, vmsize, fileoff, filesize] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        // maxprot, initprot, nsects, flags
        for v in [5u32, 5, 0, 0] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        self.command(LC_SEGMENT_64, &payload)
    }

    /// Override the declared command count
    pub(crate) fn ncmds(mut self, n: u32) -> Self {
        self.ncmds = Some(n);
        self
    }

    /// Override the declared command stream size
    pub(crate) fn sizeofcmds(mut self, n: u32) -> Self {
        self.sizeofcmds = Some(n);
        self
    }

    /// Zero-extend the image to at least `len` bytes
    pub(crate) fn pad_to(mut self, len: usize) -> Self {
        self.min_len = self.min_len.max(len);
        self
    }

    /// Write `data` at `offset` once the image is laid out
    pub(crate) fn fill(mut self, offset: usize, data: &[u8]) -> Self {
        self.fills.push((offset, data.to_vec()));
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let magic = if self.is_64bit { MH_MAGIC_64 } else { MH_MAGIC };
        let fields = [
            magic,
            0x0100000C, // CPU_TYPE_ARM64
            0,
            2, // MH_EXECUTE
            self.ncmds.unwrap_or(self.count),
            self.sizeofcmds.unwrap_or(self.commands.len() as u32),
            0x00200085,
        ];
        let mut out: Vec<u8> = fields.iter().flat_map(|v| v.to_le_bytes()).collect();
        if self.is_64bit {
            out.extend_from_slice(&0u32.to_le_bytes());
        }
        out.extend_from_slice(&self.commands);
        if out.len() < self.min_len {
            out.resize(self.min_len, 0);
        }
        for (offset, data) in self.fills {
            if out.len() < offset + data.len() {
                out.resize(offset + data.len(), 0);
            }
            out[offset..offset + data.len()].copy_from_slice(&data);
        }
        out
    }
}
