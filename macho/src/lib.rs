//! Mach-O parsing and encrypted segment patching for unseal
//!
//! Binaries installed from the application store carry an encryption load
//! command (`LC_ENCRYPTION_INFO` or `LC_ENCRYPTION_INFO_64`) whose range is
//! ciphertext on disk. The loader hands a running process plaintext pages for
//! that range, so a live image of the binary is enough to rebuild a plaintext
//! file: this crate parses the on-disk image, checks that its layout matches
//! the live one, and copies the plaintext over.
//!
//! - [`header`] - fixed-size header, word size from the magic
//! - [`commands`] - load command walker and tag-keyed decoders
//! - [`image`] - owned raw image and the [`LiveImage`] trait
//! - [`patch`] - the decrypt-and-patch pass
//!
//! Only thin little-endian images are understood.

pub mod addr;
pub mod binary;
pub mod commands;
pub mod error;
pub mod header;
pub mod image;
pub mod patch;

mod reader;

#[cfg(test)]
mod testutil;

pub use addr::{FileOffset, LiveAddress};
pub use binary::MachO;
pub use commands::{Command, CommandKind, EncryptionInfo, LoadRecord, Segment};
pub use error::{ParseError, ParseResult, PatchError, PatchResult, Side};
pub use header::{Header, WordSize, is_macho};
pub use image::{LiveImage, RawImage, SliceImage};
pub use patch::{DecryptedRange, Outcome, decrypt, decrypt_image};
