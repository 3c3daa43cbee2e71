//! On-disk structures: file header, block header and block offsets
//!
//! ```text
//! offset 0   FileHeader (12 bytes)
//!            magic "DCSS" u32 LE | version u8 | padding [u8; 3] | start u32 LE
//! offset 12+ blocks, each:
//!            len u32 LE | next u32 LE | len bytes of payload
//! ```
//!
//! A chunk is a chain of blocks linked through `next`; a `next` of zero ends
//! the chain. All integers are little-endian.

use crate::error::{PackageError, Result};
use std::fmt;
use std::mem::size_of;

/// "DCSS" read as a little-endian u32
pub const MAGIC: u32 = 0x5353_4344;

/// Directory format written by this crate
pub const CURRENT_VERSION: FormatVersion = FormatVersion::V1;

/// Size of the file header on disk
pub const FILE_HEADER_SIZE: u32 = 12;

/// Size of a block header on disk
pub const BLOCK_HEADER_SIZE: u32 = (2 * size_of::<u32>()) as u32;

/// Position of a block inside the package file
///
/// Offset 0 holds the file header and so can never start a block; it is used
/// as the chain terminator ([`BlockOffset::END`]) and as the head of an empty
/// chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockOffset(u32);

impl BlockOffset {
    /// End of a chain
    pub const END: BlockOffset = BlockOffset(0);

    pub const fn new(offset: u32) -> Self {
        BlockOffset(offset)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    pub const fn is_end(self) -> bool {
        self.0 == 0
    }

    /// Start of this block's payload
    pub const fn payload(self) -> u64 {
        self.0 as u64 + BLOCK_HEADER_SIZE as u64
    }
}

impl fmt::Display for BlockOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directory encoding, selected once per file from the header version byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    /// Legacy: fixed 4-byte chunk names. Read-only.
    V0,
    /// Length-prefixed chunk names
    V1,
}

impl FormatVersion {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FormatVersion::V0),
            1 => Ok(FormatVersion::V1),
            other => Err(PackageError::UnsupportedVersion(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FormatVersion::V0 => 0,
            FormatVersion::V1 => 1,
        }
    }
}

/// Package file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u8,
    /// Head of the directory chunk
    pub start: BlockOffset,
}

impl FileHeader {
    /// Header pointing at a freshly written directory
    pub fn new(start: BlockOffset) -> Self {
        FileHeader {
            magic: MAGIC,
            version: CURRENT_VERSION.as_u8(),
            start,
        }
    }

    pub fn to_bytes(&self) -> [u8; FILE_HEADER_SIZE as usize] {
        let mut buf = [0u8; FILE_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4] = self.version;
        // bytes 5..8 are padding and stay zero
        buf[8..12].copy_from_slice(&self.start.get().to_le_bytes());
        buf
    }

    /// Parse a header read from the start of the file
    ///
    /// `data` is whatever could be read, so a short slice means the file
    /// itself is short.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(PackageError::EmptyFile);
        }
        if data.len() < FILE_HEADER_SIZE as usize {
            return Err(PackageError::TruncatedHeader);
        }
        let data = &data[..FILE_HEADER_SIZE as usize];
        if data.iter().all(|&b| b == 0) {
            return Err(PackageError::EmptyFile);
        }

        let header = FileHeader {
            magic: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            version: data[4],
            start: BlockOffset::new(u32::from_le_bytes([data[8], data[9], data[10], data[11]])),
        };
        header.validate()?;
        Ok(header)
    }

    /// Check the magic number
    ///
    /// The version is checked separately through [`FileHeader::format`] so
    /// that the caller picks the directory decoder at the same time.
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(PackageError::InvalidMagic);
        }
        Ok(())
    }

    pub fn format(&self) -> Result<FormatVersion> {
        FormatVersion::from_u8(self.version)
    }
}

/// Header in front of every block's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Payload length, header excluded
    pub len: u32,
    pub next: BlockOffset,
}

impl BlockHeader {
    pub fn new(len: u32, next: BlockOffset) -> Self {
        BlockHeader { len, next }
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE as usize] {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.next.get().to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8; BLOCK_HEADER_SIZE as usize]) -> Self {
        BlockHeader {
            len: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            next: BlockOffset::new(u32::from_le_bytes([data[4], data[5], data[6], data[7]])),
        }
    }

    /// Bytes the block occupies on disk, header included
    pub fn span(&self) -> u32 {
        self.len + BLOCK_HEADER_SIZE
    }
}
