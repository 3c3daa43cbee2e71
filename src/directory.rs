//! Chunk directory: name -> first block of the chunk's chain
//!
//! The directory is itself stored as a chunk, under the empty name, and the
//! file header points at its first block. Record layouts:
//!
//! ```text
//! v0 (read only): name [u8; 4] NUL padded | start u32 LE
//! v1:             name_len u8 | name | start u32 LE
//! ```
//!
//! The stored directory never lists its own (empty-named) entry; that one is
//! restored from the file header at load time.

use crate::error::{PackageError, Result};
use crate::header::{BlockOffset, FormatVersion};
use std::collections::BTreeMap;
use std::io::{ErrorKind, Read};

/// Name of the chunk holding the directory
pub const DIRECTORY_CHUNK: &str = "";

/// Longest chunk name the v1 record can hold
pub const MAX_NAME_LEN: usize = 255;

const V0_NAME_LEN: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directory {
    entries: BTreeMap<String, BlockOffset>,
}

impl Directory {
    pub fn new() -> Self {
        Directory {
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<BlockOffset> {
        self.entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Point `name` at a chain head, returning the chain it replaced
    pub fn insert(&mut self, name: &str, head: BlockOffset) -> Option<BlockOffset> {
        self.entries.insert(name.to_string(), head)
    }

    pub fn remove(&mut self, name: &str) -> Option<BlockOffset> {
        self.entries.remove(name)
    }

    /// Every entry, the directory's own included
    pub fn iter(&self) -> impl Iterator<Item = (&str, BlockOffset)> + '_ {
        self.entries.iter().map(|(name, &at)| (name.as_str(), at))
    }

    /// Chunk names visible to callers, in sorted order
    pub fn names(&self) -> Vec<String> {
        self.entries
            .keys()
            .filter(|name| !name.is_empty())
            .cloned()
            .collect()
    }

    /// Serialize in the current (v1) format
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, at) in self.entries.iter().filter(|(name, _)| !name.is_empty()) {
            debug_assert!(name.len() <= MAX_NAME_LEN);
            out.push(name.len() as u8);
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&at.get().to_le_bytes());
        }
        out
    }

    /// Parse a stored directory with the decoder for `version`
    pub fn decode<R: Read>(version: FormatVersion, source: R) -> Result<Self> {
        match version {
            FormatVersion::V0 => decode_v0(source),
            FormatVersion::V1 => decode_v1(source),
        }
    }
}

fn decode_v0<R: Read>(mut source: R) -> Result<Directory> {
    let mut directory = Directory::new();
    let mut record = [0u8; V0_NAME_LEN + 4];
    loop {
        match read_full(&mut source, &mut record)? {
            0 => break,
            n if n < record.len() => return Err(PackageError::TruncatedDirectory),
            _ => {}
        }
        let name_end = record[..V0_NAME_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(V0_NAME_LEN);
        let name = chunk_name(&record[..name_end])?;
        let start = u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
        directory.entries.insert(name, BlockOffset::new(start));
    }
    Ok(directory)
}

fn decode_v1<R: Read>(mut source: R) -> Result<Directory> {
    let mut directory = Directory::new();
    let mut name_len = [0u8; 1];
    loop {
        if read_full(&mut source, &mut name_len)? == 0 {
            break;
        }
        let mut name = vec![0u8; name_len[0] as usize];
        if read_full(&mut source, &mut name)? != name.len() {
            return Err(PackageError::TruncatedDirectory);
        }
        let mut start = [0u8; 4];
        if read_full(&mut source, &mut start)? != start.len() {
            return Err(PackageError::TruncatedDirectory);
        }
        directory
            .entries
            .insert(chunk_name(&name)?, BlockOffset::new(u32::from_le_bytes(start)));
    }
    Ok(directory)
}

fn chunk_name(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| PackageError::Inconsistent("chunk name is not valid UTF-8".into()))
}

/// Read until `buf` is full or the source ends; returns bytes read
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Directory {
        let mut dir = Directory::new();
        dir.insert("you", BlockOffset::new(12));
        dir.insert("D:1", BlockOffset::new(400));
        dir.insert("chr", BlockOffset::END);
        dir.insert(DIRECTORY_CHUNK, BlockOffset::new(9000));
        dir
    }

    #[test]
    fn test_v1_layout() {
        let mut dir = Directory::new();
        dir.insert("ab", BlockOffset::new(0x10));
        assert_eq!(dir.encode(), vec![2, b'a', b'b', 0x10, 0, 0, 0]);
    }

    #[test]
    fn test_v1_round_trip_skips_own_entry() {
        let dir = sample();
        let decoded = Directory::decode(FormatVersion::V1, dir.encode().as_slice()).unwrap();

        assert!(!decoded.contains(DIRECTORY_CHUNK));
        assert_eq!(decoded.get("you"), Some(BlockOffset::new(12)));
        assert_eq!(decoded.get("D:1"), Some(BlockOffset::new(400)));
        assert_eq!(decoded.get("chr"), Some(BlockOffset::END));
        assert_eq!(decoded.names(), vec!["D:1", "chr", "you"]);
    }

    #[test]
    fn test_v0_records() {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"you\0");
        raw.extend_from_slice(&12u32.to_le_bytes());
        raw.extend_from_slice(b"lvl1");
        raw.extend_from_slice(&300u32.to_le_bytes());

        let dir = Directory::decode(FormatVersion::V0, raw.as_slice()).unwrap();
        assert_eq!(dir.get("you"), Some(BlockOffset::new(12)));
        assert_eq!(dir.get("lvl1"), Some(BlockOffset::new(300)));
        assert_eq!(dir.names().len(), 2);
    }

    #[test]
    fn test_truncated_records() {
        let encoded = sample().encode();
        for cut in [1, 3, encoded.len() - 1] {
            let err = Directory::decode(FormatVersion::V1, &encoded[..cut]).unwrap_err();
            assert!(matches!(err, PackageError::TruncatedDirectory), "cut at {}", cut);
        }

        let err = Directory::decode(FormatVersion::V0, &b"you\0\x0c\0"[..]).unwrap_err();
        assert!(matches!(err, PackageError::TruncatedDirectory));
    }

    #[test]
    fn test_empty_directory() {
        let dir = Directory::decode(FormatVersion::V1, &[][..]).unwrap();
        assert!(dir.names().is_empty());
        assert!(Directory::new().encode().is_empty());
    }

    #[test]
    fn test_insert_returns_replaced_chain() {
        let mut dir = Directory::new();
        assert_eq!(dir.insert("a", BlockOffset::new(12)), None);
        assert_eq!(dir.insert("a", BlockOffset::new(50)), Some(BlockOffset::new(12)));
        assert_eq!(dir.remove("a"), Some(BlockOffset::new(50)));
        assert!(!dir.contains("a"));
    }
}
