//! Chunk reader: byte stream over an existing chain of blocks

use crate::compression::{Transform, STREAM_BUFFER_SIZE};
use crate::error::{PackageError, Result};
use crate::header::{BlockOffset, BLOCK_HEADER_SIZE};
use crate::package::Package;
use std::io;
use tracing::debug;

/// Growth step of [`ChunkReader::read_all`]
const READ_ALL_STEP: usize = 1024;

/// Position inside a block chain
struct BlockCursor {
    next: BlockOffset,
    /// Payload bytes left in the current block
    left: u32,
    /// File position of the next payload byte
    pos: u64,
    /// Blocks visited, to stop on cyclic chains
    hops: u64,
}

impl BlockCursor {
    fn new(head: BlockOffset) -> Self {
        BlockCursor {
            next: head,
            left: 0,
            pos: 0,
            hops: 0,
        }
    }

    /// Read raw chain bytes; returns less than `buf.len()` only at chain end
    fn read(&mut self, pkg: &Package, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.left == 0 {
                if self.next.is_end() {
                    break;
                }
                // a chain can't have more blocks than fit in the file
                self.hops += 1;
                if self.hops > pkg.file_len() / BLOCK_HEADER_SIZE as u64 {
                    return Err(PackageError::OverlappingBlocks(self.next.get()));
                }
                pkg.check_offset(self.next)?;
                let header = pkg.file()?.read_block_header(self.next)?;
                self.pos = self.next.payload();
                self.left = header.len;
                self.next = header.next;
                continue;
            }

            let n = (buf.len() - filled).min(self.left as usize);
            pkg.file()?.read_at(self.pos, &mut buf[filled..filled + n])?;
            filled += n;
            self.pos += n as u64;
            self.left -= n as u32;
        }
        Ok(filled)
    }
}

/// Reads one chunk
///
/// Obtained from [`Package::reader`], or [`ChunkReader::open`] when a missing
/// chunk should be an error. Reading a block that ends before its declared
/// length, or a compressed stream that stops short, is corruption.
pub struct ChunkReader<'a> {
    pkg: &'a Package,
    cursor: BlockCursor,
    transform: Box<dyn Transform>,

    /// Raw chain bytes waiting for the filter
    input: Vec<u8>,
    in_pos: usize,
    in_len: usize,

    eof: bool,
}

impl<'a> ChunkReader<'a> {
    /// Reader over the chunk called `name`; fails if there is none
    pub fn open(pkg: &'a Package, name: &str) -> Result<Self> {
        let head = pkg
            .chunk_head(name)
            .ok_or_else(|| PackageError::MissingChunk(name.to_string()))?;
        debug!("chunk_reader({}): starting", name);
        Self::at(pkg, head)
    }

    /// Reader over the chain starting at `head`
    ///
    /// An empty chain is an empty chunk whatever the compression.
    pub(crate) fn at(pkg: &'a Package, head: BlockOffset) -> Result<Self> {
        let transform = pkg.options().compression.decoder()?;
        Ok(ChunkReader {
            pkg,
            cursor: BlockCursor::new(head),
            transform,
            input: vec![0u8; STREAM_BUFFER_SIZE],
            in_pos: 0,
            in_len: 0,
            eof: head.is_end(),
        })
    }

    /// Fill `buf` from the chunk
    ///
    /// Returns fewer than `buf.len()` bytes only at the end of the chunk, and
    /// 0 from then on. An aborted package reads as empty.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pkg.is_aborted() || self.eof || buf.is_empty() {
            return Ok(0);
        }

        let mut produced = 0;
        while produced < buf.len() {
            if self.in_pos == self.in_len {
                self.in_len = self.cursor.read(self.pkg, &mut self.input)?;
                self.in_pos = 0;
                if self.in_len == 0 {
                    let step = self.transform.finish(&mut buf[produced..])?;
                    produced += step.produced;
                    if step.done {
                        self.eof = true;
                        break;
                    }
                    continue;
                }
            }

            let step = self
                .transform
                .feed(&self.input[self.in_pos..self.in_len], &mut buf[produced..])?;
            self.in_pos += step.consumed;
            produced += step.produced;
            if step.done {
                self.eof = true;
                break;
            }
        }
        Ok(produced)
    }

    /// Append the rest of the chunk to `data`
    pub fn read_all_into(&mut self, data: &mut Vec<u8>) -> Result<()> {
        loop {
            let at = data.len();
            data.resize(at + READ_ALL_STEP, 0);
            let n = self.read(&mut data[at..])?;
            data.truncate(at + n);
            if n < READ_ALL_STEP {
                return Ok(());
            }
        }
    }

    /// The rest of the chunk
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.read_all_into(&mut data)?;
        Ok(data)
    }
}

impl io::Read for ChunkReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(ChunkReader::read(self, buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Compression;
    use crate::header::BlockHeader;
    use crate::options::{OpenMode, PackageOptions};
    use std::io::Read;
    use tempfile::TempDir;

    fn package(dir: &TempDir, compression: Compression) -> Package {
        let options = PackageOptions::new()
            .with_compression(compression)
            .with_sync(false);
        Package::open_with(dir.path().join("save.cs"), OpenMode::Create, options).unwrap()
    }

    #[test]
    fn test_small_reads_reassemble_chunk() {
        for compression in [Compression::None, Compression::zlib(), Compression::zstd()] {
            let dir = TempDir::new().unwrap();
            let mut pkg = package(&dir, compression);
            let data: Vec<u8> = (0..70_000u32).map(|i| (i % 253) as u8).collect();
            pkg.write_chunk("lvl", &data).unwrap();

            let mut reader = pkg.reader("lvl").unwrap().unwrap();
            let mut out = Vec::new();
            let mut piece = [0u8; 333];
            loop {
                let n = reader.read(&mut piece).unwrap();
                out.extend_from_slice(&piece[..n]);
                if n < piece.len() {
                    break;
                }
            }
            assert_eq!(out, data, "{:?}", compression);
            assert_eq!(reader.read(&mut piece).unwrap(), 0);
        }
    }

    #[test]
    fn test_read_all_exact_multiple_of_step() {
        let dir = TempDir::new().unwrap();
        let mut pkg = package(&dir, Compression::None);
        pkg.write_chunk("even", &[9u8; 2 * READ_ALL_STEP]).unwrap();

        let data = pkg.reader("even").unwrap().unwrap().read_all().unwrap();
        assert_eq!(data.len(), 2 * READ_ALL_STEP);
    }

    #[test]
    fn test_io_read_adapter() {
        let dir = TempDir::new().unwrap();
        let mut pkg = package(&dir, Compression::zlib());
        pkg.write_chunk("msg", b"You feel a strange sense of loss.").unwrap();

        let mut text = String::new();
        pkg.reader("msg")
            .unwrap()
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "You feel a strange sense of loss.");
    }

    #[test]
    fn test_missing_chunk() {
        let dir = TempDir::new().unwrap();
        let pkg = package(&dir, Compression::None);

        assert!(pkg.reader("nope").unwrap().is_none());
        assert!(matches!(
            ChunkReader::open(&pkg, "nope"),
            Err(PackageError::MissingChunk(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_block_cut_short_is_corruption() {
        let dir = TempDir::new().unwrap();
        let mut pkg = package(&dir, Compression::None);
        pkg.write_chunk("cut", &[1u8; 100]).unwrap();
        let head = pkg.chunk_head("cut").unwrap();

        // claim more payload than the file holds
        pkg.file()
            .unwrap()
            .write_block_header(head, &BlockHeader::new(5000, BlockOffset::END))
            .unwrap();

        let err = pkg.reader("cut").unwrap().unwrap().read_all().unwrap_err();
        assert!(matches!(err, PackageError::BlockPastEof));
    }

    #[test]
    fn test_truncated_compressed_stream() {
        let dir = TempDir::new().unwrap();
        let mut pkg = package(&dir, Compression::zlib());
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 31 % 256) as u8).collect();
        pkg.write_chunk("cut", &data).unwrap();
        let head = pkg.chunk_head("cut").unwrap();
        let len = pkg.block_map.get(head).unwrap().len;

        // shorten the only block so the zlib stream stops mid-way
        pkg.file()
            .unwrap()
            .write_block_header(head, &BlockHeader::new(len / 2, BlockOffset::END))
            .unwrap();

        let err = pkg.reader("cut").unwrap().unwrap().read_all().unwrap_err();
        assert!(matches!(err, PackageError::BlockTruncated));
    }

    #[test]
    fn test_cyclic_chain_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut pkg = package(&dir, Compression::None);
        pkg.write_chunk("loop", &[7u8; 64]).unwrap();
        let head = pkg.chunk_head("loop").unwrap();

        pkg.file()
            .unwrap()
            .write_block_header(head, &BlockHeader::new(64, head))
            .unwrap();

        let err = pkg.reader("loop").unwrap().unwrap().read_all().unwrap_err();
        assert!(matches!(err, PackageError::OverlappingBlocks(_)));
    }

    #[test]
    fn test_aborted_package_reads_empty() {
        let dir = TempDir::new().unwrap();
        let mut pkg = package(&dir, Compression::None);
        pkg.write_chunk("x", b"data").unwrap();
        pkg.abort();

        let mut buf = [0u8; 4];
        assert_eq!(pkg.reader("x").unwrap().unwrap().read(&mut buf).unwrap(), 0);
    }
}
