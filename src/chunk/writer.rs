//! Chunk writer: append-only stream onto a chain of blocks

use crate::allocator::BlockAllocator;
use crate::compression::{Transform, STREAM_BUFFER_SIZE};
use crate::directory::MAX_NAME_LEN;
use crate::error::Result;
use crate::header::{BlockHeader, BlockOffset};
use crate::package::Package;
use std::io;
use tracing::{debug, error};

/// Writes one chunk
///
/// Bytes go through the package's compression filter, are staged, and are
/// then appended to the chain: the tail block grows in place while the
/// allocator allows it, otherwise a new block is linked on.
///
/// The chunk becomes visible under its name once the writer is finished,
/// either through [`finish`](ChunkWriter::finish) or when it is dropped.
/// Any chunk it replaces is queued and only reclaimed after the next commit.
pub struct ChunkWriter<'a> {
    pkg: &'a mut Package,
    name: String,
    transform: Box<dyn Transform>,

    /// Filter output waiting to be appended
    staged: Vec<u8>,
    staged_len: usize,

    first_block: BlockOffset,
    cur_block: BlockOffset,
    /// Payload bytes written to `cur_block` so far
    block_len: u32,

    finished: bool,
}

impl<'a> ChunkWriter<'a> {
    /// Start writing chunk `name` in `pkg`
    ///
    /// # Panics
    ///
    /// When `name` is longer than 255 bytes.
    pub(crate) fn new(pkg: &'a mut Package, name: &str) -> Result<Self> {
        assert!(
            name.len() <= MAX_NAME_LEN,
            "chunk name is {} bytes, the limit is {}",
            name.len(),
            MAX_NAME_LEN
        );
        debug!("chunk_writer({}): starting", name);

        let transform = pkg.options().compression.encoder()?;
        Ok(ChunkWriter {
            pkg,
            name: name.to_string(),
            transform,
            staged: vec![0u8; STREAM_BUFFER_SIZE],
            staged_len: 0,
            first_block: BlockOffset::END,
            cur_block: BlockOffset::END,
            block_len: 0,
            finished: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append `data` to the chunk
    ///
    /// Does nothing once the package is aborted. A failure aborts the package.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.pkg.is_aborted() {
            return Ok(());
        }
        let res = self.compress(data);
        self.pkg.latch(res)
    }

    /// Complete the chunk and link it into the directory
    pub fn finish(mut self) -> Result<()> {
        self.finalize()
    }

    fn compress(&mut self, data: &[u8]) -> Result<()> {
        let mut input = data;
        while !input.is_empty() {
            if self.staged_len == self.staged.len() {
                self.flush_staged()?;
            }
            let step = self
                .transform
                .feed(input, &mut self.staged[self.staged_len..])?;
            input = &input[step.consumed..];
            self.staged_len += step.produced;
        }
        Ok(())
    }

    fn flush_staged(&mut self) -> Result<()> {
        let len = self.staged_len;
        self.staged_len = 0;
        let staged = std::mem::take(&mut self.staged);
        let res = self.raw_write(&staged[..len]);
        self.staged = staged;
        res
    }

    fn raw_write(&mut self, data: &[u8]) -> Result<()> {
        let mut data = data;
        while !data.is_empty() {
            let want = u32::try_from(data.len()).unwrap_or(u32::MAX);
            let mut space = if self.cur_block.is_end() {
                0
            } else {
                self.pkg
                    .free_list
                    .extend_block(self.cur_block, self.block_len, want)
            };

            if space == 0 {
                let next = self.pkg.free_list.alloc_block()?;
                space = self.pkg.free_list.extend_block(next, 0, want);
                debug_assert!(space > 0, "fresh block at {} cannot grow", next);
                if !self.cur_block.is_end() {
                    self.finish_block(next)?;
                }
                self.cur_block = next;
                if self.first_block.is_end() {
                    self.first_block = next;
                }
                self.block_len = 0;
            }

            let (piece, rest) = data.split_at(space as usize);
            let pos = self.cur_block.payload() + self.block_len as u64;
            self.pkg.file()?.write_at(pos, piece)?;
            self.block_len += space;
            data = rest;
        }
        Ok(())
    }

    /// Write the tail block's header, linking it to `next`
    fn finish_block(&mut self, next: BlockOffset) -> Result<()> {
        let header = BlockHeader::new(self.block_len, next);
        self.pkg.file()?.write_block_header(self.cur_block, &header)?;
        self.pkg.block_map.insert(self.cur_block, header);
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.finished = true;
        if self.pkg.is_aborted() {
            return Ok(());
        }
        let res = self.drain();
        self.pkg.latch(res)
    }

    fn drain(&mut self) -> Result<()> {
        loop {
            if self.staged_len == self.staged.len() {
                self.flush_staged()?;
            }
            let step = self.transform.finish(&mut self.staged[self.staged_len..])?;
            self.staged_len += step.produced;
            if step.done {
                break;
            }
        }
        self.flush_staged()?;

        if !self.cur_block.is_end() {
            self.finish_block(BlockOffset::END)?;
        }
        debug!(
            "chunk_writer({}): closing, head at {}",
            self.name, self.first_block
        );
        self.pkg.finish_chunk(&self.name, self.first_block);
        Ok(())
    }
}

impl Drop for ChunkWriter<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.finalize() {
            error!("chunk_writer({}): failed to finish chunk: {}", self.name, e);
        }
    }
}

impl io::Write for ChunkWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ChunkWriter::write(self, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
