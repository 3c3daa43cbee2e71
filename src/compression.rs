//! Transparent compression for chunk streams
//!
//! Chunk writers push their bytes through a [`Transform`] before they reach
//! the block chain, and chunk readers pull block bytes back through the
//! matching inverse transform.
//!
//! **Design**:
//! - Streaming, push style: `feed` moves as much as fits from input to output
//! - `finish` drains whatever the filter still holds at end of input
//! - One filter instance per chunk; the stream is self-terminating for zlib
//!   and zstd, so readers know where a chunk ends without a length field
//! - The method is not recorded in the file: open with the one you wrote with

use crate::error::{PackageError, Result};
use flate2::{FlushCompress, FlushDecompress, Status};
use serde::{Deserialize, Serialize};
use zstd::stream::raw::{InBuffer, Operation, OutBuffer};

/// Staging buffer size between a filter and the block chain
pub const STREAM_BUFFER_SIZE: usize = 32 * 1024;

/// Compression method for chunk payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Compression {
    /// Store chunk bytes as they are
    None,
    /// zlib-wrapped deflate, the stock save format
    Zlib {
        #[serde(default = "default_zlib_level")]
        level: u32,
    },
    /// Zstandard frame
    Zstd {
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
}

fn default_zlib_level() -> u32 {
    6
}

fn default_zstd_level() -> i32 {
    3
}

impl Default for Compression {
    fn default() -> Self {
        Compression::zlib()
    }
}

impl Compression {
    pub fn zlib() -> Self {
        Compression::Zlib {
            level: default_zlib_level(),
        }
    }

    pub fn zstd() -> Self {
        Compression::Zstd {
            level: default_zstd_level(),
        }
    }

    /// Fresh compressing filter for one chunk
    pub fn encoder(&self) -> Result<Box<dyn Transform>> {
        Ok(match *self {
            Compression::None => Box::new(Identity),
            Compression::Zlib { level } => Box::new(ZlibEncoder(flate2::Compress::new(
                flate2::Compression::new(level.min(9)),
                true,
            ))),
            Compression::Zstd { level } => Box::new(ZstdEncoder(
                zstd::stream::raw::Encoder::new(level)
                    .map_err(|e| PackageError::Compression(format!("during init: {}", e)))?,
            )),
        })
    }

    /// Fresh decompressing filter for one chunk
    pub fn decoder(&self) -> Result<Box<dyn Transform>> {
        Ok(match *self {
            Compression::None => Box::new(Identity),
            Compression::Zlib { .. } => Box::new(ZlibDecoder(flate2::Decompress::new(true))),
            Compression::Zstd { .. } => Box::new(ZstdDecoder(
                zstd::stream::raw::Decoder::new()
                    .map_err(|e| PackageError::Decompression(format!("during init: {}", e)))?,
            )),
        })
    }
}

/// Progress made by one [`Transform`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Step {
    /// Input bytes used
    pub consumed: usize,
    /// Output bytes written
    pub produced: usize,
    /// The stream is complete; nothing more will be produced
    pub done: bool,
}

/// A streaming byte filter
pub trait Transform {
    /// Move bytes from `input` to `output`
    fn feed(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step>;

    /// Drain held state once input has run out
    ///
    /// Call repeatedly, with fresh output space, until `done` is set.
    /// Decoders fail here when their input stopped mid-stream.
    fn finish(&mut self, output: &mut [u8]) -> Result<Step>;
}

/// Pass-through filter for uncompressed packages
#[derive(Debug, Default)]
pub struct Identity;

impl Transform for Identity {
    fn feed(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step> {
        let n = input.len().min(output.len());
        output[..n].copy_from_slice(&input[..n]);
        Ok(Step {
            consumed: n,
            produced: n,
            done: false,
        })
    }

    fn finish(&mut self, _output: &mut [u8]) -> Result<Step> {
        Ok(Step {
            done: true,
            ..Step::default()
        })
    }
}

struct ZlibEncoder(flate2::Compress);

impl ZlibEncoder {
    fn run(&mut self, input: &[u8], output: &mut [u8], flush: FlushCompress) -> Result<Step> {
        let (before_in, before_out) = (self.0.total_in(), self.0.total_out());
        let status = self
            .0
            .compress(input, output, flush)
            .map_err(|e| PackageError::Compression(e.to_string()))?;
        Ok(Step {
            consumed: (self.0.total_in() - before_in) as usize,
            produced: (self.0.total_out() - before_out) as usize,
            done: status == Status::StreamEnd,
        })
    }
}

impl Transform for ZlibEncoder {
    fn feed(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step> {
        self.run(input, output, FlushCompress::None)
    }

    fn finish(&mut self, output: &mut [u8]) -> Result<Step> {
        self.run(&[], output, FlushCompress::Finish)
    }
}

struct ZlibDecoder(flate2::Decompress);

impl Transform for ZlibDecoder {
    fn feed(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step> {
        let (before_in, before_out) = (self.0.total_in(), self.0.total_out());
        let status = self
            .0
            .decompress(input, output, FlushDecompress::None)
            .map_err(|e| PackageError::Decompression(e.to_string()))?;
        Ok(Step {
            consumed: (self.0.total_in() - before_in) as usize,
            produced: (self.0.total_out() - before_out) as usize,
            done: status == Status::StreamEnd,
        })
    }

    fn finish(&mut self, output: &mut [u8]) -> Result<Step> {
        let step = self.feed(&[], output)?;
        if !step.done && step.produced == 0 {
            return Err(PackageError::BlockTruncated);
        }
        Ok(step)
    }
}

struct ZstdEncoder(zstd::stream::raw::Encoder<'static>);

impl Transform for ZstdEncoder {
    fn feed(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step> {
        let mut src = InBuffer::around(input);
        let mut dst = OutBuffer::around(output);
        self.0
            .run(&mut src, &mut dst)
            .map_err(|e| PackageError::Compression(e.to_string()))?;
        Ok(Step {
            consumed: src.pos(),
            produced: dst.pos(),
            done: false,
        })
    }

    fn finish(&mut self, output: &mut [u8]) -> Result<Step> {
        let mut dst = OutBuffer::around(output);
        let remaining = self
            .0
            .finish(&mut dst, true)
            .map_err(|e| PackageError::Compression(e.to_string()))?;
        Ok(Step {
            consumed: 0,
            produced: dst.pos(),
            done: remaining == 0,
        })
    }
}

struct ZstdDecoder(zstd::stream::raw::Decoder<'static>);

impl Transform for ZstdDecoder {
    fn feed(&mut self, input: &[u8], output: &mut [u8]) -> Result<Step> {
        let mut src = InBuffer::around(input);
        let mut dst = OutBuffer::around(output);
        // a zero hint means the frame is fully decoded and flushed
        let hint = self
            .0
            .run(&mut src, &mut dst)
            .map_err(|e| PackageError::Decompression(e.to_string()))?;
        Ok(Step {
            consumed: src.pos(),
            produced: dst.pos(),
            done: hint == 0,
        })
    }

    fn finish(&mut self, output: &mut [u8]) -> Result<Step> {
        let step = self.feed(&[], output)?;
        if !step.done && step.produced == 0 {
            return Err(PackageError::BlockTruncated);
        }
        Ok(step)
    }
}
