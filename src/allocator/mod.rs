//! Block allocation for package files
//!
//! Blocks are variable-length, so the allocator hands out *positions* and
//! lets chunk writers grow the block they are filling:
//! - [`free_list`] - first-fit free-space map with coalescing
//! - [`block_map`] - in-memory map of live blocks and their chain links

pub mod block_map;
pub mod free_list;

use crate::error::Result;
use crate::header::BlockOffset;

/// Smallest free region worth reusing for a new block
///
/// Anything shorter stays stranded instead of being handed out.
pub const MIN_REUSABLE_BLOCK: u32 = 16;

/// Block allocator trait
///
/// Spans passed to [`extend_block`](BlockAllocator::extend_block) are payload
/// sizes; spans passed to [`free_block`](BlockAllocator::free_block) include
/// the block header.
pub trait BlockAllocator {
    /// Reserve room for a new block header and return where it lives
    ///
    /// Fails when the file has no room left below the 4 GiB offset limit.
    fn alloc_block(&mut self) -> Result<BlockOffset>;

    /// Grow the block at `at` (currently `size` payload bytes) by up to `by`
    ///
    /// Returns how many bytes were granted; zero means the block cannot grow
    /// in place and the caller must start a new one. Growth at the end of
    /// the file stops at the offset limit.
    fn extend_block(&mut self, at: BlockOffset, size: u32, by: u32) -> u32;

    /// Return `span` bytes starting at `at` to free space
    fn free_block(&mut self, at: BlockOffset, span: u32);

    /// Logical length of the file
    fn file_len(&self) -> u32;
}
