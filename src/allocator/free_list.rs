//! First-fit free-space map
//!
//! Free regions are kept in a `BTreeMap` keyed by offset, which gives the
//! offset-ordered iteration first-fit needs and cheap neighbour lookups for
//! coalescing. Invariants:
//! - regions never overlap and never touch each other
//! - freeing never leaves a region at the end of the file (the file shrinks
//!   instead); a map rebuilt at load time may still end in one

use crate::allocator::{BlockAllocator, MIN_REUSABLE_BLOCK};
use crate::error::{PackageError, Result};
use crate::header::{BlockOffset, BLOCK_HEADER_SIZE, FILE_HEADER_SIZE};
use std::collections::BTreeMap;
use tracing::trace;

/// Free regions of a package file plus its logical length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeList {
    /// offset -> region length in bytes
    regions: BTreeMap<u32, u32>,

    /// Logical end of file
    file_len: u32,
}

impl FreeList {
    /// Allocator for a new, empty package (just the file header)
    pub fn new() -> Self {
        FreeList {
            regions: BTreeMap::new(),
            file_len: FILE_HEADER_SIZE,
        }
    }

    /// Allocator for a file of `file_len` bytes where nothing is claimed yet
    ///
    /// Loading starts here and [`claim`](FreeList::claim)s every live block.
    pub fn all_free(file_len: u32) -> Self {
        let mut regions = BTreeMap::new();
        if file_len > FILE_HEADER_SIZE {
            regions.insert(FILE_HEADER_SIZE, file_len - FILE_HEADER_SIZE);
        }
        FreeList { regions, file_len }
    }

    /// Mark `[at, at + span)` as used by a live block
    ///
    /// The span must lie entirely inside one free region; anything else means
    /// two chains share bytes, or a block points outside the file.
    pub fn claim(&mut self, at: BlockOffset, span: u32) -> Result<()> {
        let start = at.get();
        let end = start
            .checked_add(span)
            .ok_or(PackageError::OverlappingBlocks(start))?;

        let (&region_start, &region_len) = self
            .regions
            .range(..=start)
            .next_back()
            .ok_or(PackageError::OverlappingBlocks(start))?;
        let region_end = region_start + region_len;
        if region_end < end {
            return Err(PackageError::OverlappingBlocks(start));
        }

        self.regions.remove(&region_start);
        if region_start < start {
            self.regions.insert(region_start, start - region_start);
        }
        if region_end > end {
            self.regions.insert(end, region_end - end);
        }
        Ok(())
    }

    /// Total bytes in free regions
    pub fn free_bytes(&self) -> u64 {
        self.regions.values().map(|&len| len as u64).sum()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Free regions as `(offset, length)` in offset order
    pub fn regions(&self) -> impl Iterator<Item = (BlockOffset, u32)> + '_ {
        self.regions
            .iter()
            .map(|(&at, &len)| (BlockOffset::new(at), len))
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockAllocator for FreeList {
    fn alloc_block(&mut self) -> Result<BlockOffset> {
        // First fit by offset. Best fit was measured to waste more space on
        // save-shaped workloads.
        let reusable = self
            .regions
            .iter()
            .find(|(_, &len)| len >= MIN_REUSABLE_BLOCK)
            .map(|(&at, &len)| (at, len));

        if let Some((at, len)) = reusable {
            trace!("reusing free region at {} size {}", at, len);
            self.regions.remove(&at);
            self.regions
                .insert(at + BLOCK_HEADER_SIZE, len - BLOCK_HEADER_SIZE);
            return Ok(BlockOffset::new(at));
        }

        // a fresh block needs its header plus at least one payload byte
        let at = self.file_len;
        if at.checked_add(BLOCK_HEADER_SIZE + 1).is_none() {
            return Err(PackageError::TooLarge);
        }
        self.file_len += BLOCK_HEADER_SIZE;
        Ok(BlockOffset::new(at))
    }

    fn extend_block(&mut self, at: BlockOffset, size: u32, by: u32) -> u32 {
        let end = at.get() + size + BLOCK_HEADER_SIZE;
        if end == self.file_len {
            let by = by.min(u32::MAX - self.file_len);
            self.file_len += by;
            return by;
        }

        let free = match self.regions.remove(&end) {
            Some(free) => free,
            None => return 0,
        };
        trace!("extending block at {} by {} of {} free", at, by, free);
        if free <= by {
            return free;
        }
        self.regions.insert(end + by, free - by);
        by
    }

    fn free_block(&mut self, at: BlockOffset, span: u32) {
        let mut start = at.get();
        let mut len = span;
        debug_assert!(start >= FILE_HEADER_SIZE);
        debug_assert!(start + len <= self.file_len);

        if let Some((&prev, &prev_len)) = self.regions.range(..start).next_back() {
            debug_assert!(prev + prev_len <= start);
            if prev + prev_len == start {
                start = prev;
                len += prev_len;
                self.regions.remove(&prev);
            }
        }

        if let Some((&next, &next_len)) = self.regions.range(start..).next() {
            debug_assert!(next >= start + len);
            if next == start + len {
                len += next_len;
                self.regions.remove(&next);
            }
        }

        if start + len == self.file_len {
            self.file_len -= len;
        } else {
            self.regions.insert(start, len);
        }
    }

    fn file_len(&self) -> u32 {
        self.file_len
    }
}
