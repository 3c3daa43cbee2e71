//! Live block map
//!
//! Records `(len, next)` for every block that belongs to a finished chain, so
//! chains can be walked and released without touching the disk. This map is
//! the source of truth for live blocks during a writable session.

use crate::allocator::BlockAllocator;
use crate::error::{PackageError, Result};
use crate::header::{BlockHeader, BlockOffset};
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct BlockMap {
    blocks: BTreeMap<BlockOffset, BlockHeader>,
}

impl BlockMap {
    pub fn new() -> Self {
        BlockMap {
            blocks: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, at: BlockOffset, header: BlockHeader) {
        self.blocks.insert(at, header);
    }

    pub fn get(&self, at: BlockOffset) -> Option<&BlockHeader> {
        self.blocks.get(&at)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BlockOffset, &BlockHeader)> + '_ {
        self.blocks.iter().map(|(&at, header)| (at, header))
    }

    /// Walk the chain starting at `head`, dropping each block from the map
    /// and handing its span back to `allocator`
    ///
    /// Returns the number of bytes released.
    pub fn release_chain<A: BlockAllocator>(
        &mut self,
        head: BlockOffset,
        allocator: &mut A,
    ) -> Result<u64> {
        let mut at = head;
        let mut released = 0u64;
        while !at.is_end() {
            let header = self.blocks.remove(&at).ok_or_else(|| {
                PackageError::Inconsistent(format!("chain block {} is not live", at))
            })?;
            trace!("releasing block at {} size {}+header", at, header.len);
            allocator.free_block(at, header.span());
            released += header.span() as u64;
            at = header.next;
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::free_list::FreeList;
    use crate::header::FILE_HEADER_SIZE;

    #[test]
    fn test_release_chain_frees_every_block() {
        let mut list = FreeList::new();
        let mut map = BlockMap::new();

        // Two-block chain followed by an unrelated block
        let first = list.alloc_block().unwrap();
        list.extend_block(first, 0, 10);
        let second = list.alloc_block().unwrap();
        list.extend_block(second, 0, 20);
        let other = list.alloc_block().unwrap();
        list.extend_block(other, 0, 5);

        map.insert(first, BlockHeader::new(10, second));
        map.insert(second, BlockHeader::new(20, BlockOffset::END));
        map.insert(other, BlockHeader::new(5, BlockOffset::END));

        let released = map.release_chain(first, &mut list).unwrap();
        assert_eq!(released, 18 + 28);
        assert_eq!(map.len(), 1);
        assert_eq!(
            list.regions().collect::<Vec<_>>(),
            vec![(first, 46)]
        );

        map.release_chain(other, &mut list).unwrap();
        assert!(map.is_empty());
        assert_eq!(list.file_len(), FILE_HEADER_SIZE);
    }

    #[test]
    fn test_release_unknown_block() {
        let mut list = FreeList::new();
        let mut map = BlockMap::new();
        let err = map
            .release_chain(BlockOffset::new(12), &mut list)
            .unwrap_err();
        assert!(matches!(err, PackageError::Inconsistent(_)));
    }

    #[test]
    fn test_release_empty_chain() {
        let mut list = FreeList::new();
        let mut map = BlockMap::new();
        assert_eq!(map.release_chain(BlockOffset::END, &mut list).unwrap(), 0);
    }
}
