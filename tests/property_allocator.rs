//! Property-based tests for allocator correctness
//!
//! Uses proptest to drive the free list and whole packages through random
//! operation sequences and check their invariants after every step.

use proptest::prelude::*;
use savepack::allocator::free_list::FreeList;
use savepack::allocator::{BlockAllocator, MIN_REUSABLE_BLOCK};
use savepack::header::{BlockOffset, BLOCK_HEADER_SIZE, FILE_HEADER_SIZE};
use savepack::{Compression, OpenMode, Package, PackageOptions};
use std::collections::BTreeMap;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum AllocOp {
    Alloc(u32),
    Grow(usize, u32),
    Free(usize),
}

fn alloc_op() -> impl Strategy<Value = AllocOp> {
    prop_oneof![
        3 => (1u32..300).prop_map(AllocOp::Alloc),
        1 => (any::<usize>(), 1u32..300).prop_map(|(i, by)| AllocOp::Grow(i, by)),
        2 => any::<usize>().prop_map(AllocOp::Free),
    ]
}

/// Live blocks and free regions must tile `[header, file_len)` exactly, with
/// no two free regions touching and none at the end of the file
fn check_tiling(list: &FreeList, live: &[(BlockOffset, u32)]) -> Result<(), TestCaseError> {
    let mut spans: Vec<(u32, u32, bool)> = live
        .iter()
        .map(|&(at, span)| (at.get(), span, false))
        .chain(list.regions().map(|(at, len)| (at.get(), len, true)))
        .collect();
    spans.sort_unstable();

    let mut pos = FILE_HEADER_SIZE;
    let mut prev_free = false;
    for (at, span, free) in spans {
        prop_assert_eq!(at, pos, "gap or overlap at {}", at);
        prop_assert!(!(free && prev_free), "adjacent free regions at {}", at);
        prop_assert!(span > 0);
        pos = at + span;
        prev_free = free;
    }
    prop_assert_eq!(pos, list.file_len());
    prop_assert!(!prev_free, "free region at the end of the file");
    Ok(())
}

proptest! {
    #[test]
    fn prop_blocks_and_free_space_tile_the_file(
        ops in prop::collection::vec(alloc_op(), 1..120)
    ) {
        let mut list = FreeList::new();
        let mut live: Vec<(BlockOffset, u32)> = Vec::new();

        for op in ops {
            match op {
                AllocOp::Alloc(size) => {
                    let at = list.alloc_block().unwrap();
                    let granted = list.extend_block(at, 0, size);
                    prop_assert!(granted > 0 && granted <= size);
                    live.push((at, BLOCK_HEADER_SIZE + granted));
                }
                AllocOp::Grow(i, by) if !live.is_empty() => {
                    let i = i % live.len();
                    let (at, span) = live[i];
                    let granted = list.extend_block(at, span - BLOCK_HEADER_SIZE, by);
                    prop_assert!(granted <= by);
                    live[i].1 += granted;
                }
                AllocOp::Free(i) if !live.is_empty() => {
                    let (at, span) = live.swap_remove(i % live.len());
                    list.free_block(at, span);
                }
                _ => {}
            }
            check_tiling(&list, &live)?;
        }

        // releasing everything leaves just the header
        for (at, span) in live.drain(..) {
            list.free_block(at, span);
        }
        prop_assert_eq!(list.file_len(), FILE_HEADER_SIZE);
        prop_assert!(list.is_empty());
    }

    #[test]
    fn prop_alloc_is_first_fit_above_minimum(
        sizes in prop::collection::vec(1u32..100, 2..40),
        frees in prop::collection::vec(any::<bool>(), 2..40)
    ) {
        let mut list = FreeList::new();
        let mut live = Vec::new();
        for &size in &sizes {
            let at = list.alloc_block().unwrap();
            let granted = list.extend_block(at, 0, size);
            live.push((at, BLOCK_HEADER_SIZE + granted));
        }
        // keep the last block so freed regions stay inside the file
        let last = live.len() - 1;
        for (i, &(at, span)) in live.iter().enumerate() {
            if i != last && frees.get(i).copied().unwrap_or(false) {
                list.free_block(at, span);
            }
        }

        let expected = list
            .regions()
            .find(|&(_, len)| len >= MIN_REUSABLE_BLOCK)
            .map(|(at, _)| at)
            .unwrap_or(BlockOffset::new(list.file_len()));
        let file_len = list.file_len();

        let at = list.alloc_block().unwrap();
        prop_assert_eq!(at, expected);
        if at.get() == file_len {
            prop_assert_eq!(list.file_len(), file_len + BLOCK_HEADER_SIZE);
        } else {
            prop_assert_eq!(list.file_len(), file_len);
        }
    }
}

#[derive(Debug, Clone)]
enum PackageOp {
    Write(u8, Vec<u8>),
    Delete(u8),
    Commit,
}

fn package_op() -> impl Strategy<Value = PackageOp> {
    prop_oneof![
        4 => (0u8..6, prop::collection::vec(any::<u8>(), 0..3000))
            .prop_map(|(name, data)| PackageOp::Write(name, data)),
        1 => (0u8..6).prop_map(PackageOp::Delete),
        2 => Just(PackageOp::Commit),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_package_matches_model(
        ops in prop::collection::vec(package_op(), 1..40),
        zlib in any::<bool>()
    ) {
        let compression = if zlib { Compression::zlib() } else { Compression::None };
        let options = PackageOptions::new()
            .with_compression(compression)
            .with_sync(false);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("save.cs");

        let mut model: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        {
            let mut pkg = Package::open_with(&path, OpenMode::Create, options.clone()).unwrap();
            for op in ops {
                match op {
                    PackageOp::Write(name, data) => {
                        let name = format!("chunk{}", name);
                        pkg.write_chunk(&name, &data).unwrap();
                        model.insert(name, data);
                    }
                    PackageOp::Delete(name) => {
                        let name = format!("chunk{}", name);
                        pkg.delete_chunk(&name);
                        model.remove(&name);
                    }
                    PackageOp::Commit => {
                        pkg.commit().unwrap();
                        prop_assert_eq!(pkg.stats().pending_chains, 0);
                    }
                }
                pkg.fsck().unwrap();
            }
            pkg.close().unwrap();
        }

        let pkg = Package::open_with(&path, OpenMode::ReadWrite, options).unwrap();
        let names: Vec<String> = model.keys().cloned().collect();
        prop_assert_eq!(pkg.list_chunks(), names);
        for (name, data) in &model {
            prop_assert_eq!(&pkg.read_chunk(name).unwrap(), data);
        }
        pkg.fsck().unwrap();
    }
}

#[test]
fn test_deleted_neighbours_coalesce_in_either_order() {
    let mut results = Vec::new();
    for order in [["a", "b"], ["b", "a"]] {
        let dir = TempDir::new().unwrap();
        let options = PackageOptions::new()
            .with_compression(Compression::None)
            .with_sync(false);
        let mut pkg =
            Package::open_with(dir.path().join("save.cs"), OpenMode::Create, options).unwrap();

        pkg.write_chunk("a", &[1u8; 100]).unwrap();
        pkg.write_chunk("b", &[2u8; 100]).unwrap();
        pkg.write_chunk("c", &[3u8; 10]).unwrap();
        pkg.commit().unwrap();
        for name in order {
            pkg.delete_chunk(name);
        }
        pkg.commit().unwrap();

        let stats = pkg.stats();
        // "a" and "b" form one region; the old directory is the other
        assert_eq!(stats.free_regions, 2);
        assert_eq!(stats.free_bytes, 2 * 108 + 26);
        pkg.fsck().unwrap();
        results.push(stats);
    }
    assert_eq!(results[0], results[1]);
}
