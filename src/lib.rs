//! Savepack: crash-safe save game packages
//!
//! A package is a single file holding named byte streams ("chunks"), such as
//! the player, each visited level and the message history. Chunks are written
//! and replaced independently; [`Package::commit`] makes all finished chunks
//! durable at once.
//!
//! ## Features
//!
//! - **Crash safety**: new data only ever goes to free space, and the file
//!   header is repointed after a sync barrier. A crash leaves the last commit.
//! - **Space reuse**: first-fit free list with coalescing, so a long game's
//!   save stays about as large as its live data.
//! - **Streaming compression**: zlib (default) or zstd per chunk, or none.
//! - **Process locking**: an advisory lock keeps two games off one save.
//! - **Legacy directories**: version 0 files can be read and are upgraded on
//!   the next commit.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use savepack::{OpenMode, Package, PackageOptions};
//! use std::io::Write;
//!
//! let options = PackageOptions::new();
//! let mut save = Package::open_with("Bob.cs", OpenMode::Create, options)?;
//!
//! let mut level = save.writer("D:1")?;
//! level.write_all(b"#####.....#####")?;
//! level.finish()?;
//! save.commit()?;
//!
//! assert_eq!(save.read_chunk("D:1")?, b"#####.....#####");
//! save.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ File header (12 bytes)                       │
//! │   magic "DCSS" | version | pad | directory   │
//! ├──────────────────────────────────────────────┤
//! │ Block: len u32 | next u32 | payload ...      │
//! │ Block ...                                    │
//! │ Free region ...                              │
//! │ Block (directory chunk, name "")             │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! - [`header`] - on-disk header and block header layout
//! - [`allocator`] - free list and live block map
//! - [`chunk`] - chunk writer and reader streams
//! - [`compression`] - streaming filters behind the [`Transform`] trait
//! - [`directory`] - chunk name table and its v0/v1 encodings
//! - [`package`] - the package itself and the commit protocol

pub mod allocator;
pub mod chunk;
pub mod compression;
pub mod directory;
pub mod error;
pub mod header;
pub mod io;
pub mod options;
pub mod package;

pub use chunk::{ChunkReader, ChunkWriter};
pub use compression::{Compression, Step, Transform};
pub use error::{ErrorCategory, PackageError, Result};
pub use header::{BlockOffset, FormatVersion};
pub use options::{OpenMode, PackageOptions};
pub use package::{Package, PackageState, PackageStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
