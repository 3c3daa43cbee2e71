//! Chunk streams
//!
//! A chunk is a named byte stream stored as a chain of blocks. Writers append
//! to the chain through the package's allocator; readers follow `next` links.
//! Both pass the stream through the package's compression filter.
//!
//! Writers hold `&mut Package` and readers `&Package`, so the borrow checker
//! guarantees no stream outlives its package and no reader observes a chunk
//! while a writer is mid-way through it.

pub mod reader;
pub mod writer;

pub use reader::ChunkReader;
pub use writer::ChunkWriter;
