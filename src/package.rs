//! Save package
//!
//! A package is one save file holding named chunks. Writes go to free space
//! only; the previous state stays intact on disk until [`Package::commit`]
//! repoints the file header at a freshly written directory. Superseded chains
//! are reclaimed only after that, so a crash at any point leaves either the
//! old or the new committed state.

use crate::allocator::block_map::BlockMap;
use crate::allocator::free_list::FreeList;
use crate::allocator::BlockAllocator;
use crate::chunk::{ChunkReader, ChunkWriter};
use crate::directory::{Directory, DIRECTORY_CHUNK};
use crate::error::{PackageError, Result};
use crate::header::{BlockOffset, FileHeader, FormatVersion, BLOCK_HEADER_SIZE, FILE_HEADER_SIZE};
use crate::io::PackageFile;
use crate::options::{OpenMode, PackageOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Lifecycle of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    /// On-disk header matches the in-memory directory
    Clean,
    /// Chunks were written or deleted since the last commit
    Dirty,
    /// Discarded, or a write failed; nothing more reaches the disk
    Aborted,
}

/// Snapshot of allocator bookkeeping
///
/// Free space is only tracked for writable packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageStats {
    /// Logical length of the file
    pub file_len: u64,
    pub free_bytes: u64,
    pub free_regions: usize,
    pub live_blocks: usize,
    /// Named chunks, the directory excluded
    pub chunks: usize,
    /// Superseded chains waiting for the next commit
    pub pending_chains: usize,
}

/// An open save package
#[derive(Debug)]
pub struct Package {
    file: Option<PackageFile>,
    path: PathBuf,
    mode: OpenMode,
    options: PackageOptions,
    state: PackageState,

    directory: Directory,

    /// Free space and logical file length
    pub(crate) free_list: FreeList,

    /// Every block of every finished chain, by offset
    pub(crate) block_map: BlockMap,

    /// Heads of chains that become free after the next commit
    unlinked: Vec<BlockOffset>,
}

impl Package {
    /// Open the package at `path` with default options
    ///
    /// `create_empty` starts a new package, replacing any existing file.
    ///
    /// # Panics
    ///
    /// When `create_empty` is set without `writable`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use savepack::Package;
    ///
    /// let mut save = Package::open("morgue/Bob.cs", true, true)?;
    /// save.write_chunk("you", b"level 27 gargoyle")?;
    /// save.commit()?;
    /// # Ok::<(), savepack::PackageError>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, writable: bool, create_empty: bool) -> Result<Self> {
        Self::open_with(
            path,
            OpenMode::from_flags(writable, create_empty),
            PackageOptions::default(),
        )
    }

    /// Open the package at `path`
    ///
    /// Fails with [`PackageError::Locked`] when another process has it open
    /// for writing, or has it open at all and `mode` is writable.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        options: PackageOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = match mode {
            OpenMode::Create => PackageFile::create(&path, options.lock)?,
            _ => PackageFile::open(&path, mode.is_writable(), options.lock)?,
        };

        let mut pkg = Package {
            file: Some(file),
            path,
            mode,
            options,
            state: PackageState::Clean,
            directory: Directory::new(),
            free_list: FreeList::new(),
            block_map: BlockMap::new(),
            unlinked: Vec::new(),
        };

        if mode == OpenMode::Create {
            // the first commit writes a header and an empty directory
            pkg.state = PackageState::Dirty;
            info!("Created package {}", pkg.path.display());
        } else {
            // nothing may be written back over a file that failed to load
            let res = pkg.load();
            pkg.latch(res)?;
        }
        Ok(pkg)
    }

    fn load(&mut self) -> Result<()> {
        let file = self.file()?;
        let header = file.read_header()?;
        let version = header.format()?;
        let len = file.len()?;
        let file_len = u32::try_from(len).map_err(|_| {
            PackageError::Inconsistent(format!("file is {} bytes, past the offset range", len))
        })?;
        self.free_list = FreeList::all_free(file_len);

        self.check_offset(header.start)?;
        let directory = Directory::decode(version, self.reader_at(header.start)?)?;
        self.directory = directory;
        self.directory.insert(DIRECTORY_CHUNK, header.start);

        if self.is_writable() {
            let file = self.file.as_ref().ok_or_else(closed)?;
            for (_, head) in self.directory.iter() {
                trace_chain(file, head, &mut self.free_list, &mut self.block_map)?;
            }
            if version == FormatVersion::V0 {
                warn!(
                    "Package {} uses the legacy format, the next commit upgrades it",
                    self.path.display()
                );
            }
        }

        info!(
            "Opened package {} (format v{}, {} chunks, {} bytes)",
            self.path.display(),
            version.as_u8(),
            self.directory.names().len(),
            file_len
        );
        Ok(())
    }

    pub fn options(&self) -> &PackageOptions {
        &self.options
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn state(&self) -> PackageState {
        self.state
    }

    pub fn is_writable(&self) -> bool {
        self.mode.is_writable()
    }

    pub fn is_aborted(&self) -> bool {
        self.state == PackageState::Aborted
    }

    /// Abort the package if `res` is a failure
    pub(crate) fn latch<T>(&mut self, res: Result<T>) -> Result<T> {
        if let Err(e) = &res {
            if !self.is_aborted() {
                error!("Package {} aborted: {}", self.path.display(), e);
            }
            self.state = PackageState::Aborted;
        }
        res
    }

    pub(crate) fn file(&self) -> Result<&PackageFile> {
        self.file.as_ref().ok_or_else(closed)
    }

    pub(crate) fn file_len(&self) -> u64 {
        self.free_list.file_len() as u64
    }

    pub(crate) fn check_offset(&self, at: BlockOffset) -> Result<()> {
        if at.get() as u64 > self.file_len() {
            return Err(PackageError::InvalidOffset(at.get()));
        }
        Ok(())
    }

    /// Start writing chunk `name`, replacing any chunk of that name once done
    ///
    /// # Panics
    ///
    /// When the package is read-only, or `name` is empty or longer than 255
    /// bytes.
    pub fn writer(&mut self, name: &str) -> Result<ChunkWriter<'_>> {
        assert!(self.is_writable(), "writing a chunk to a read-only package");
        assert!(!name.is_empty(), "the empty chunk name is reserved");
        ChunkWriter::new(self, name)
    }

    /// Reader for chunk `name`, or `None` if there is no such chunk
    pub fn reader(&self, name: &str) -> Result<Option<ChunkReader<'_>>> {
        match self.chunk_head(name) {
            Some(head) => {
                debug!("chunk_reader({}): starting", name);
                self.reader_at(head).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Reader for the chain starting at `head`
    pub(crate) fn reader_at(&self, head: BlockOffset) -> Result<ChunkReader<'_>> {
        ChunkReader::at(self, head)
    }

    /// Write `data` as the whole of chunk `name`
    pub fn write_chunk(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let mut writer = self.writer(name)?;
        writer.write(data)?;
        writer.finish()
    }

    /// Read the whole of chunk `name`
    pub fn read_chunk(&self, name: &str) -> Result<Vec<u8>> {
        ChunkReader::open(self, name)?.read_all()
    }

    /// First block of chunk `name`; [`BlockOffset::END`] for an empty chunk
    pub fn chunk_head(&self, name: &str) -> Option<BlockOffset> {
        if name == DIRECTORY_CHUNK {
            return None;
        }
        self.directory.get(name)
    }

    pub fn has_chunk(&self, name: &str) -> bool {
        self.chunk_head(name).is_some()
    }

    /// Names of all chunks, sorted
    pub fn list_chunks(&self) -> Vec<String> {
        self.directory.names()
    }

    /// Remove chunk `name`; its blocks are reclaimed after the next commit
    ///
    /// # Panics
    ///
    /// When the package is read-only or `name` is empty.
    pub fn delete_chunk(&mut self, name: &str) {
        assert!(self.is_writable(), "deleting a chunk from a read-only package");
        assert!(!name.is_empty(), "the empty chunk name is reserved");
        if self.is_aborted() {
            return;
        }
        self.free_chunk(name);
        if self.directory.remove(name).is_some() {
            debug!("delete_chunk({})", name);
        }
    }

    /// Called by a finished writer: link the new chain under `name`
    pub(crate) fn finish_chunk(&mut self, name: &str, head: BlockOffset) {
        self.free_chunk(name);
        self.directory.insert(name, head);
        self.state = PackageState::Dirty;
    }

    /// Queue the current chain of `name` for reclamation
    fn free_chunk(&mut self, name: &str) {
        if let Some(head) = self.directory.get(name) {
            if !head.is_end() {
                self.unlinked.push(head);
            }
            self.state = PackageState::Dirty;
        }
    }

    /// Make every finished chunk durable
    ///
    /// Writes the directory to free space, syncs, repoints the file header at
    /// it and syncs again. Only then are superseded chains reclaimed. Does
    /// nothing on a clean or aborted package.
    ///
    /// # Panics
    ///
    /// When the package is read-only.
    pub fn commit(&mut self) -> Result<()> {
        assert!(self.is_writable(), "committing a read-only package");
        if self.state != PackageState::Dirty {
            return Ok(());
        }
        let res = self.commit_inner();
        self.latch(res)
    }

    fn commit_inner(&mut self) -> Result<()> {
        let start = self.write_directory()?;

        if self.options.sync {
            self.file()?.sync_data()?;
        }
        self.file()?.write_header(&FileHeader::new(start))?;
        if self.options.sync {
            self.file()?.sync_data()?;
        }

        let pending = self.unlinked.len();
        let released = self.collect_blocks()?;
        self.state = PackageState::Clean;
        debug!(
            "commit: directory at {}, {} chains ({} bytes) reclaimed",
            start, pending, released
        );
        Ok(())
    }

    /// Store the directory as the empty-named chunk; returns its head
    fn write_directory(&mut self) -> Result<BlockOffset> {
        let encoded = self.directory.encode();
        let mut writer = ChunkWriter::new(self, DIRECTORY_CHUNK)?;
        writer.write(&encoded)?;
        writer.finish()?;
        Ok(self
            .directory
            .get(DIRECTORY_CHUNK)
            .unwrap_or(BlockOffset::END))
    }

    fn collect_blocks(&mut self) -> Result<u64> {
        let mut released = 0;
        while let Some(head) = self.unlinked.pop() {
            released += self.block_map.release_chain(head, &mut self.free_list)?;
        }
        Ok(released)
    }

    /// Discard everything since the last commit
    ///
    /// Later writes and commits do nothing and readers see empty chunks.
    pub fn abort(&mut self) {
        if !self.is_aborted() {
            info!("Aborting package {}", self.path.display());
        }
        self.state = PackageState::Aborted;
    }

    /// Abort and delete the save file
    pub fn unlink(mut self) -> Result<()> {
        self.abort();
        self.file = None;
        std::fs::remove_file(&self.path)?;
        info!("Unlinked package {}", self.path.display());
        Ok(())
    }

    /// Commit, trim free space at the end of the file and close it
    ///
    /// Dropping a package does the same but can only log failures.
    pub fn close(mut self) -> Result<()> {
        let res = self.finalize();
        self.file = None;
        res
    }

    fn finalize(&mut self) -> Result<()> {
        if self.file.is_none() || !self.is_writable() || self.is_aborted() {
            return Ok(());
        }
        self.commit()?;
        let res = self.trim();
        self.latch(res)
    }

    /// Cut free space off the end of the file
    fn trim(&self) -> Result<()> {
        let file = self.file()?;
        let len = self.file_len();
        // truncating touches mtime even when the length stays
        if file.len()? != len {
            debug!("trimming {} to {} bytes", self.path.display(), len);
            file.set_len(len)?;
        }
        Ok(())
    }

    /// Check that live blocks and free space tile the file exactly
    ///
    /// A read-only package has no block map, so its chains are traced from
    /// disk instead.
    pub fn fsck(&self) -> Result<()> {
        if !self.is_writable() {
            let file = self.file()?;
            let mut free_list = FreeList::all_free(self.free_list.file_len());
            let mut block_map = BlockMap::new();
            for (_, head) in self.directory.iter() {
                trace_chain(file, head, &mut free_list, &mut block_map)?;
            }
            return Ok(());
        }

        // every live block belongs to a chain we can name
        let mut reachable = 0;
        let heads = self.directory.iter().map(|(_, head)| head);
        for head in heads.chain(self.unlinked.iter().copied()) {
            let mut at = head;
            while !at.is_end() {
                let header = self.block_map.get(at).ok_or_else(|| {
                    PackageError::Inconsistent(format!("chain block {} is not live", at))
                })?;
                reachable += 1;
                if reachable > self.block_map.len() {
                    return Err(PackageError::Inconsistent(format!(
                        "block {} is shared by several chains",
                        at
                    )));
                }
                at = header.next;
            }
        }
        if reachable != self.block_map.len() {
            return Err(PackageError::Inconsistent(format!(
                "{} live blocks but {} reachable",
                self.block_map.len(),
                reachable
            )));
        }

        let mut spans: Vec<(u32, u32)> = self
            .free_list
            .regions()
            .map(|(at, len)| (at.get(), len))
            .chain(
                self.block_map
                    .iter()
                    .map(|(at, header)| (at.get(), header.span())),
            )
            .collect();
        spans.sort_unstable();

        let mut pos = FILE_HEADER_SIZE;
        for (at, span) in spans {
            if at != pos {
                return Err(PackageError::Inconsistent(format!(
                    "expected a block or free region at {}, found one at {}",
                    pos, at
                )));
            }
            pos = at
                .checked_add(span)
                .ok_or_else(|| PackageError::Inconsistent(format!("span at {} overflows", at)))?;
        }
        if pos != self.free_list.file_len() {
            return Err(PackageError::Inconsistent(format!(
                "blocks end at {}, file length is {}",
                pos,
                self.free_list.file_len()
            )));
        }
        Ok(())
    }

    pub fn stats(&self) -> PackageStats {
        PackageStats {
            file_len: self.file_len(),
            free_bytes: self.free_list.free_bytes(),
            free_regions: self.free_list.region_count(),
            live_blocks: self.block_map.len(),
            chunks: self.directory.names().len(),
            pending_chains: self.unlinked.len(),
        }
    }
}

impl Drop for Package {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!("Failed to close package {}: {}", self.path.display(), e);
        }
    }
}

fn closed() -> PackageError {
    PackageError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "package file is closed",
    ))
}

/// Walk the chain at `head` on disk, claiming each block from `free_list`
fn trace_chain(
    file: &PackageFile,
    head: BlockOffset,
    free_list: &mut FreeList,
    block_map: &mut BlockMap,
) -> Result<()> {
    let file_len = free_list.file_len() as u64;
    let mut at = head;
    while !at.is_end() {
        if at.get() as u64 > file_len {
            return Err(PackageError::InvalidOffset(at.get()));
        }
        let header = file.read_block_header(at)?;
        let end = at.get() as u64 + BLOCK_HEADER_SIZE as u64 + header.len as u64;
        if end > file_len {
            return Err(PackageError::BlockPastEof);
        }
        free_list.claim(at, header.span())?;
        block_map.insert(at, header);
        at = header.next;
    }
    Ok(())
}
