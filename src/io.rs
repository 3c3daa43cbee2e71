//! Disk I/O for package files
//!
//! All methods take `&self`: `&File` implements `Read`, `Write` and `Seek`,
//! which lets several chunk readers share one handle. Callers are single
//! threaded and always seek before each transfer.

use crate::error::{PackageError, Result};
use crate::header::{BlockHeader, BlockOffset, FileHeader, BLOCK_HEADER_SIZE, FILE_HEADER_SIZE};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Locked, disk-backed package storage
#[derive(Debug)]
pub struct PackageFile {
    file: File,
    path: PathBuf,
}

impl PackageFile {
    /// Create (or truncate) a package file and lock it for writing
    ///
    /// An existing file is only emptied once the lock is held.
    pub fn create<P: AsRef<Path>>(path: P, lock: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let package_file = PackageFile {
            file,
            path: path.as_ref().to_path_buf(),
        };
        if lock {
            package_file.lock(true)?;
        }
        package_file.set_len(0)?;
        Ok(package_file)
    }

    /// Open an existing package file
    ///
    /// Writable opens take an exclusive lock, read-only opens a shared one.
    pub fn open<P: AsRef<Path>>(path: P, writable: bool, lock: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(&path)?;

        let package_file = PackageFile {
            file,
            path: path.as_ref().to_path_buf(),
        };
        if lock {
            package_file.lock(writable)?;
        }
        Ok(package_file)
    }

    fn lock(&self, exclusive: bool) -> Result<()> {
        // UFCS: std::fs::File grew inherent locking methods with other signatures
        let res = if exclusive {
            FileExt::try_lock_exclusive(&self.file)
        } else {
            FileExt::try_lock_shared(&self.file)
        };
        res.map_err(|e| {
            if e.kind() == fs2::lock_contended_error().kind() {
                PackageError::Locked(self.path.clone())
            } else {
                PackageError::Io(e)
            }
        })
    }

    /// Physical length of the file
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Read and validate the file header
    pub fn read_header(&self) -> Result<FileHeader> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = Vec::with_capacity(FILE_HEADER_SIZE as usize);
        file.take(FILE_HEADER_SIZE as u64).read_to_end(&mut buffer)?;
        FileHeader::from_bytes(&buffer)
    }

    pub fn write_header(&self, header: &FileHeader) -> Result<()> {
        self.write_at(0, &header.to_bytes())
    }

    pub fn read_block_header(&self, at: BlockOffset) -> Result<BlockHeader> {
        let mut buffer = [0u8; BLOCK_HEADER_SIZE as usize];
        self.read_at(at.get() as u64, &mut buffer)?;
        Ok(BlockHeader::from_bytes(&buffer))
    }

    pub fn write_block_header(&self, at: BlockOffset, header: &BlockHeader) -> Result<()> {
        self.write_at(at.get() as u64, &header.to_bytes())
    }

    /// Fill `buf` from `offset`; running into EOF means a block is cut short
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => PackageError::BlockPastEof,
            _ => PackageError::Io(e),
        })
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Durability barrier: data written so far reaches the disk
    pub fn sync_data(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Cut (or extend) the file to its logical length
    pub fn set_len(&self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }
}
