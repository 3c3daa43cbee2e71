//! Error types for save packages

use std::path::PathBuf;
use thiserror::Error;

/// Broad class of a [`PackageError`]
///
/// Game code uses this to decide between abandoning the save (corruption),
/// telling the player (lock conflict), or reporting a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The file is damaged or not a save package; do not try to repair it.
    Corruption,
    /// The operating system or a codec failed.
    Io,
    /// Another process holds the save open.
    Lock,
}

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("save file is empty")]
    EmptyFile,

    #[error("save file corrupted -- header truncated")]
    TruncatedHeader,

    #[error("save file corrupted -- not a DCSS save file")]
    InvalidMagic,

    #[error("save file uses an unknown format {0}")]
    UnsupportedVersion(u8),

    #[error("save file corrupted -- invalid offset {0}")]
    InvalidOffset(u32),

    #[error("save file corrupted -- block past eof")]
    BlockPastEof,

    #[error("save file corrupted -- overlapping blocks at {0}")]
    OverlappingBlocks(u32),

    #[error("save file corrupted -- truncated directory")]
    TruncatedDirectory,

    #[error("save file corrupted -- chunk \"{0}\" missing")]
    MissingChunk(String),

    #[error("save file corrupted -- block truncated")]
    BlockTruncated,

    #[error("save file decompression failed: {0}")]
    Decompression(String),

    #[error("save file inconsistent: {0}")]
    Inconsistent(String),

    #[error("save file too large")]
    TooLarge,

    #[error("save file compression failed: {0}")]
    Compression(String),

    #[error("Another game is already in progress using this save ({0})")]
    Locked(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl PackageError {
    /// Which class of failure this is
    pub fn category(&self) -> ErrorCategory {
        match self {
            PackageError::Locked(_) => ErrorCategory::Lock,
            PackageError::Io(_) | PackageError::Compression(_) | PackageError::TooLarge => {
                ErrorCategory::Io
            }
            _ => ErrorCategory::Corruption,
        }
    }

    pub fn is_corruption(&self) -> bool {
        self.category() == ErrorCategory::Corruption
    }
}

pub type Result<T> = std::result::Result<T, PackageError>;

impl From<std::io::Error> for PackageError {
    /// Unwraps package errors that went through an `io::Read`/`io::Write`
    /// adapter so they keep their category
    fn from(err: std::io::Error) -> Self {
        let kind = err.kind();
        if err.get_ref().map_or(false, |inner| inner.is::<PackageError>()) {
            if let Some(Ok(inner)) = err.into_inner().map(|e| e.downcast::<PackageError>()) {
                return *inner;
            }
            return PackageError::Io(kind.into());
        }
        PackageError::Io(err)
    }
}

impl From<PackageError> for std::io::Error {
    fn from(err: PackageError) -> Self {
        match err {
            PackageError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}
