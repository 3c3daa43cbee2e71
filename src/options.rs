//! Package configuration

use crate::compression::Compression;
use crate::error::{PackageError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a package file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read an existing package; nothing is ever written
    ReadOnly,
    /// Modify an existing package
    ReadWrite,
    /// Start a new, empty package, replacing any file at the path
    Create,
}

impl OpenMode {
    /// Map the `(writable, create_empty)` flag pair
    ///
    /// # Panics
    ///
    /// When `create_empty` is set without `writable`.
    pub fn from_flags(writable: bool, create_empty: bool) -> Self {
        assert!(
            writable || !create_empty,
            "an empty package must be opened writable"
        );
        match (writable, create_empty) {
            (_, true) => OpenMode::Create,
            (true, false) => OpenMode::ReadWrite,
            (false, false) => OpenMode::ReadOnly,
        }
    }

    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::ReadOnly)
    }
}

/// Package options
///
/// # Examples
///
/// ```
/// use savepack::{Compression, PackageOptions};
///
/// let options = PackageOptions::from_toml_str(
///     r#"
///     sync = false
///     compression = { method = "zstd", level = 5 }
///     "#,
/// )
/// .unwrap();
/// assert_eq!(options.compression, Compression::Zstd { level: 5 });
/// assert!(options.lock);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageOptions {
    /// Compression applied to every chunk
    pub compression: Compression,

    /// Flush data to disk before and after repointing the header on commit
    ///
    /// Turning this off keeps the write ordering but a system crash may then
    /// lose the last commit or leave it half written.
    pub sync: bool,

    /// Take an advisory lock on the save file while it is open
    pub lock: bool,
}

impl Default for PackageOptions {
    fn default() -> Self {
        PackageOptions {
            compression: Compression::default(),
            sync: true,
            lock: true,
        }
    }
}

impl PackageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    /// Parse options from a TOML document; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| {
            PackageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid package options: {}", e),
            ))
        })
    }

    /// Load options from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PackageOptions::default();
        assert_eq!(options.compression, Compression::Zlib { level: 6 });
        assert!(options.sync);
        assert!(options.lock);
    }

    #[test]
    fn test_builder_setters() {
        let options = PackageOptions::new()
            .with_compression(Compression::None)
            .with_sync(false)
            .with_lock(false);
        assert_eq!(options.compression, Compression::None);
        assert!(!options.sync);
        assert!(!options.lock);
    }

    #[test]
    fn test_partial_toml() {
        let options = PackageOptions::from_toml_str("lock = false").unwrap();
        assert!(!options.lock);
        assert!(options.sync);
        assert_eq!(options.compression, Compression::default());
    }

    #[test]
    fn test_bad_toml() {
        let err = PackageOptions::from_toml_str("sync = \"sometimes\"").unwrap_err();
        assert!(err.to_string().contains("invalid package options"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.toml");
        std::fs::write(&path, "compression = { method = \"none\" }\n").unwrap();
        let options = PackageOptions::load(&path).unwrap();
        assert_eq!(options.compression, Compression::None);
    }

    #[test]
    fn test_open_mode_flags() {
        assert_eq!(OpenMode::from_flags(false, false), OpenMode::ReadOnly);
        assert_eq!(OpenMode::from_flags(true, false), OpenMode::ReadWrite);
        assert_eq!(OpenMode::from_flags(true, true), OpenMode::Create);
        assert!(!OpenMode::ReadOnly.is_writable());
        assert!(OpenMode::Create.is_writable());
    }

    #[test]
    #[should_panic(expected = "writable")]
    fn test_create_requires_writable() {
        OpenMode::from_flags(false, true);
    }
}
