#![no_main]
use libfuzzer_sys::fuzz_target;
use savepack::{Compression, OpenMode, Package, PackageOptions};
use std::io::Write;

// Arbitrary bytes as a save file: opening and reading may fail, never panic
fuzz_target!(|data: &[u8]| {
    let mut file = match tempfile::NamedTempFile::new() {
        Ok(f) => f,
        Err(_) => return,
    };
    if file.write_all(data).is_err() {
        return;
    }

    for compression in [Compression::None, Compression::zlib(), Compression::zstd()] {
        let options = PackageOptions::new()
            .with_compression(compression)
            .with_sync(false)
            .with_lock(false);

        if let Ok(pkg) = Package::open_with(file.path(), OpenMode::ReadOnly, options.clone()) {
            for name in pkg.list_chunks() {
                let _ = pkg.read_chunk(&name);
            }
            let _ = pkg.fsck();
        }

        // a writable load that succeeds has already traced every chain
        if let Ok(mut pkg) = Package::open_with(file.path(), OpenMode::ReadWrite, options) {
            pkg.fsck().expect("traced package must be consistent");
            pkg.abort();
        }
    }
});
