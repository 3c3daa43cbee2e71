#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use savepack::{Compression, OpenMode, Package, PackageOptions};
use std::collections::BTreeMap;

#[derive(Arbitrary, Debug)]
enum Op {
    Write { name: u8, data: Vec<u8> },
    Delete { name: u8 },
    Commit,
    Reopen,
}

// Random operation sequences must keep the package consistent and in step
// with a plain map
fuzz_target!(|ops: Vec<Op>| {
    let dir = match tempfile::TempDir::new() {
        Ok(d) => d,
        Err(_) => return,
    };
    let path = dir.path().join("save.cs");
    let options = PackageOptions::new()
        .with_compression(Compression::None)
        .with_sync(false)
        .with_lock(false);

    let mut committed: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut model = committed.clone();
    let mut pkg = Package::open_with(&path, OpenMode::Create, options.clone()).unwrap();
    pkg.commit().unwrap();

    for op in ops.into_iter().take(64) {
        match op {
            Op::Write { name, data } => {
                let name = format!("c{}", name % 8);
                pkg.write_chunk(&name, &data).unwrap();
                model.insert(name, data);
            }
            Op::Delete { name } => {
                let name = format!("c{}", name % 8);
                pkg.delete_chunk(&name);
                model.remove(&name);
            }
            Op::Commit => {
                pkg.commit().unwrap();
                committed = model.clone();
            }
            Op::Reopen => {
                // abandon uncommitted work, as a crash would
                pkg.abort();
                drop(pkg);
                pkg = Package::open_with(&path, OpenMode::ReadWrite, options.clone()).unwrap();
                model = committed.clone();
            }
        }
        pkg.fsck().unwrap();
    }

    assert_eq!(pkg.list_chunks(), model.keys().cloned().collect::<Vec<_>>());
    for (name, data) in &model {
        assert_eq!(&pkg.read_chunk(name).unwrap(), data);
    }
});
