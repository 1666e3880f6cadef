//! A hardlink of an internal symlink moves with the file the symlink points at.

use std::fs;
use std::os::unix::fs::{MetadataExt, symlink};
use std::sync::Arc;
use tempfile::tempdir;

use tier_move::fs_ops::NeverInUse;
use tier_move::{
    CacheMode, LedgerKind, MoveOptions, Mover, ProcessingLedger, Share, StorageLocation, Topology,
    migrate_share,
};

#[test]
fn hardlinked_symlink_moves_with_its_target() {
    let td = tempdir().unwrap();
    let mut t = Topology::new();
    let disk = t.add_disk(StorageLocation::disk("disk1", td.path().join("disk1")));
    let cache = t.add_pool(StorageLocation::pool("cache", td.path().join("cache")));
    let mut share = Share::new("media");
    share.use_cache = CacheMode::Yes;
    share.cache_pool = Some("cache".into());
    let share = t.add_share(share);
    fs::create_dir_all(disk.root()).unwrap();

    let src = cache.root().join("media");
    fs::create_dir_all(&src).unwrap();
    fs::write(src.join("real"), b"payload").unwrap();
    symlink("real", src.join("s1")).unwrap();
    fs::hard_link(src.join("s1"), src.join("s2")).unwrap();

    let mover = Mover::new(MoveOptions {
        dry_run: false,
        remove_source: true,
        workers: 1,
    })
    .with_probe(Arc::new(NeverInUse));
    let ledger = ProcessingLedger::new();
    let summary = migrate_share(&t, &share, &mover, &ledger).unwrap();
    assert_eq!(summary.discovered, 1);
    assert_eq!(summary.dropped, 0);
    assert_eq!(summary.moved, 3);
    assert_eq!(summary.failed, 0);

    let dest = disk.root().join("media");
    assert_eq!(fs::read(dest.join("real")).unwrap(), b"payload");
    assert!(fs::symlink_metadata(dest.join("s1")).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(dest.join("s1")).unwrap(), dest.join("real"));
    let s1 = fs::symlink_metadata(dest.join("s1")).unwrap();
    let s2 = fs::symlink_metadata(dest.join("s2")).unwrap();
    assert!(s2.file_type().is_symlink());
    assert_eq!(s1.ino(), s2.ino());

    for name in ["real", "s1", "s2"] {
        assert!(fs::symlink_metadata(src.join(name)).is_err(), "{name} left on cache");
    }
    assert_eq!(ledger.count(LedgerKind::HardlinkCreated), 1);
    assert_eq!(ledger.count(LedgerKind::SourceRemoved), 3);
}
