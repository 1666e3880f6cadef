//! The binary end to end: config file in, files moved, ledger out.

use assert_cmd::Command;
use std::fs;
use tempfile::tempdir;

fn bin() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tier_move"));
    cmd.env_remove("TIER_MOVE_CONFIG");
    cmd
}

#[test]
fn print_config_succeeds() {
    bin().arg("--print-config").assert().success();
}

#[test]
fn help_lists_overrides() {
    let out = bin().arg("--help").output().unwrap();
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    for flag in ["--config", "--share", "--dry-run", "--keep-source", "--ledger"] {
        assert!(text.contains(flag), "missing {flag} in help");
    }
}

#[test]
fn missing_config_fails() {
    let td = tempdir().unwrap();
    bin()
        .arg("--config")
        .arg(td.path().join("nope.xml"))
        .assert()
        .failure();
}

#[test]
fn moves_share_and_writes_ledger() {
    let td = tempdir().unwrap();
    let root = td.path();
    let cache = root.join("cache");
    let disk = root.join("disk1");
    fs::create_dir_all(cache.join("media/Shows")).unwrap();
    fs::create_dir_all(&disk).unwrap();
    fs::write(cache.join("media/Shows/pilot.mkv"), b"pilot").unwrap();

    let cfg = root.join("config.xml");
    fs::write(
        &cfg,
        format!(
            r#"<config>
  <log_level>quiet</log_level>
  <disk><name>disk1</name><path>{}</path></disk>
  <pool><name>cache</name><path>{}</path></pool>
  <share>
    <name>media</name>
    <use_cache>yes</use_cache>
    <cache_pool>cache</cache_pool>
  </share>
</config>
"#,
            disk.display(),
            cache.display()
        ),
    )
    .unwrap();
    let ledger = root.join("ledger.jsonl");

    bin()
        .arg("--config")
        .arg(&cfg)
        .arg("--ledger")
        .arg(&ledger)
        .assert()
        .success();

    assert_eq!(fs::read(disk.join("media/Shows/pilot.mkv")).unwrap(), b"pilot");
    assert!(!cache.join("media/Shows/pilot.mkv").exists());
    let lines = fs::read_to_string(&ledger).unwrap();
    assert!(lines.lines().any(|l| l.contains("\"file_moved\"")));
    assert!(lines.lines().any(|l| l.contains("\"source_removed\"")));
}

#[test]
fn dry_run_leaves_everything_in_place() {
    let td = tempdir().unwrap();
    let root = td.path();
    let cache = root.join("cache");
    let disk = root.join("disk1");
    fs::create_dir_all(cache.join("media")).unwrap();
    fs::create_dir_all(&disk).unwrap();
    fs::write(cache.join("media/a.txt"), b"a").unwrap();
    let cfg = root.join("config.xml");
    fs::write(
        &cfg,
        format!(
            "<config><disk><name>disk1</name><path>{}</path></disk><pool><name>cache</name><path>{}</path></pool><share><name>media</name><use_cache>yes</use_cache><cache_pool>cache</cache_pool></share></config>",
            disk.display(),
            cache.display()
        ),
    )
    .unwrap();

    bin().arg("-c").arg(&cfg).arg("--dry-run").assert().success();
    assert!(cache.join("media/a.txt").is_file());
    assert!(!disk.join("media").exists());
}

#[test]
fn unknown_share_is_rejected() {
    let td = tempdir().unwrap();
    let cfg = td.path().join("config.xml");
    fs::write(&cfg, "<config></config>").unwrap();
    bin()
        .arg("-c")
        .arg(&cfg)
        .arg("--share")
        .arg("ghost")
        .assert()
        .failure();
}
