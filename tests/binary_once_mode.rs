use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn once_mode_moves_settled_arrivals_and_exits() {
    let td = tempdir().unwrap();
    let watch = td.path().join("incoming");
    let out = td.path().join("sorted");
    fs::create_dir(&watch).unwrap();
    fs::write(watch.join("report.txt"), b"done").unwrap();

    let cfg = td.path().join("config.xml");
    fs::write(
        &cfg,
        format!(
            r#"<config>
  <watch_dir>{}</watch_dir>
  <quiet_seconds>0</quiet_seconds>
  <log_level>quiet</log_level>
  <rule><name>all</name><target>{}</target></rule>
</config>"#,
            watch.display(),
            out.display()
        ),
    )
    .unwrap();

    let me = assert_cmd::cargo::cargo_bin!("sluice");
    let res = Command::new(me)
        .args(["--config"])
        .arg(&cfg)
        .arg("--once")
        .output()
        .expect("spawn binary");
    assert!(
        res.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&res.stderr)
    );
    assert_eq!(fs::read(out.join("report.txt")).unwrap(), b"done");
    assert!(!watch.join("report.txt").exists());
}
