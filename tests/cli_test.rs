//! Exercises the `check` subcommand end to end through the compiled binary.
#![allow(clippy::unwrap_used)]

use assert_cmd::Command;

fn write_conf(root: &std::path::Path, url: &str) {
    let conf_dir = root.join("conf");
    std::fs::create_dir_all(&conf_dir).unwrap();
    std::fs::write(
        conf_dir.join("tasks.yaml"),
        format!(
            r#"
tasks:
  - name: probe
    method: get
    url: {url}
    interval: 60
    timeout: 2
    retry:
      count: 0
"#
        ),
    )
    .unwrap();
    std::fs::write(conf_dir.join("alerts.yaml"), "alerts: []\n").unwrap();
}

#[test]
fn check_reports_failure_and_exits_nonzero_for_unreachable_url() {
    let root = tempfile::tempdir().unwrap();
    // Port 9 (discard) on loopback refuses connections on every sane host.
    write_conf(root.path(), "http://127.0.0.1:9/");

    let output = Command::cargo_bin("urlcheck")
        .unwrap()
        .arg("--root")
        .arg(root.path())
        .arg("check")
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("FAIL probe"), "stdout was: {stdout}");
}
