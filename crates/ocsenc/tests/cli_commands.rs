#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/ocsenc-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn ocsenc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ocsenc"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .output()
        .expect("ocsenc should run")
}

fn simulate_capture(path: &Path, layout: &str, samples: &str, packets: &str) {
    let output = ocsenc(&[
        "simulate",
        "--capture",
        path.to_str().expect("utf-8 path"),
        "--layout",
        layout,
        "--samples",
        samples,
        "--packets",
        packets,
        "--start-time",
        "1700000000",
    ]);
    assert!(output.status.success(), "simulate failed: {output:?}");
}

#[test]
fn simulated_capture_decodes_to_json_lines() {
    let dir = unique_temp_dir("decode");
    let capture = dir.join("hwp.bin");
    simulate_capture(&capture, "hwp", "4", "5");

    let output = ocsenc(&[
        "--format",
        "json",
        "decode",
        capture.to_str().expect("utf-8 path"),
        "--samples",
        "4",
        "--chunk-size",
        "50",
    ]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let rows: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line is JSON"))
        .collect();
    assert_eq!(rows.len(), 6);
    assert_eq!(rows[0]["kind"], "irig");
    assert_eq!(rows[0]["irig_time"], 1_700_000_000);
    assert!(rows[1..].iter().all(|row| row["kind"] == "counter"));
    assert_eq!(rows[5]["samples"], 4);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("\"packets\":6"));
    assert!(stderr.contains("\"trailing_bytes\":0"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn wiregrid_capture_decodes_with_its_layout() {
    let dir = unique_temp_dir("wg");
    let capture = dir.join("wg.bin");
    simulate_capture(&capture, "wiregrid", "10", "3");

    let output = ocsenc(&[
        "--format",
        "json",
        "decode",
        capture.to_str().expect("utf-8 path"),
        "--layout",
        "wiregrid",
        "--samples",
        "10",
    ]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 4);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn decode_missing_capture_fails() {
    let output = ocsenc(&["decode", "/tmp/ocsenc-no-such-capture.bin"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = ocsenc(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("ocsenc {}", env!("CARGO_PKG_VERSION")));

    let output = ocsenc(&["version", "--extended"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("target_os:"));
}

#[test]
fn unknown_layout_is_usage_error() {
    let output = ocsenc(&["decode", "x.bin", "--layout", "bogus"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn hwp_agent_publishes_simulated_stream_in_test_mode() {
    let dir = unique_temp_dir("hwp");
    let config = dir.join("hwp.json");
    let feed_out = dir.join("feeds.jsonl");
    let port = 40_000 + (std::process::id() % 10_000) as u16;
    std::fs::write(
        &config,
        format!(r#"{{"bind_addr": "127.0.0.1", "port": {port}, "samples_per_packet": 4, "publish_samples": 8}}"#),
    )
    .expect("config should be writable");

    let mut agent = Command::new(env!("CARGO_BIN_EXE_ocsenc"))
        .args(["--log-level", "error", "--format", "json", "hwp", "--test-mode"])
        .arg("--config")
        .arg(&config)
        .arg("--feed-out")
        .arg(&feed_out)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("hwp agent should start");

    // Datagrams sent before the agent binds are lost; keep sending until it exits.
    let target = format!("127.0.0.1:{port}");
    let start = Instant::now();
    let status = loop {
        if let Some(status) = agent.try_wait().expect("agent status") {
            break status;
        }
        if start.elapsed() >= Duration::from_secs(10) {
            let _ = agent.kill();
            panic!("hwp agent did not finish");
        }
        ocsenc(&[
            "simulate", "--target", &target, "--samples", "4", "--packets", "4",
        ]);
        thread::sleep(Duration::from_millis(50));
    };
    assert!(status.success());

    let feeds = std::fs::read_to_string(&feed_out).expect("feed file");
    assert!(feeds.contains("\"HWPEncoder_full\""));
    assert!(feeds.contains("\"HWPEncoder_counter\""));

    let _ = std::fs::remove_dir_all(&dir);
}
