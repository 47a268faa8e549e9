#![cfg(all(unix, feature = "cli"))]

use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use shmbridge_region::SharedRegion;

/// Unique region names, unlinked on drop.
struct Names {
    names: Vec<String>,
}

impl Names {
    fn new() -> Self {
        Self { names: Vec::new() }
    }

    fn unique(&mut self, tag: &str) -> String {
        let name = format!(
            "shmbridge-cli-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        );
        self.names.push(name.clone());
        name
    }
}

impl Drop for Names {
    fn drop(&mut self) {
        for name in &self.names {
            let _ = SharedRegion::unlink(name);
        }
    }
}

fn shmbridge() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_shmbridge"));
    cmd.args(["--log-level", "error", "--format", "json"]);
    cmd
}

fn run(args: &[&str]) -> Output {
    shmbridge().args(args).output().expect("shmbridge should run")
}

fn json_line(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().expect("command should print a line");
    serde_json::from_str(line).expect("output should be json")
}

#[test]
fn send_text_then_inspect() {
    let mut names = Names::new();
    let text = names.unique("text");

    let sent = run(&["send", "--input-text", &text, "text", "go to github.com"]);
    assert!(sent.status.success(), "{}", String::from_utf8_lossy(&sent.stderr));
    let sent = json_line(&sent);
    assert_eq!(sent["event"], "sent");
    assert_eq!(sent["revision"], 1);

    let inspected = run(&["inspect", "text", "--input-text", &text]);
    assert!(inspected.status.success());
    let command = json_line(&inspected);
    assert_eq!(command["event"], "command");
    assert_eq!(command["source"], "text");
    assert_eq!(command["revision"], 1);
    assert_eq!(command["payload"], "go to github.com");
}

#[test]
fn typed_commands_decode_on_inspect() {
    let mut names = Names::new();
    let region = names.unique("command");
    let event = names.unique("event");

    let sent = run(&[
        "send",
        "--command",
        &region,
        "--command-event",
        &event,
        "mode",
        "agent",
    ]);
    assert!(sent.status.success(), "{}", String::from_utf8_lossy(&sent.stderr));
    assert_eq!(json_line(&sent)["kind"], "set-mode");

    let inspected = run(&["inspect", "command", "--command", &region]);
    let command = json_line(&inspected);
    assert_eq!(command["payload"]["type"], "set-mode");
    assert_eq!(command["payload"]["data"], "agent");

    let sent = run(&[
        "send",
        "--command",
        &region,
        "--command-event",
        &event,
        "action",
        "navigate",
        "--target",
        "https://github.com",
    ]);
    assert!(sent.status.success());

    let command = json_line(&run(&["inspect", "command", "--command", &region]));
    assert_eq!(command["kind"], "execute-action");
    assert_eq!(command["payload"]["data"]["action"], "navigate");
    assert_eq!(command["payload"]["data"]["target"], "https://github.com");

    let _ = shmbridge_region::NamedEvent::unlink(&event);
}

#[test]
fn published_frame_is_inspectable() {
    let mut names = Names::new();
    let video = names.unique("video");

    let published = run(&[
        "publish-test-frame",
        "--video",
        &video,
        "--video-size",
        "1MiB",
        "--width",
        "32",
        "--height",
        "16",
        "--count",
        "2",
        "--interval",
        "1ms",
    ]);
    assert!(published.status.success());
    assert_eq!(json_line(&published)["index"], 2);

    let frame = json_line(&run(&[
        "inspect",
        "video",
        "--video",
        &video,
        "--video-size",
        "1MiB",
    ]));
    assert_eq!(frame["event"], "frame");
    assert_eq!(frame["index"], 2);
    assert_eq!(frame["width"], 32);
    assert_eq!(frame["payload_size"], 32 * 16 * 4);
}

#[test]
fn inspect_missing_region_is_transport_error() {
    let mut names = Names::new();
    let text = names.unique("missing");
    let output = run(&["inspect", "text", "--input-text", &text]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn inspect_empty_region_exits_one() {
    let mut names = Names::new();
    let text = names.unique("empty");
    let _region = SharedRegion::open_or_create(&text, 4096).expect("region should be created");

    let output = run(&["inspect", "text", "--input-text", &text]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(json_line(&output)["event"], "empty");
}

#[test]
fn watch_prints_sent_command() {
    let mut names = Names::new();
    let text = names.unique("watch");

    let mut child = shmbridge()
        .args([
            "watch",
            "--channels",
            "text",
            "--input-text",
            &text,
            "--no-status",
            "--count",
            "1",
            "--duration",
            "10s",
            "--poll-interval",
            "1ms",
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("watch should start");

    // Commands written before watch attaches are skipped, so keep sending.
    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().expect("watch should be pollable") {
            break status;
        }
        assert!(start.elapsed() < Duration::from_secs(8), "watch never printed");
        let _ = run(&["send", "--input-text", &text, "text", "hello agent"]);
        thread::sleep(Duration::from_millis(100));
    };
    assert!(status.success());

    let mut stdout = String::new();
    child
        .stdout
        .take()
        .expect("stdout should be piped")
        .read_to_string(&mut stdout)
        .expect("stdout should be readable");
    let event: serde_json::Value =
        serde_json::from_str(stdout.lines().next().expect("one event")).expect("json event");
    assert_eq!(event["event"], "command");
    assert_eq!(event["payload"], "hello agent");
}
