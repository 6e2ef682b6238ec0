//! Integration tests for tagwm using Xvfb.
//!
//! These tests require:
//! - Xvfb (headless X server)
//! - The built tagwm binary
//!
//! Run with: RUST_LOG=info cargo test --test integration
//!
//! If Xvfb is not available, tests will be skipped.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, CreateWindowAux, EventMask, Window, WindowClass};
use x11rb::rust_connection::RustConnection;

/// Each harness gets its own display so tests can run in parallel
static NEXT_DISPLAY: AtomicUsize = AtomicUsize::new(0);

/// Check if Xvfb is available
fn xvfb_available() -> bool {
    Command::new("which")
        .arg("Xvfb")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Test fixture that manages Xvfb and tagwm lifecycle
struct TestHarness {
    xvfb: Child,
    wm: Child,
    display: String,
    socket_path: PathBuf,
    /// Connection used to create test windows
    x: Option<RustConnection>,
}

impl TestHarness {
    /// Create a new test harness with Xvfb and tagwm
    fn new() -> Option<Self> {
        if !xvfb_available() {
            eprintln!("Xvfb not available, skipping integration tests");
            return None;
        }

        let display = format!(":{}", 140 + NEXT_DISPLAY.fetch_add(1, Ordering::SeqCst));

        // Start Xvfb
        let xvfb = match Command::new("Xvfb")
            .args([display.as_str(), "-screen", "0", "1280x800x24"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                eprintln!("Failed to start Xvfb: {}", e);
                return None;
            }
        };

        // Wait for Xvfb to be ready
        std::thread::sleep(Duration::from_millis(500));

        // Determine socket path
        let sanitized_display = display.replace([':', '.'], "_");
        let socket_path = PathBuf::from(format!("/tmp/tagwm{}.sock", sanitized_display));

        // Remove old socket if present
        let _ = std::fs::remove_file(&socket_path);

        // Start tagwm with the built-in defaults
        let wm = match Command::new(env!("CARGO_BIN_EXE_tagwm"))
            .env("DISPLAY", &display)
            .env("RUST_LOG", "info")
            .env("TAGWM_CONFIG", "/nonexistent/tagwm.toml")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                eprintln!("Failed to start tagwm: {}", e);
                return None;
            }
        };

        let mut harness = Self {
            xvfb,
            wm,
            display,
            socket_path,
            x: None,
        };

        // Wait for WM to be ready and IPC socket to exist
        for _ in 0..50 {
            if harness.socket_path.exists() {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        if !harness.socket_path.exists() {
            eprintln!("IPC socket never appeared at {:?}", harness.socket_path);
            return None;
        }

        harness.x = RustConnection::connect(Some(&harness.display))
            .ok()
            .map(|(conn, _)| conn);
        Some(harness)
    }

    /// Send an IPC command and get the response
    fn send_command(&self, command: &Value) -> Result<Value, String> {
        let line = serde_json::to_string(command)
            .map_err(|e| format!("Failed to serialize command: {}", e))?;
        self.send_line(&line)
    }

    /// Send one raw request line
    fn send_line(&self, line: &str) -> Result<Value, String> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .map_err(|e| format!("Failed to connect to IPC socket: {}", e))?;

        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .map_err(|e| format!("Failed to set read timeout: {}", e))?;

        writeln!(stream, "{}", line).map_err(|e| format!("Failed to write command: {}", e))?;
        stream
            .flush()
            .map_err(|e| format!("Failed to flush: {}", e))?;

        let mut reader = BufReader::new(&stream);
        let mut response = String::new();
        reader
            .read_line(&mut response)
            .map_err(|e| format!("Failed to read response: {}", e))?;

        serde_json::from_str(&response).map_err(|e| format!("Failed to parse response: {}", e))
    }

    /// Get the current state
    fn get_state(&self) -> Result<Value, String> {
        self.send_command(&serde_json::json!({"command": "get_state"}))
    }

    /// State of the first monitor
    fn monitor(&self) -> Value {
        let state = self.get_state().expect("Failed to get state");
        state["data"]["monitors"][0].clone()
    }

    fn clients(&self) -> Vec<Value> {
        let resp = self
            .send_command(&serde_json::json!({"command": "get_clients"}))
            .expect("Failed to get clients");
        resp["data"].as_array().cloned().unwrap_or_default()
    }

    /// Validate state
    fn validate(&self) -> Result<Value, String> {
        self.send_command(&serde_json::json!({"command": "validate_state"}))
    }

    /// Quit the window manager
    fn quit(&self) -> Result<Value, String> {
        self.send_command(&serde_json::json!({"command": "quit"}))
    }

    /// Map a plain top-level window and wait for it to be managed
    fn spawn_window(&self) -> Window {
        let conn = self.x.as_ref().expect("No X connection");
        let screen = &conn.setup().roots[0];
        let win = conn.generate_id().expect("Failed to allocate window id");
        conn.create_window(
            0,
            win,
            screen.root,
            0,
            0,
            200,
            150,
            0,
            WindowClass::INPUT_OUTPUT,
            0,
            &CreateWindowAux::new().event_mask(EventMask::STRUCTURE_NOTIFY),
        )
        .expect("Failed to create window");
        conn.map_window(win).expect("Failed to map window");
        conn.flush().expect("Failed to flush");

        // Wait for window to be managed
        std::thread::sleep(Duration::from_millis(300));
        win
    }

    fn destroy_window(&self, win: Window) {
        let conn = self.x.as_ref().expect("No X connection");
        conn.destroy_window(win).expect("Failed to destroy window");
        conn.flush().expect("Failed to flush");
        std::thread::sleep(Duration::from_millis(300));
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        // Try graceful shutdown first
        let _ = self.quit();
        std::thread::sleep(Duration::from_millis(100));

        // Force kill if still running
        let _ = self.wm.kill();
        let _ = self.wm.wait();
        let _ = self.xvfb.kill();
        let _ = self.xvfb.wait();
    }
}

fn status(resp: &Value) -> Option<&str> {
    resp.get("status").and_then(|v| v.as_str())
}

#[test]
fn test_wm_starts_and_responds() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    let state = harness.get_state().expect("Failed to get state");
    assert_eq!(status(&state), Some("state"));

    let data = &state["data"];
    assert_eq!(data["clients"].as_array().map(|c| c.len()), Some(0));
    assert_eq!(data["monitors"].as_array().map(|m| m.len()), Some(1));
    assert_eq!(data["monitors"][0]["tags"].as_u64(), Some(1));
    assert_eq!(data["tag_names"].as_array().map(|t| t.len()), Some(9));
}

#[test]
fn test_state_validation() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    let result = harness.validate().expect("Failed to validate");
    assert_eq!(status(&result), Some("validation"));
    assert_eq!(result["valid"].as_bool(), Some(true));
}

#[test]
fn test_view_and_toggle_view() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    let resp = harness
        .send_command(&serde_json::json!({"command": "view", "tags": 4}))
        .unwrap();
    assert_eq!(status(&resp), Some("ok"));
    assert_eq!(harness.monitor()["tags"].as_u64(), Some(4));

    harness
        .send_command(&serde_json::json!({"command": "toggle_view", "tags": 1}))
        .unwrap();
    assert_eq!(harness.monitor()["tags"].as_u64(), Some(5));

    // Toggling away every visible tag is refused
    harness
        .send_command(&serde_json::json!({"command": "toggle_view", "tags": 5}))
        .unwrap();
    assert_eq!(harness.monitor()["tags"].as_u64(), Some(5));
}

#[test]
fn test_pertag_layout_survives_view_round_trip() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    // Monocle on tag 1
    harness
        .send_command(&serde_json::json!({"command": "set_layout_safe", "index": 2}))
        .unwrap();
    assert_eq!(harness.monitor()["layout_symbol"].as_str(), Some("[M]"));

    // Tag 2 keeps the default layout
    harness
        .send_command(&serde_json::json!({"command": "view", "tags": 2}))
        .unwrap();
    assert_eq!(harness.monitor()["layout_symbol"].as_str(), Some("[]="));

    harness
        .send_command(&serde_json::json!({"command": "view", "tags": 1}))
        .unwrap();
    assert_eq!(harness.monitor()["layout_symbol"].as_str(), Some("[M]"));
}

#[test]
fn test_set_layout_out_of_range() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    let resp = harness
        .send_command(&serde_json::json!({"command": "set_layout_safe", "index": 99}))
        .unwrap();
    assert_eq!(status(&resp), Some("error"));
    assert_eq!(resp["code"].as_str(), Some("invalid_layout"));
    assert_eq!(harness.monitor()["layout"].as_u64(), Some(0));
}

#[test]
fn test_set_mfact() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    // Values of 1.0 and above are absolute
    let resp = harness
        .send_command(&serde_json::json!({"command": "set_mfact", "value": 1.6}))
        .unwrap();
    assert_eq!(status(&resp), Some("ok"));
    let mfact = harness.monitor()["mfact"].as_f64().unwrap();
    assert!((mfact - 0.6).abs() < 1e-4);

    let resp = harness
        .send_command(&serde_json::json!({"command": "set_mfact", "value": 1.99}))
        .unwrap();
    assert_eq!(resp["code"].as_str(), Some("rejected"));
}

#[test]
fn test_invalid_command_returns_error() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    let resp = harness
        .send_command(&serde_json::json!({"command": "frobnicate"}))
        .unwrap();
    assert_eq!(status(&resp), Some("error"));
    assert_eq!(resp["code"].as_str(), Some("invalid_command"));

    let resp = harness.send_line("{not json").unwrap();
    assert_eq!(resp["code"].as_str(), Some("parse_error"));

    // The server keeps working for everyone else
    assert_eq!(status(&harness.get_state().unwrap()), Some("state"));
}

#[test]
fn test_several_requests_on_one_connection() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    let mut stream = UnixStream::connect(&harness.socket_path).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    writeln!(stream, r#"{{"command": "view", "tags": 2}}"#).unwrap();
    writeln!(stream, r#"{{"command": "get_monitors"}}"#).unwrap();
    stream.flush().unwrap();

    let mut reader = BufReader::new(&stream);
    let mut first = String::new();
    reader.read_line(&mut first).unwrap();
    let mut second = String::new();
    reader.read_line(&mut second).unwrap();

    let first: Value = serde_json::from_str(&first).unwrap();
    let second: Value = serde_json::from_str(&second).unwrap();
    assert_eq!(status(&first), Some("ok"));
    assert_eq!(status(&second), Some("monitors"));
    assert_eq!(second["data"][0]["tags"].as_u64(), Some(2));
}

#[test]
fn test_window_is_managed_and_tiled() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    let win = harness.spawn_window();
    let clients = harness.clients();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["window"].as_u64(), Some(win as u64));
    assert_eq!(clients[0]["is_focused"].as_bool(), Some(true));
    assert_eq!(clients[0]["tags"].as_u64(), Some(1));

    // A lone tiled client fills the work area
    let work = harness.monitor()["work_area"].clone();
    let geom = &clients[0]["geometry"];
    assert!(geom["width"].as_i64().unwrap() > work["width"].as_i64().unwrap() / 2);

    let result = harness.validate().unwrap();
    assert_eq!(result["valid"].as_bool(), Some(true));
}

#[test]
fn test_two_windows_split_master_and_stack() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    let first = harness.spawn_window();
    let second = harness.spawn_window();

    // New clients attach at the head, so the second window is the master
    let monitor = harness.monitor();
    let order: Vec<u64> = monitor["windows"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|w| w.as_u64())
        .collect();
    assert_eq!(order, vec![second as u64, first as u64]);

    let clients = harness.clients();
    let x_of = |win: Window| {
        clients
            .iter()
            .find(|c| c["window"].as_u64() == Some(win as u64))
            .and_then(|c| c["geometry"]["x"].as_i64())
            .unwrap()
    };
    assert!(x_of(first) > x_of(second));

    // Zoom swaps them
    harness.send_command(&serde_json::json!({"command": "zoom"})).unwrap();
    assert_eq!(
        harness.monitor()["windows"][0].as_u64(),
        Some(first as u64)
    );
}

#[test]
fn test_tag_hides_client() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    harness.spawn_window();
    harness
        .send_command(&serde_json::json!({"command": "tag", "tags": 2}))
        .unwrap();
    let clients = harness.clients();
    assert_eq!(clients[0]["tags"].as_u64(), Some(2));
    assert_eq!(clients[0]["is_visible"].as_bool(), Some(false));

    harness
        .send_command(&serde_json::json!({"command": "view", "tags": 2}))
        .unwrap();
    assert_eq!(harness.clients()[0]["is_visible"].as_bool(), Some(true));

    // Removing the only tag is refused
    harness
        .send_command(&serde_json::json!({"command": "toggle_tag", "tags": 2}))
        .unwrap();
    assert_eq!(harness.clients()[0]["tags"].as_u64(), Some(2));
}

#[test]
fn test_destroyed_window_is_unmanaged() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    let win = harness.spawn_window();
    assert_eq!(harness.clients().len(), 1);
    harness.destroy_window(win);
    assert!(harness.clients().is_empty());

    let result = harness.validate().unwrap();
    assert_eq!(result["valid"].as_bool(), Some(true));
}

#[test]
fn test_toggle_floating() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    harness.spawn_window();
    harness
        .send_command(&serde_json::json!({"command": "toggle_floating"}))
        .unwrap();
    assert_eq!(harness.clients()[0]["is_floating"].as_bool(), Some(true));
    harness
        .send_command(&serde_json::json!({"command": "toggle_floating"}))
        .unwrap();
    assert_eq!(harness.clients()[0]["is_floating"].as_bool(), Some(false));
}

#[test]
fn test_subscriber_receives_tag_change() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    let mut stream = UnixStream::connect(&harness.socket_path).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    writeln!(stream, r#"{{"command": "subscribe"}}"#).unwrap();
    stream.flush().unwrap();

    let mut reader = BufReader::new(&stream);
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    let ack: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(status(&ack), Some("ok"));

    harness
        .send_command(&serde_json::json!({"command": "view", "tags": 8}))
        .unwrap();

    line.clear();
    reader.read_line(&mut line).unwrap();
    let event: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(event["event"].as_str(), Some("tag_change"));
    assert_eq!(event["old_tags"].as_u64(), Some(1));
    assert_eq!(event["new_tags"].as_u64(), Some(8));
}

#[test]
fn test_event_log_records_operations() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    harness.spawn_window();
    let log = harness
        .send_command(&serde_json::json!({"command": "get_event_log"}))
        .unwrap();
    assert_eq!(status(&log), Some("event_log"));
    let entries = log["entries"].as_array().unwrap();
    assert!(entries
        .iter()
        .any(|e| e["event_type"].as_str() == Some("MapRequest")));

    // Sequence numbers increase
    let seqs: Vec<u64> = entries.iter().filter_map(|e| e["sequence"].as_u64()).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    let limited = harness
        .send_command(&serde_json::json!({"command": "get_event_log", "count": 2}))
        .unwrap();
    assert_eq!(limited["entries"].as_array().map(|e| e.len()), Some(2));
}

#[test]
fn test_tag_views_are_logged() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    for command in [
        serde_json::json!({"command": "view", "tags": 2}),
        serde_json::json!({"command": "toggle_view", "tags": 1}),
        // Rejected: would leave nothing visible
        serde_json::json!({"command": "toggle_view", "tags": 3}),
        // Already shown
        serde_json::json!({"command": "view", "tags": 3}),
    ] {
        harness.send_command(&command).unwrap();
    }

    let log = harness
        .send_command(&serde_json::json!({"command": "get_event_log"}))
        .unwrap();
    let views: Vec<&str> = log["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["event_type"].as_str() == Some("view_changed"))
        .filter_map(|e| e["details"].as_str())
        .collect();
    assert_eq!(views, vec!["monitor=0 tags=0x2", "monitor=0 tags=0x3"]);
}

#[test]
fn test_extra_arguments_are_rejected() {
    let Some(harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    let resp = harness
        .send_command(&serde_json::json!({"command": "view", "tags": 4, "bogus": 1}))
        .unwrap();
    assert_eq!(resp["code"].as_str(), Some("invalid_command"));
    assert_eq!(harness.monitor()["tags"].as_u64(), Some(1));
}

#[test]
fn test_quit_removes_socket() {
    let Some(mut harness) = TestHarness::new() else {
        eprintln!("Skipping test: could not create test harness");
        return;
    };

    let resp = harness.quit().unwrap();
    assert_eq!(status(&resp), Some("ok"));

    let mut exited = false;
    for _ in 0..50 {
        if let Ok(Some(_)) = harness.wm.try_wait() {
            exited = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    assert!(exited, "tagwm did not exit after quit");
    assert!(!harness.socket_path.exists());
}
