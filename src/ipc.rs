//! IPC interface for programmatic control of tagwm.
//!
//! A Unix socket server speaking line-delimited JSON. Every request line
//! gets exactly one response line; connections that subscribe also
//! receive change events. Sockets are non-blocking and driven by the
//! main loop's mio poll.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use mio::net::{UnixListener, UnixStream};
use mio::{Interest, Registry, Token};
use serde::{Deserialize, Serialize};

use crate::types::Rect;

/// Poll token of the listening socket
pub const LISTENER: Token = Token(1);

/// Tokens at and above this value belong to control connections
const FIRST_CONNECTION_TOKEN: usize = 2;

/// Pending output beyond this is treated as a stuck reader
const MAX_PENDING_OUTPUT: usize = 1 << 20;

/// Longest request line accepted
const MAX_REQUEST_LINE: usize = 1 << 20;

/// Get the socket path for this display, unless the config names one
pub fn socket_path(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
    let sanitized = display.replace([':', '.'], "_");
    PathBuf::from(format!("/tmp/tagwm{}.sock", sanitized))
}

/// Commands that can be sent to the WM via IPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case", deny_unknown_fields)]
pub enum IpcCommand {
    // Actions, named after the key binding they mirror
    View { tags: u32 },
    ToggleView { tags: u32 },
    Tag { tags: u32 },
    ToggleTag { tags: u32 },
    /// Send the selected client to the next (+1) or previous (-1) monitor
    TagMon { dir: i32 },
    FocusMon { dir: i32 },
    FocusStack { dir: i32 },
    Zoom,
    IncNmaster { delta: i32 },
    KillClient,
    ToggleFloating,
    /// Absolute factor, or relative when below 1.0 (like the key binding)
    SetMfact { value: f32 },
    /// Select a layout by index; no index flips between the last two
    SetLayoutSafe {
        #[serde(default)]
        index: Option<usize>,
    },
    Quit,

    // Queries
    /// Get full WM state snapshot
    GetState,
    GetClients,
    GetMonitors,
    /// Get recent event log
    GetEventLog {
        #[serde(default)]
        count: Option<usize>,
    },
    /// Validate state invariants
    ValidateState,

    /// Receive change events on this connection
    Subscribe,
}

/// Responses from the WM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Operation succeeded with no data
    Ok,
    State { data: StateSnapshot },
    Clients { data: Vec<ClientInfo> },
    Monitors { data: Vec<MonitorInfo> },
    EventLog { entries: Vec<EventLogEntry> },
    Validation {
        valid: bool,
        violations: Vec<String>,
    },
    Error { code: String, message: String },
}

impl IpcResponse {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Change notifications pushed to subscribed connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IpcEvent {
    FocusedTitleChange {
        monitor: usize,
        window: Option<u32>,
        old_title: String,
        new_title: String,
    },
    MonitorFocusChange { old_monitor: usize, new_monitor: usize },
    LayoutChange {
        monitor: usize,
        old_symbol: String,
        new_symbol: String,
    },
    TagChange {
        monitor: usize,
        old_tags: u32,
        new_tags: u32,
    },
    ClientFocusChange {
        monitor: usize,
        old_window: Option<u32>,
        new_window: Option<u32>,
    },
}

/// Snapshot of the full WM state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub selected_monitor: usize,
    pub focused_window: Option<u32>,
    pub tag_names: Vec<String>,
    pub monitors: Vec<MonitorInfo>,
    pub clients: Vec<ClientInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorInfo {
    pub index: usize,
    pub geometry: Rect,
    pub work_area: Rect,
    pub tags: u32,
    pub layout: usize,
    pub layout_symbol: String,
    pub mfact: f32,
    pub nmaster: i32,
    pub show_bar: bool,
    pub gap: i32,
    pub selected_window: Option<u32>,
    /// Windows in layout order
    pub windows: Vec<u32>,
    /// Windows in focus order
    pub stack: Vec<u32>,
    pub is_selected: bool,
}

/// Information about a managed window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub window: u32,
    pub title: String,
    pub monitor: usize,
    pub tags: u32,
    pub geometry: Rect,
    pub border_width: i32,
    pub is_floating: bool,
    pub is_fullscreen: bool,
    pub is_urgent: bool,
    pub is_focused: bool,
    pub is_visible: bool,
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swallowing: Option<u32>,
}

/// Entry in the event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub event_type: String,
    pub window: Option<u32>,
    pub details: String,
}

/// Parse one request line. Malformed JSON is a `parse_error`; an unknown
/// command, an ill-typed argument or an argument the command does not
/// take is an `invalid_command`.
pub fn parse_command(line: &str) -> Result<IpcCommand, IpcResponse> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| IpcResponse::error("parse_error", format!("Failed to parse command: {}", e)))?;
    let command = IpcCommand::deserialize(&value)
        .map_err(|e| IpcResponse::error("invalid_command", e.to_string()))?;

    // Unit variants of a tagged enum skip over extra keys
    if let (Some(given), Ok(serde_json::Value::Object(known))) =
        (value.as_object(), serde_json::to_value(&command))
    {
        if let Some(extra) = given.keys().find(|k| !known.contains_key(k.as_str())) {
            return Err(IpcResponse::error(
                "invalid_command",
                format!("Unexpected argument `{}` for {:?}", extra, command),
            ));
        }
    }
    Ok(command)
}

/// Move every complete line out of `input`, parsed
fn take_lines(input: &mut Vec<u8>, requests: &mut Vec<Result<IpcCommand, IpcResponse>>) {
    while let Some(pos) = input.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = input.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let request = parse_command(line);
        if let Err(IpcResponse::Error { message, .. }) = &request {
            log::warn!("Invalid IPC command: {}", message);
        }
        requests.push(request);
    }
}

/// One accepted control connection
struct ControlConnection {
    stream: UnixStream,
    input: Vec<u8>,
    output: Vec<u8>,
    subscribed: bool,
    /// Peer closed its write side; close once the output is flushed
    eof: bool,
    writable_interest: bool,
}

/// IPC server that listens on a Unix socket
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    registry: Registry,
    connections: HashMap<Token, ControlConnection>,
    next_token: usize,
}

impl IpcServer {
    /// Bind the socket and register it with the poll behind `registry`
    pub fn bind(path: PathBuf, registry: &Registry) -> io::Result<Self> {
        // Remove existing socket if present
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let mut listener = UnixListener::bind(&path)?;
        registry.register(&mut listener, LISTENER, Interest::READABLE)?;

        log::info!("IPC server listening on {:?}", path);

        Ok(Self {
            listener,
            socket_path: path,
            registry: registry.try_clone()?,
            connections: HashMap::new(),
            next_token: FIRST_CONNECTION_TOKEN,
        })
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Accept every pending connection
    pub fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, _)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(e) = self.registry.register(&mut stream, token, Interest::READABLE) {
                        log::warn!("Failed to register IPC connection: {}", e);
                        continue;
                    }
                    log::debug!("IPC connection {:?} accepted", token);
                    self.connections.insert(
                        token,
                        ControlConnection {
                            stream,
                            input: Vec::new(),
                            output: Vec::new(),
                            subscribed: false,
                            eof: false,
                            writable_interest: false,
                        },
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("IPC accept error: {}", e);
                    return;
                }
            }
        }
    }

    /// Read everything available on a connection and return the complete
    /// request lines, parsed
    pub fn read_requests(&mut self, token: Token) -> Vec<Result<IpcCommand, IpcResponse>> {
        let Some(conn) = self.connections.get_mut(&token) else {
            return Vec::new();
        };

        let mut requests = Vec::new();
        let mut buf = [0u8; 4096];
        while !conn.eof {
            match conn.stream.read(&mut buf) {
                Ok(0) => conn.eof = true,
                Ok(n) => {
                    conn.input.extend_from_slice(&buf[..n]);
                    if buf[..n].contains(&b'\n') {
                        take_lines(&mut conn.input, &mut requests);
                    }
                    if conn.input.len() > MAX_REQUEST_LINE {
                        log::warn!("IPC request on {:?} exceeds {} bytes, closing", token, MAX_REQUEST_LINE);
                        conn.input.clear();
                        conn.eof = true;
                        requests.push(Err(IpcResponse::error(
                            "parse_error",
                            format!("Request line longer than {} bytes", MAX_REQUEST_LINE),
                        )));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("IPC read error on {:?}: {}", token, e);
                    conn.eof = true;
                }
            }
        }
        requests
    }

    /// Queue a response for one connection
    pub fn respond(&mut self, token: Token, response: &IpcResponse) {
        match serde_json::to_string(response) {
            Ok(json) => self.queue(token, &json),
            Err(e) => log::warn!("Failed to serialize IPC response: {}", e),
        }
    }

    pub fn subscribe(&mut self, token: Token) {
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.subscribed = true;
        }
    }

    /// Send an event to every subscribed connection
    pub fn broadcast(&mut self, event: &IpcEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("Failed to serialize IPC event: {}", e);
                return;
            }
        };
        let subscribers: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| c.subscribed)
            .map(|(&t, _)| t)
            .collect();
        for token in subscribers {
            self.queue(token, &json);
        }
    }

    fn queue(&mut self, token: Token, line: &str) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        conn.output.extend_from_slice(line.as_bytes());
        conn.output.push(b'\n');
        self.flush(token);
    }

    /// Write as much pending output as the socket takes. Leftovers wait
    /// for a writable event; a reader that falls too far behind is dropped.
    pub fn flush(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        let mut failed = false;
        while !conn.output.is_empty() {
            match conn.stream.write(&conn.output) {
                Ok(0) => {
                    failed = true;
                    break;
                }
                Ok(n) => {
                    conn.output.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("IPC write error on {:?}: {}", token, e);
                    failed = true;
                    break;
                }
            }
        }

        if failed || conn.output.len() > MAX_PENDING_OUTPUT {
            self.close(token);
            return;
        }

        let want_writable = !conn.output.is_empty();
        if want_writable != conn.writable_interest {
            let interest = if want_writable {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            if let Err(e) = self.registry.reregister(&mut conn.stream, token, interest) {
                log::warn!("Failed to update IPC interest: {}", e);
            }
            conn.writable_interest = want_writable;
        }
    }

    /// Close the connection if its peer hung up and nothing is left to send
    pub fn finish(&mut self, token: Token) {
        let done = self
            .connections
            .get(&token)
            .is_some_and(|c| c.eof && c.output.is_empty());
        if done {
            self.close(token);
        }
    }

    fn close(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.registry.deregister(&mut conn.stream);
            log::debug!("IPC connection {:?} closed", token);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // Clean up socket file
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::time::Duration;

    /// Blocking client for connecting to the IPC server
    struct IpcConnection {
        reader: BufReader<std::os::unix::net::UnixStream>,
        stream: std::os::unix::net::UnixStream,
    }

    impl IpcConnection {
        /// Connect to the WM's IPC socket
        fn connect(path: &Path) -> io::Result<Self> {
            let stream = std::os::unix::net::UnixStream::connect(path)?;

            // Set timeouts
            stream.set_read_timeout(Some(Duration::from_secs(5)))?;
            stream.set_write_timeout(Some(Duration::from_secs(5)))?;

            let reader = BufReader::new(stream.try_clone()?);
            Ok(Self { reader, stream })
        }

        /// Send a command and receive the response
        fn send(&mut self, command: &IpcCommand) -> io::Result<IpcResponse> {
            let json = serde_json::to_string(command)?;
            writeln!(self.stream, "{}", json)?;
            self.stream.flush()?;

            let line = self.read_line()?;
            serde_json::from_str(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        }

        /// Block until the next broadcast event
        fn next_event(&mut self) -> io::Result<IpcEvent> {
            let line = self.read_line()?;
            serde_json::from_str(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        }

        fn read_line(&mut self) -> io::Result<String> {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
            }
            Ok(line)
        }
    }

    #[test]
    fn test_command_serialization() {
        let cmd = IpcCommand::GetState;
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("get_state"));

        let cmd = IpcCommand::View { tags: 4 };
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"command":"view","tags":4}"#);

        let cmd = IpcCommand::SetLayoutSafe { index: Some(2) };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("set_layout_safe"));
    }

    #[test]
    fn test_response_serialization() {
        let resp = IpcResponse::Ok;
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"status":"ok"}"#);

        let resp = IpcResponse::error("test", "test error");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("error"));
        assert!(json.contains("test error"));
    }

    #[test]
    fn test_command_deserialization() {
        let json = r#"{"command": "toggle_view", "tags": 3}"#;
        let cmd: IpcCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd, IpcCommand::ToggleView { tags: 3 });

        let json = r#"{"command": "focus_stack", "dir": -1}"#;
        let cmd: IpcCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd, IpcCommand::FocusStack { dir: -1 });

        let json = r#"{"command": "set_mfact", "value": 0.6}"#;
        let cmd: IpcCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd, IpcCommand::SetMfact { value: 0.6 });

        // Optional arguments may be omitted
        let json = r#"{"command": "set_layout_safe"}"#;
        let cmd: IpcCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd, IpcCommand::SetLayoutSafe { index: None });
    }

    #[test]
    fn test_parse_command_error_codes() {
        let code = |line: &str| match parse_command(line) {
            Err(IpcResponse::Error { code, .. }) => code,
            other => panic!("expected error, got {:?}", other),
        };
        assert_eq!(code(r#"{"command": "frobnicate"}"#), "invalid_command");
        assert_eq!(code(r#"{"command": "view", "tags": "all"}"#), "invalid_command");
        assert_eq!(code(r#"{"command": "view""#), "parse_error");
        assert_eq!(code("not json"), "parse_error");
    }

    #[test]
    fn test_extra_arguments_are_rejected() {
        let code = |line: &str| match parse_command(line) {
            Err(IpcResponse::Error { code, .. }) => code,
            other => panic!("expected error, got {:?}", other),
        };
        assert_eq!(code(r#"{"command": "zoom", "tags": 5}"#), "invalid_command");
        assert_eq!(code(r#"{"command": "view", "tags": 1, "bogus": 2}"#), "invalid_command");
        assert_eq!(code(r#"{"command": "set_layout_safe", "index": 1, "dir": 1}"#), "invalid_command");

        // Optional arguments are still accepted, present or not
        assert_eq!(
            parse_command(r#"{"command": "get_event_log", "count": 3}"#).unwrap(),
            IpcCommand::GetEventLog { count: Some(3) }
        );
        assert_eq!(
            parse_command(r#"{"command": "set_layout_safe"}"#).unwrap(),
            IpcCommand::SetLayoutSafe { index: None }
        );
        assert_eq!(parse_command(r#"{"command": "quit"}"#).unwrap(), IpcCommand::Quit);
    }

    #[test]
    fn test_event_serialization() {
        let event = IpcEvent::TagChange {
            monitor: 0,
            old_tags: 1,
            new_tags: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.starts_with(r#"{"event":"tag_change""#));
    }

    #[test]
    fn test_socket_path_override() {
        let path = socket_path(Some(Path::new("/run/user/1000/tagwm.sock")));
        assert_eq!(path, PathBuf::from("/run/user/1000/tagwm.sock"));
        let default = socket_path(None);
        assert!(default.to_string_lossy().starts_with("/tmp/tagwm"));
    }

    #[test]
    fn test_server_round_trip_with_subscription() {
        let path = std::env::temp_dir().join(format!("tagwm-test-{}.sock", std::process::id()));
        let mut poll = mio::Poll::new().unwrap();
        let mut server = IpcServer::bind(path.clone(), poll.registry()).unwrap();
        assert_eq!(server.path(), path.as_path());

        let client = std::thread::spawn(move || {
            let mut conn = IpcConnection::connect(&path).unwrap();
            let ack = conn.send(&IpcCommand::Subscribe).unwrap();
            assert!(matches!(ack, IpcResponse::Ok));
            conn.next_event().unwrap()
        });

        let mut events = mio::Events::with_capacity(8);
        let mut broadcast = false;
        for _ in 0..100 {
            poll.poll(&mut events, Some(Duration::from_millis(50))).unwrap();
            for event in events.iter() {
                if event.token() == LISTENER {
                    server.accept();
                    continue;
                }
                for request in server.read_requests(event.token()) {
                    assert_eq!(request.unwrap(), IpcCommand::Subscribe);
                    server.subscribe(event.token());
                    server.respond(event.token(), &IpcResponse::Ok);
                    server.broadcast(&IpcEvent::TagChange {
                        monitor: 0,
                        old_tags: 1,
                        new_tags: 4,
                    });
                    broadcast = true;
                }
            }
            if broadcast {
                break;
            }
        }

        assert!(broadcast);
        assert_eq!(server.connection_count(), 1);
        match client.join().unwrap() {
            IpcEvent::TagChange { new_tags, .. } => assert_eq!(new_tags, 4),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_unterminated_request_is_cut_off() {
        let path = std::env::temp_dir().join(format!("tagwm-long-{}.sock", std::process::id()));
        let mut poll = mio::Poll::new().unwrap();
        let mut server = IpcServer::bind(path.clone(), poll.registry()).unwrap();

        let client = std::thread::spawn(move || {
            let mut stream = std::os::unix::net::UnixStream::connect(&path).unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            // The tail may be refused once the server gives up on the line
            let _ = stream.write_all(&vec![b'a'; MAX_REQUEST_LINE + 8192]);
            let mut line = String::new();
            BufReader::new(&stream).read_line(&mut line).unwrap();
            line
        });

        let mut events = mio::Events::with_capacity(8);
        let mut rejected = 0;
        for _ in 0..200 {
            poll.poll(&mut events, Some(Duration::from_millis(50))).unwrap();
            for event in events.iter() {
                if event.token() == LISTENER {
                    server.accept();
                    continue;
                }
                for request in server.read_requests(event.token()) {
                    let response = request.unwrap_err();
                    server.respond(event.token(), &response);
                    rejected += 1;
                }
                server.finish(event.token());
            }
            if client.is_finished() {
                break;
            }
        }

        assert_eq!(rejected, 1);
        assert_eq!(server.connection_count(), 0);
        let response: serde_json::Value = serde_json::from_str(&client.join().unwrap()).unwrap();
        assert_eq!(response["code"], "parse_error");
    }
}
