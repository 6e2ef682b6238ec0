//! tagwmctl - Command-line interface to control tagwm
//!
//! # Examples
//!
//! ```bash
//! # Get full state as JSON
//! tagwmctl state
//!
//! # Show tags 1 and 3
//! tagwmctl view 1 3
//!
//! # Move the selected client to every tag
//! tagwmctl tag all
//!
//! # Switch to the third layout
//! tagwmctl set-layout 2
//!
//! # Print change events as they happen
//! tagwmctl subscribe
//! ```

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

/// Get the socket path for this display
fn socket_path() -> PathBuf {
    let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
    let sanitized = display.replace([':', '.'], "_");
    PathBuf::from(format!("/tmp/tagwm{}.sock", sanitized))
}

/// tagwmctl - Control the tagwm window manager
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Socket path (default: /tmp/tagwm_$DISPLAY.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Output raw JSON without pretty-printing
    #[arg(long, global = true)]
    raw: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Get full WM state as JSON
    State,

    /// Get list of all managed clients
    Clients,

    /// Get list of monitors
    Monitors,

    /// Validate WM state invariants
    Validate,

    /// Get recent event log
    EventLog {
        /// Number of events to retrieve
        #[arg(short, long)]
        count: Option<usize>,
    },

    /// Print change events until interrupted
    Subscribe,

    /// Show only the given tags (1-based numbers, "all", or a 0x mask)
    View {
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Toggle the given tags in the view
    ToggleView {
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Move the selected client to the given tags
    Tag {
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Toggle the given tags on the selected client
    ToggleTag {
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Send the selected client to the next (+1) or previous (-1) monitor
    TagMon {
        #[arg(allow_hyphen_values = true)]
        dir: i32,
    },

    /// Focus the next (+1) or previous (-1) monitor
    FocusMon {
        #[arg(allow_hyphen_values = true)]
        dir: i32,
    },

    /// Focus the next (+1) or previous (-1) client
    FocusStack {
        #[arg(allow_hyphen_values = true)]
        dir: i32,
    },

    /// Swap the selected client with the master
    Zoom,

    /// Change the number of master clients
    IncNmaster {
        #[arg(allow_hyphen_values = true)]
        delta: i32,
    },

    /// Close the selected client
    KillClient,

    /// Toggle floating on the selected client
    ToggleFloating,

    /// Set the master area factor (below 1.0 adjusts relative to the current one)
    SetMfact {
        #[arg(allow_hyphen_values = true)]
        value: f32,
    },

    /// Select a layout by index, or flip to the previous layout without one
    SetLayout { index: Option<usize> },

    /// Quit the window manager
    Quit,
}

fn main() {
    let cli = Cli::parse();
    let socket_path = cli.socket.unwrap_or_else(socket_path);

    let tags = |args: &[String]| parse_tags(args).unwrap_or_else(|e| fail(&e));

    let command = match &cli.command {
        Commands::State => serde_json::json!({"command": "get_state"}),
        Commands::Clients => serde_json::json!({"command": "get_clients"}),
        Commands::Monitors => serde_json::json!({"command": "get_monitors"}),
        Commands::Validate => serde_json::json!({"command": "validate_state"}),
        Commands::EventLog { count } => serde_json::json!({"command": "get_event_log", "count": count}),
        Commands::Subscribe => serde_json::json!({"command": "subscribe"}),
        Commands::View { tags: t } => serde_json::json!({"command": "view", "tags": tags(t)}),
        Commands::ToggleView { tags: t } => {
            serde_json::json!({"command": "toggle_view", "tags": tags(t)})
        }
        Commands::Tag { tags: t } => serde_json::json!({"command": "tag", "tags": tags(t)}),
        Commands::ToggleTag { tags: t } => {
            serde_json::json!({"command": "toggle_tag", "tags": tags(t)})
        }
        Commands::TagMon { dir } => serde_json::json!({"command": "tag_mon", "dir": dir}),
        Commands::FocusMon { dir } => serde_json::json!({"command": "focus_mon", "dir": dir}),
        Commands::FocusStack { dir } => serde_json::json!({"command": "focus_stack", "dir": dir}),
        Commands::Zoom => serde_json::json!({"command": "zoom"}),
        Commands::IncNmaster { delta } => {
            serde_json::json!({"command": "inc_nmaster", "delta": delta})
        }
        Commands::KillClient => serde_json::json!({"command": "kill_client"}),
        Commands::ToggleFloating => serde_json::json!({"command": "toggle_floating"}),
        Commands::SetMfact { value } => serde_json::json!({"command": "set_mfact", "value": value}),
        Commands::SetLayout { index } => {
            serde_json::json!({"command": "set_layout_safe", "index": index})
        }
        Commands::Quit => serde_json::json!({"command": "quit"}),
    };

    let follow = matches!(cli.command, Commands::Subscribe);
    if let Err(e) = send_command(&socket_path, &command, cli.raw, follow) {
        fail(&e.to_string());
    }
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

/// Turn tag arguments into a mask: 1-based tag numbers, "all", or a raw
/// mask written as 0x...
fn parse_tags(args: &[String]) -> Result<u32, String> {
    let mut mask = 0u32;
    for arg in args {
        if arg == "all" {
            mask = u32::MAX;
        } else if let Some(hex) = arg.strip_prefix("0x") {
            mask |= u32::from_str_radix(hex, 16).map_err(|_| format!("Invalid tag mask: {}", arg))?;
        } else {
            match arg.parse::<u32>() {
                Ok(n @ 1..=32) => mask |= 1 << (n - 1),
                _ => return Err(format!("Invalid tag: {}. Use 1-32, all, or a 0x mask", arg)),
            }
        }
    }
    Ok(mask)
}

fn send_command(socket_path: &Path, command: &Value, raw: bool, follow: bool) -> std::io::Result<()> {
    let mut stream = UnixStream::connect(socket_path).map_err(|e| {
        std::io::Error::new(
            e.kind(),
            format!("Failed to connect to tagwm at {:?}: {}. Is tagwm running?", socket_path, e),
        )
    })?;

    // Set timeouts; a subscription waits for events indefinitely
    let read_timeout = if follow { None } else { Some(Duration::from_secs(10)) };
    stream.set_read_timeout(read_timeout)?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;

    // Send command
    let json = serde_json::to_string(command)?;
    writeln!(stream, "{}", json)?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    print_line(&mut reader, raw)?;

    while follow {
        print_line(&mut reader, raw)?;
    }
    Ok(())
}

/// Read one JSON line and print it, exiting on an error response
fn print_line(reader: &mut impl BufRead, raw: bool) -> std::io::Result<()> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "Connection closed by tagwm",
        ));
    }

    let value: Value = serde_json::from_str(&line).map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, format!("Invalid JSON response: {}", e))
    })?;

    // Check for error response
    if value.get("status").is_some_and(|s| s == "error") {
        let code = value.get("code").and_then(|v| v.as_str()).unwrap_or("unknown");
        let message = value.get("message").and_then(|v| v.as_str()).unwrap_or("Unknown error");
        eprintln!("Error [{}]: {}", code, message);
        std::process::exit(1);
    }

    if raw {
        println!("{}", line.trim());
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags(&args(&["1"])), Ok(1));
        assert_eq!(parse_tags(&args(&["1", "3"])), Ok(0b101));
        assert_eq!(parse_tags(&args(&["0x1ff"])), Ok(0x1ff));
        assert_eq!(parse_tags(&args(&["all"])), Ok(u32::MAX));
    }

    #[test]
    fn test_parse_tags_rejects_out_of_range() {
        assert!(parse_tags(&args(&["0"])).is_err());
        assert!(parse_tags(&args(&["33"])).is_err());
        assert!(parse_tags(&args(&["web"])).is_err());
    }
}
