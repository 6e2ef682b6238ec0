//! Event tracing for debugging tagwm.
//!
//! Keeps a ring buffer of recent X events, state transitions and control
//! commands. Clients can query the log over IPC to see what happened.

use std::collections::VecDeque;
use std::time::Instant;

use crate::ipc::EventLogEntry;

/// Maximum number of events to keep in the trace buffer
const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Why a client stopped being managed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmanageReason {
    Destroyed,
    Withdrawn,
    Shutdown,
}

/// A change in window manager state worth recording
#[derive(Debug, Clone, PartialEq)]
pub enum StateTransition {
    ClientManaged { window: u32, monitor: usize, tags: u32 },
    ClientUnmanaged { window: u32, reason: UnmanageReason },
    FocusChanged { from: Option<u32>, to: Option<u32> },
    ViewChanged { monitor: usize, tags: u32 },
    ClientSentToMonitor { window: u32, monitor: usize },
    Swallowed { terminal: u32, window: u32 },
    Unswallowed { window: u32 },
}

/// Event tracer with ring buffer storage
pub struct EventTracer {
    entries: VecDeque<EventLogEntry>,
    max_entries: usize,
    sequence: u64,
    start_time: Instant,
}

impl EventTracer {
    /// Create a new event tracer with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries),
            max_entries,
            sequence: 0,
            start_time: Instant::now(),
        }
    }

    /// Milliseconds since the tracer was created
    fn timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Trace an X11 event
    pub fn trace_x11_event(&mut self, event_type: &str, window: Option<u32>, details: &str) {
        self.add_entry(event_type.to_string(), window, details.to_string());
    }

    /// Trace a state transition
    pub fn trace_transition(&mut self, transition: &StateTransition) {
        let (event_type, window, details) = match transition {
            StateTransition::ClientManaged { window, monitor, tags } => (
                "client_managed",
                Some(*window),
                format!("monitor={} tags=0x{:x}", monitor, tags),
            ),
            StateTransition::ClientUnmanaged { window, reason } => (
                "client_unmanaged",
                Some(*window),
                format!("{:?}", reason).to_lowercase(),
            ),
            StateTransition::FocusChanged { from, to } => {
                ("focus_changed", *to, format!("from={:?}", from))
            }
            StateTransition::ViewChanged { monitor, tags } => (
                "view_changed",
                None,
                format!("monitor={} tags=0x{:x}", monitor, tags),
            ),
            StateTransition::ClientSentToMonitor { window, monitor } => {
                ("client_sent_to_monitor", Some(*window), format!("monitor={}", monitor))
            }
            StateTransition::Swallowed { terminal, window } => (
                "swallowed",
                Some(*window),
                format!("terminal=0x{:x}", terminal),
            ),
            StateTransition::Unswallowed { window } => ("unswallowed", Some(*window), String::new()),
        };
        self.add_entry(event_type.to_string(), window, details);
    }

    /// Trace an IPC command
    pub fn trace_ipc(&mut self, command: &str, result: &str) {
        self.add_entry(
            "ipc_command".to_string(),
            None,
            format!("cmd={} result={}", command, result),
        );
    }

    fn add_entry(&mut self, event_type: String, window: Option<u32>, details: String) {
        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }

        self.sequence += 1;
        self.entries.push_back(EventLogEntry {
            sequence: self.sequence,
            timestamp_ms: self.timestamp(),
            event_type,
            window,
            details,
        });
    }

    /// Get the last N entries
    pub fn get_last(&self, n: usize) -> Vec<EventLogEntry> {
        let start = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(start).cloned().collect()
    }

    pub fn get_all(&self) -> Vec<EventLogEntry> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for EventTracer {
    fn default() -> Self {
        Self::new()
    }
}
