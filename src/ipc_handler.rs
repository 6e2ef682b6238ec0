//! IPC command handling for the window manager.
//!
//! Contains the handler for all IPC commands from tagwmctl and other
//! clients, the state snapshots they query, and the change detection
//! behind broadcast events.

use mio::Token;

use crate::client::ClientId;
use crate::config::WmAction;
use crate::ipc::{ClientInfo, IpcCommand, IpcEvent, IpcResponse, MonitorInfo, StateSnapshot};
use crate::monitor::MonitorId;
use crate::Wm;

/// What subscribers are told about, per monitor
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitorView {
    pub tags: u32,
    pub symbol: String,
    pub selected: Option<u32>,
    pub title: String,
}

/// The observable state compared before and after each batch of work
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BroadcastState {
    pub selmon: usize,
    pub monitors: Vec<MonitorView>,
}

/// Events describing how `new` differs from `old`
pub fn diff_events(old: &BroadcastState, new: &BroadcastState) -> Vec<IpcEvent> {
    let mut events = Vec::new();
    if old.selmon != new.selmon {
        events.push(IpcEvent::MonitorFocusChange {
            old_monitor: old.selmon,
            new_monitor: new.selmon,
        });
    }

    let blank = MonitorView::default();
    for (index, after) in new.monitors.iter().enumerate() {
        let before = old.monitors.get(index).unwrap_or(&blank);
        if before.tags != after.tags {
            events.push(IpcEvent::TagChange {
                monitor: index,
                old_tags: before.tags,
                new_tags: after.tags,
            });
        }
        if before.symbol != after.symbol {
            events.push(IpcEvent::LayoutChange {
                monitor: index,
                old_symbol: before.symbol.clone(),
                new_symbol: after.symbol.clone(),
            });
        }
        if before.selected != after.selected {
            events.push(IpcEvent::ClientFocusChange {
                monitor: index,
                old_window: before.selected,
                new_window: after.selected,
            });
        }
        if before.title != after.title {
            events.push(IpcEvent::FocusedTitleChange {
                monitor: index,
                window: after.selected,
                old_title: before.title.clone(),
                new_title: after.title.clone(),
            });
        }
    }
    events
}

/// The key binding equivalent of an action command
fn as_action(cmd: &IpcCommand) -> Option<WmAction> {
    Some(match *cmd {
        IpcCommand::View { tags } => WmAction::View(tags),
        IpcCommand::ToggleView { tags } => WmAction::ToggleView(tags),
        IpcCommand::Tag { tags } => WmAction::Tag(tags),
        IpcCommand::ToggleTag { tags } => WmAction::ToggleTag(tags),
        IpcCommand::TagMon { dir } => WmAction::TagMon(dir),
        IpcCommand::FocusMon { dir } => WmAction::FocusMon(dir),
        IpcCommand::FocusStack { dir } => WmAction::FocusStack(dir),
        IpcCommand::Zoom => WmAction::Zoom,
        IpcCommand::IncNmaster { delta } => WmAction::IncNmaster(delta),
        IpcCommand::KillClient => WmAction::KillClient,
        IpcCommand::ToggleFloating => WmAction::ToggleFloating,
        IpcCommand::Quit => WmAction::Quit,
        _ => return None,
    })
}

/// Response for a command whose X requests failed part way
fn action_failed(e: anyhow::Error) -> IpcResponse {
    log::warn!("IPC command failed: {:#}", e);
    IpcResponse::error("action_failed", format!("{:#}", e))
}

impl Wm {
    /// Read and answer every request waiting on a control connection
    pub fn service_ipc(&mut self, token: Token) {
        let Some(ipc) = self.ipc.as_mut() else {
            return;
        };
        ipc.flush(token);
        let requests = ipc.read_requests(token);

        for request in requests {
            let response = match request {
                Ok(IpcCommand::Subscribe) => {
                    if let Some(ipc) = self.ipc.as_mut() {
                        ipc.subscribe(token);
                    }
                    IpcResponse::Ok
                }
                Ok(cmd) => self.handle_ipc(cmd),
                Err(error) => error,
            };
            if let Some(ipc) = self.ipc.as_mut() {
                ipc.respond(token, &response);
            }
            self.broadcast_changes();
        }

        if let Some(ipc) = self.ipc.as_mut() {
            ipc.finish(token);
        }
    }

    /// Handle an IPC command and return a response
    pub fn handle_ipc(&mut self, cmd: IpcCommand) -> IpcResponse {
        log::debug!("Handling IPC command: {:?}", cmd);

        // Capture command name for tracing
        let cmd_name = format!("{:?}", cmd);

        let response = match cmd {
            IpcCommand::GetState => IpcResponse::State {
                data: self.snapshot_state(),
            },
            IpcCommand::GetClients => IpcResponse::Clients {
                data: self.client_info_list(),
            },
            IpcCommand::GetMonitors => IpcResponse::Monitors {
                data: self.monitor_info_list(),
            },
            IpcCommand::GetEventLog { count } => {
                let entries = match count {
                    Some(n) => self.tracer.get_last(n),
                    None => self.tracer.get_all(),
                };
                IpcResponse::EventLog { entries }
            }
            IpcCommand::ValidateState => {
                let violations = self.validate_state();
                IpcResponse::Validation {
                    valid: violations.is_empty(),
                    violations,
                }
            }
            IpcCommand::Subscribe => IpcResponse::Ok,
            IpcCommand::SetMfact { value } => match self.set_mfact(value) {
                Ok(true) => IpcResponse::Ok,
                Ok(false) => IpcResponse::error(
                    "rejected",
                    format!("mfact {} is out of range or the layout does not tile", value),
                ),
                Err(e) => action_failed(e),
            },
            IpcCommand::SetLayoutSafe { index } => match self.set_layout_safe(index) {
                Ok(true) => IpcResponse::Ok,
                Ok(false) => IpcResponse::error(
                    "invalid_layout",
                    format!(
                        "Layout index {:?} is out of range (0..{})",
                        index,
                        self.config.layouts.len()
                    ),
                ),
                Err(e) => action_failed(e),
            },
            _ => match as_action(&cmd) {
                Some(action) => match self.execute_action(action) {
                    Ok(()) => IpcResponse::Ok,
                    Err(e) => action_failed(e),
                },
                None => IpcResponse::error("invalid_command", format!("Unsupported command {:?}", cmd)),
            },
        };

        // Trace the IPC interaction
        let result_status = match &response {
            IpcResponse::Ok => "ok",
            IpcResponse::Error { .. } => "error",
            _ => "success",
        };
        self.tracer.trace_ipc(&cmd_name, result_status);

        response
    }

    /// Compare the observable state with the last broadcast and tell
    /// subscribers what changed
    pub fn broadcast_changes(&mut self) {
        let current = self.broadcast_state();
        if current == self.last_broadcast {
            return;
        }
        let events = diff_events(&self.last_broadcast, &current);
        self.last_broadcast = current;
        if let Some(ipc) = self.ipc.as_mut() {
            for event in &events {
                ipc.broadcast(event);
            }
        }
    }

    pub fn broadcast_state(&self) -> BroadcastState {
        let monitors = self
            .reg
            .order
            .iter()
            .map(|&mon| {
                let m = self.reg.mon(mon);
                let sel = m.sel.and_then(|c| self.reg.client(c));
                MonitorView {
                    tags: m.active_tags(),
                    symbol: m.symbol.clone(),
                    selected: sel.map(|c| c.win),
                    title: sel.map(|c| c.name.clone()).unwrap_or_default(),
                }
            })
            .collect();
        BroadcastState {
            selmon: self.reg.mon_index(self.reg.selmon),
            monitors,
        }
    }

    /// Create a snapshot of the current WM state for IPC
    fn snapshot_state(&self) -> StateSnapshot {
        StateSnapshot {
            selected_monitor: self.reg.mon_index(self.reg.selmon),
            focused_window: self.reg.sel().map(|c| self.reg.clients[c].win),
            tag_names: self.config.tags.clone(),
            monitors: self.monitor_info_list(),
            clients: self.client_info_list(),
        }
    }

    fn monitor_info_list(&self) -> Vec<MonitorInfo> {
        let window_of = |c: &ClientId| self.reg.clients[*c].win;
        self.reg
            .order
            .iter()
            .map(|&mon| {
                let m = self.reg.mon(mon);
                MonitorInfo {
                    index: m.num,
                    geometry: m.geom,
                    work_area: m.work,
                    tags: m.active_tags(),
                    layout: m.layout(),
                    layout_symbol: m.symbol.clone(),
                    mfact: m.mfact,
                    nmaster: m.nmaster,
                    show_bar: m.show_bar,
                    gap: m.gap,
                    selected_window: m.sel.map(|c| window_of(&c)),
                    windows: m.clients.iter().map(window_of).collect(),
                    stack: m.stack.iter().map(window_of).collect(),
                    is_selected: mon == self.reg.selmon,
                }
            })
            .collect()
    }

    /// Get information about all managed clients, in monitor and layout order
    fn client_info_list(&self) -> Vec<ClientInfo> {
        let sel = self.reg.sel();
        let mut clients = Vec::new();
        for &mon in &self.reg.order {
            for &id in &self.reg.mon(mon).clients {
                let c = &self.reg.clients[id];
                clients.push(ClientInfo {
                    window: c.win,
                    title: c.name.clone(),
                    monitor: self.reg.mon_index(c.mon),
                    tags: c.tags,
                    geometry: c.geom,
                    border_width: c.bw,
                    is_floating: c.is_floating,
                    is_fullscreen: c.is_fullscreen,
                    is_urgent: c.is_urgent,
                    is_focused: sel == Some(id),
                    is_visible: self.reg.is_visible(id),
                    pid: c.pid,
                    swallowing: c.swallowing.and_then(|s| self.reg.client(s)).map(|s| s.win),
                });
            }
        }
        clients
    }

    /// Validate WM state invariants
    fn validate_state(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let tag_mask = self.reg.tag_mask;

        if !self.reg.order.contains(&self.reg.selmon) {
            violations.push("Selected monitor is not in the monitor list".to_string());
        }

        for &mon in &self.reg.order {
            let m = self.reg.mon(mon);
            let num = m.num;
            if m.active_tags() & tag_mask == 0 {
                violations.push(format!("Monitor {} views no tags", num));
            }
            if m.clients.len() != m.stack.len() {
                violations.push(format!(
                    "Monitor {} has {} clients but {} stack entries",
                    num,
                    m.clients.len(),
                    m.stack.len()
                ));
            }
            for &id in &m.clients {
                self.validate_client(mon, id, &mut violations);
                if !m.stack.contains(&id) {
                    violations.push(format!("Client {:?} on monitor {} is missing from the stack", id, num));
                }
            }
            if let Some(sel) = m.sel {
                if !m.clients.contains(&sel) {
                    violations.push(format!("Monitor {} selects a client it does not hold", num));
                } else if !self.reg.is_visible(sel) {
                    violations.push(format!("Monitor {} selects a hidden client", num));
                }
            }
        }

        let listed: usize = self.reg.order.iter().map(|&m| self.reg.mon(m).clients.len()).sum();
        let swallowed = self
            .reg
            .clients
            .values()
            .filter_map(|c| c.swallowing)
            .count();
        if listed + swallowed != self.reg.clients.len() {
            violations.push(format!(
                "{} clients are managed but {} are listed and {} swallowed",
                self.reg.clients.len(),
                listed,
                swallowed
            ));
        }

        violations
    }

    fn validate_client(&self, mon: MonitorId, id: ClientId, violations: &mut Vec<String>) {
        let Some(c) = self.reg.client(id) else {
            violations.push(format!("Monitor lists unknown client {:?}", id));
            return;
        };
        if c.mon != mon {
            violations.push(format!("Client 0x{:x} is listed on the wrong monitor", c.win));
        }
        // Hidden scratchpads carry no tags
        if c.tags & self.reg.tag_mask == 0 && c.scratch_key.is_none() {
            violations.push(format!("Client 0x{:x} has no tags", c.win));
        }
        if c.tags & !self.reg.tag_mask != 0 {
            violations.push(format!("Client 0x{:x} has tags outside the tag mask", c.win));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(selmon: usize, views: &[(u32, &str, Option<u32>, &str)]) -> BroadcastState {
        BroadcastState {
            selmon,
            monitors: views
                .iter()
                .map(|&(tags, symbol, selected, title)| MonitorView {
                    tags,
                    symbol: symbol.to_string(),
                    selected,
                    title: title.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_no_change_no_events() {
        let s = state(0, &[(1, "[]=", Some(7), "xterm")]);
        assert!(diff_events(&s, &s.clone()).is_empty());
    }

    #[test]
    fn test_tag_and_layout_change() {
        let old = state(0, &[(1, "[]=", None, "")]);
        let new = state(0, &[(2, "[M]", None, "")]);
        let events = diff_events(&old, &new);
        assert_eq!(
            events,
            vec![
                IpcEvent::TagChange {
                    monitor: 0,
                    old_tags: 1,
                    new_tags: 2
                },
                IpcEvent::LayoutChange {
                    monitor: 0,
                    old_symbol: "[]=".to_string(),
                    new_symbol: "[M]".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_focus_change_reports_client_and_title() {
        let old = state(0, &[(1, "[]=", Some(1), "a")]);
        let new = state(0, &[(1, "[]=", Some(2), "b")]);
        let events = diff_events(&old, &new);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            IpcEvent::ClientFocusChange {
                old_window: Some(1),
                new_window: Some(2),
                ..
            }
        ));
        assert!(matches!(&events[1], IpcEvent::FocusedTitleChange { new_title, .. } if new_title == "b"));
    }

    #[test]
    fn test_title_change_alone() {
        let old = state(0, &[(1, "[]=", Some(1), "vim")]);
        let new = state(0, &[(1, "[]=", Some(1), "vim - file.rs")]);
        let events = diff_events(&old, &new);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], IpcEvent::FocusedTitleChange { window: Some(1), .. }));
    }

    #[test]
    fn test_monitor_focus_change() {
        let views = [(1, "[]=", None, ""), (1, "[]=", None, "")];
        let events = diff_events(&state(0, &views), &state(1, &views));
        assert_eq!(
            events,
            vec![IpcEvent::MonitorFocusChange {
                old_monitor: 0,
                new_monitor: 1
            }]
        );
    }

    #[test]
    fn test_new_monitor_reports_from_blank() {
        let old = state(0, &[(1, "[]=", None, "")]);
        let new = state(0, &[(1, "[]=", None, ""), (1, "[]=", None, "")]);
        let events = diff_events(&old, &new);
        assert!(events.contains(&IpcEvent::TagChange {
            monitor: 1,
            old_tags: 0,
            new_tags: 1
        }));
    }

    #[test]
    fn test_action_commands_mirror_key_bindings() {
        assert_eq!(as_action(&IpcCommand::View { tags: 4 }), Some(WmAction::View(4)));
        assert_eq!(as_action(&IpcCommand::FocusStack { dir: -1 }), Some(WmAction::FocusStack(-1)));
        assert_eq!(as_action(&IpcCommand::Quit), Some(WmAction::Quit));
        assert_eq!(as_action(&IpcCommand::GetState), None);
    }

    #[test]
    fn test_failed_commands_share_one_error_code() {
        let err = anyhow::anyhow!("BadWindow").context("Failed to set layout");
        match action_failed(err) {
            IpcResponse::Error { code, message } => {
                assert_eq!(code, "action_failed");
                assert_eq!(message, "Failed to set layout: BadWindow");
            }
            other => panic!("unexpected response {:?}", other),
        }
    }
}
