//! Client and monitor registry.
//!
//! Clients and monitors live in slotmap arenas. Each monitor keeps two
//! ordered lists of client keys: the membership list (layout order) and
//! the focus stack (most recently focused first). A swallowed client stays
//! in the arena but is on neither list.

use slotmap::SlotMap;
use x11rb::protocol::xproto::Window;

use crate::client::{Client, ClientId};
use crate::config::Config;
use crate::layout::{Layout, LayoutInput, LayoutKind, Tiled};
use crate::monitor::{Monitor, MonitorId};
use crate::types::Rect;

pub struct Registry {
    pub clients: SlotMap<ClientId, Client>,
    pub monitors: SlotMap<MonitorId, Monitor>,
    /// Monitors in output order
    pub order: Vec<MonitorId>,
    pub selmon: MonitorId,
    pub layouts: Vec<Layout>,
    pub tag_mask: u32,
}

impl Registry {
    /// Create the registry with one monitor per output rectangle
    pub fn new(config: &Config, outputs: &[Rect]) -> Self {
        let mut reg = Self {
            clients: SlotMap::with_key(),
            monitors: SlotMap::with_key(),
            order: Vec::new(),
            selmon: MonitorId::default(),
            layouts: config.layouts.clone(),
            tag_mask: config.tag_mask(),
        };
        reg.update_geometry(config, outputs);
        reg
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    pub fn mon(&self, id: MonitorId) -> &Monitor {
        self.monitors.get(id).expect("Monitor must exist")
    }

    pub fn mon_mut(&mut self, id: MonitorId) -> &mut Monitor {
        self.monitors.get_mut(id).expect("Monitor must exist")
    }

    pub fn selmon(&self) -> &Monitor {
        self.mon(self.selmon)
    }

    /// Selected client of the selected monitor
    pub fn sel(&self) -> Option<ClientId> {
        self.selmon().sel
    }

    pub fn layout_kind(&self, mon: MonitorId) -> LayoutKind {
        self.layouts
            .get(self.mon(mon).layout())
            .map_or(LayoutKind::Floating, |l| l.kind)
    }

    /// Managed client whose current window is `win`
    pub fn win_to_client(&self, win: Window) -> Option<ClientId> {
        self.order
            .iter()
            .flat_map(|&m| self.mon(m).clients.iter().copied())
            .find(|&c| self.clients[c].win == win)
    }

    /// Client currently swallowing the client that owns `win`
    pub fn swallowing_client(&self, win: Window) -> Option<ClientId> {
        self.order
            .iter()
            .flat_map(|&m| self.mon(m).clients.iter().copied())
            .find(|&c| {
                self.clients[c]
                    .swallowing
                    .and_then(|s| self.clients.get(s))
                    .map_or(false, |s| s.win == win)
            })
    }

    /// All managed clients, monitor by monitor, in membership order
    pub fn all_clients(&self) -> Vec<ClientId> {
        self.order
            .iter()
            .flat_map(|&m| self.mon(m).clients.iter().copied())
            .collect()
    }

    pub fn is_visible(&self, id: ClientId) -> bool {
        self.clients
            .get(id)
            .map_or(false, |c| c.tags & self.mon(c.mon).active_tags() != 0)
    }

    /// Index of a monitor in output order
    pub fn mon_index(&self, mon: MonitorId) -> usize {
        self.order.iter().position(|&m| m == mon).unwrap_or(0)
    }

    // =========================================================================
    // List maintenance
    // =========================================================================

    /// Insert into the owning monitor's membership list. Layouts that grow
    /// towards the end of the list get new clients at the tail, every other
    /// layout at the head.
    pub fn attach(&mut self, id: ClientId) {
        let mon = self.clients[id].mon;
        let tail = self.layout_kind(mon).attach_at_tail();
        let list = &mut self.mon_mut(mon).clients;
        if tail {
            list.push(id);
        } else {
            list.insert(0, id);
        }
    }

    pub fn attach_stack(&mut self, id: ClientId) {
        let mon = self.clients[id].mon;
        self.mon_mut(mon).stack.insert(0, id);
    }

    pub fn detach(&mut self, id: ClientId) {
        let mon = self.clients[id].mon;
        self.mon_mut(mon).clients.retain(|&c| c != id);
    }

    /// Remove from the focus stack; a removed selection falls back to the
    /// most recently focused visible client
    pub fn detach_stack(&mut self, id: ClientId) {
        let mon = self.clients[id].mon;
        self.mon_mut(mon).stack.retain(|&c| c != id);
        if self.mon(mon).sel == Some(id) {
            let next = self.first_visible_in_stack(mon);
            self.mon_mut(mon).sel = next;
        }
    }

    /// Put `child` in the place of terminal `term`. The terminal's record
    /// keeps its list positions, tags and geometry but adopts the child's
    /// window; the child's record leaves both lists and holds the terminal
    /// window until `unswallow`. Returns (terminal window, child window).
    pub fn swallow(&mut self, term: ClientId, child: ClientId) -> (Window, Window) {
        self.detach(child);
        self.detach_stack(child);
        let term_win = self.clients[term].win;
        let child_win = self.clients[child].win;
        let mon = self.clients[term].mon;

        let c = &mut self.clients[child];
        c.mon = mon;
        c.win = term_win;
        let t = &mut self.clients[term];
        t.win = child_win;
        t.swallowing = Some(child);
        (term_win, child_win)
    }

    /// Give `term` its own window back and free the swallowed record.
    /// Returns the terminal window, or None if nothing was swallowed.
    pub fn unswallow(&mut self, term: ClientId) -> Option<Window> {
        let record = self.clients[term].swallowing.take()?;
        let swallowed = self.clients.remove(record)?;
        self.clients[term].win = swallowed.win;
        Some(swallowed.win)
    }

    /// Forget a hidden terminal window that went away while swallowed.
    /// Returns the client that was swallowing it.
    pub fn release_swallowed(&mut self, term_win: Window) -> Option<ClientId> {
        let owner = self.swallowing_client(term_win)?;
        if let Some(record) = self.clients[owner].swallowing.take() {
            self.clients.remove(record);
        }
        Some(owner)
    }

    /// Move a client to the head of the membership list
    pub fn pop_to_front(&mut self, id: ClientId) {
        self.detach(id);
        let mon = self.clients[id].mon;
        self.mon_mut(mon).clients.insert(0, id);
    }

    // =========================================================================
    // Queries used by focus and layout
    // =========================================================================

    pub fn first_visible_in_stack(&self, mon: MonitorId) -> Option<ClientId> {
        self.mon(mon)
            .stack
            .iter()
            .copied()
            .find(|&c| self.is_visible(c))
    }

    /// Visible non-floating clients of a monitor, in membership order
    pub fn tiled(&self, mon: MonitorId) -> Vec<ClientId> {
        self.mon(mon)
            .clients
            .iter()
            .copied()
            .filter(|&c| self.is_visible(c) && !self.clients[c].is_floating)
            .collect()
    }

    /// Snapshot of a monitor's clients for the layout engine
    pub fn layout_input(&self, mon: MonitorId) -> LayoutInput<ClientId> {
        let m = self.mon(mon);
        let to_tiled = |&id: &ClientId| {
            let c = &self.clients[id];
            Tiled {
                id,
                bw: c.bw,
                geom: c.geom,
            }
        };
        let is_tiled = |&&id: &&ClientId| self.is_visible(id) && !self.clients[id].is_floating;

        let tiled: Vec<_> = m.clients.iter().filter(is_tiled).map(to_tiled).collect();
        let stack_tiled = m.stack.iter().filter(is_tiled).map(to_tiled).collect();
        let visible = m
            .clients
            .iter()
            .filter(|&&id| self.is_visible(id))
            .map(to_tiled)
            .collect();
        let head_index = m
            .clients
            .first()
            .and_then(|head| tiled.iter().position(|t| t.id == *head));
        let selected_index = m
            .sel
            .and_then(|sel| tiled.iter().position(|t| t.id == sel));

        LayoutInput {
            tiled,
            stack_tiled,
            visible,
            head_index,
            selected_index,
        }
    }

    /// Next (`dir > 0`) or previous visible client in membership order,
    /// wrapping around
    pub fn cycle_target(&self, mon: MonitorId, from: ClientId, dir: i32) -> Option<ClientId> {
        let visible: Vec<ClientId> = self
            .mon(mon)
            .clients
            .iter()
            .copied()
            .filter(|&c| self.is_visible(c))
            .collect();
        let pos = visible.iter().position(|&c| c == from)?;
        let n = visible.len();
        let idx = if dir > 0 { (pos + 1) % n } else { (pos + n - 1) % n };
        Some(visible[idx])
    }

    /// The client `zoom` promotes: the selection, or the next tiled client
    /// if the selection already is the master
    pub fn zoom_target(&self, mon: MonitorId, sel: ClientId) -> Option<ClientId> {
        let tiled = self.tiled(mon);
        match tiled.first() {
            Some(&first) if first == sel => tiled.get(1).copied(),
            _ => Some(sel),
        }
    }

    /// Rotate the visible tiled clients by one position
    pub fn rotate_tiled(&mut self, mon: MonitorId, dir: i32) {
        let tiled = self.tiled(mon);
        if tiled.len() < 2 {
            return;
        }
        let list = &mut self.mon_mut(mon).clients;
        let slots: Vec<usize> = tiled
            .iter()
            .filter_map(|c| list.iter().position(|x| x == c))
            .collect();
        let mut rotated = tiled;
        if dir > 0 {
            rotated.rotate_right(1);
        } else {
            rotated.rotate_left(1);
        }
        for (slot, id) in slots.into_iter().zip(rotated) {
            list[slot] = id;
        }
    }

    /// Monitor `dir` steps from the selected one, wrapping around
    pub fn dir_to_mon(&self, dir: i32) -> MonitorId {
        let n = self.order.len();
        let cur = self.mon_index(self.selmon);
        let idx = if dir > 0 { (cur + 1) % n } else { (cur + n - 1) % n };
        self.order[idx]
    }

    /// Monitor with the largest overlap with `rect`, defaulting to the selected one
    pub fn rect_to_mon(&self, rect: &Rect) -> MonitorId {
        let mut best = self.selmon;
        let mut area = 0;
        for &m in &self.order {
            let a = rect.intersect_area(&self.mon(m).work);
            if a > area {
                area = a;
                best = m;
            }
        }
        best
    }

    /// First terminal whose process is an ancestor of `id`'s process
    pub fn term_for(&self, id: ClientId, is_descendant: impl Fn(u32, u32) -> bool) -> Option<ClientId> {
        let w = self.clients.get(id)?;
        if w.pid == 0 || w.is_terminal {
            return None;
        }
        self.all_clients().into_iter().find(|&c| {
            let t = &self.clients[c];
            c != id && t.is_terminal && t.swallowing.is_none() && t.pid != 0 && is_descendant(t.pid, w.pid)
        })
    }

    // =========================================================================
    // Monitor lifecycle
    // =========================================================================

    /// Reconcile the monitor list with the current outputs. Extra monitors
    /// are created, changed ones resized, and the clients of vanished ones
    /// migrated to the first monitor. Returns whether anything changed.
    pub fn update_geometry(&mut self, config: &Config, outputs: &[Rect]) -> bool {
        let mut dirty = false;

        for (i, rect) in outputs.iter().enumerate() {
            if i >= self.order.len() {
                let id = self.monitors.insert(Monitor::new(i, *rect, config));
                self.order.push(id);
                dirty = true;
            } else {
                let m = self.mon_mut(self.order[i]);
                if m.geom != *rect {
                    m.geom = *rect;
                    m.update_bar_pos();
                    dirty = true;
                }
                m.num = i;
            }
        }

        while self.order.len() > outputs.len().max(1) {
            let Some(gone) = self.order.pop() else {
                break;
            };
            let first = self.order[0];
            let clients = std::mem::take(&mut self.mon_mut(gone).clients);
            for c in clients {
                self.mon_mut(gone).stack.retain(|&s| s != c);
                self.clients[c].mon = first;
                self.attach(c);
                self.attach_stack(c);
            }
            if self.selmon == gone {
                self.selmon = first;
            }
            self.monitors.remove(gone);
            dirty = true;
        }

        if !self.monitors.contains_key(self.selmon) {
            self.selmon = self.order[0];
        }
        dirty
    }
}
