//! Client lifecycle: adopting windows, releasing them, swallowing, and
//! keeping client state in sync with window properties.

use anyhow::{Context, Result};
use x11rb::protocol::xproto::*;
use x11rb::wrapper::ConnectionExt as _;

use crate::client::{self, Client, ClientId, BROKEN};
use crate::hints::{SizeHints, WmHints};
use crate::monitor::MonitorId;
use crate::process;
use crate::tracing::{StateTransition, UnmanageReason};
use crate::types::Rect;
use crate::window_query;
use crate::Wm;

/// ICCCM WM_STATE values
pub const WITHDRAWN_STATE: u32 = 0;
pub const NORMAL_STATE: u32 = 1;
pub const ICONIC_STATE: u32 = 3;

impl Wm {
    /// Start managing a window
    pub fn manage(&mut self, win: Window) -> Result<()> {
        let g = self
            .conn
            .get_geometry(win)?
            .reply()
            .context("Failed to get window geometry")?;
        let geom = Rect::new(g.x as i32, g.y as i32, g.width as i32, g.height as i32);

        let mut c = Client::new(win, geom, g.border_width as i32, self.reg.selmon);
        c.pid = window_query::get_window_pid(&self.conn, &self.atoms, win);
        c.name = self.title_of(win);

        let parent = window_query::get_transient_for(&self.conn, win)
            .and_then(|t| self.reg.win_to_client(t));
        match parent {
            Some(p) => {
                c.mon = self.reg.clients[p].mon;
                c.tags = self.reg.clients[p].tags;
            }
            None => self.apply_rules(&mut c),
        }

        // Keep the window on its monitor and clear of a top bar
        let m = self.reg.mon(c.mon);
        if c.geom.x + c.outer_width() > m.geom.right() {
            c.geom.x = m.geom.right() - c.outer_width();
        }
        if c.geom.y + c.outer_height() > m.geom.bottom() {
            c.geom.y = m.geom.bottom() - c.outer_height();
        }
        c.geom.x = c.geom.x.max(m.geom.x);
        let center_x = c.geom.center_x();
        let under_bar = m.show_bar
            && m.top_bar
            && center_x >= m.work.x
            && center_x < m.work.right();
        c.geom.y = c.geom.y.max(if under_bar { m.work.y } else { m.geom.y });
        c.bw = self.config.general.border_width as i32;

        let id = self.reg.clients.insert(c);
        let term = match parent {
            Some(_) => None,
            None => self.reg.term_for(id, process::is_descendant),
        };

        let bw = self.reg.clients[id].bw;
        self.conn
            .configure_window(win, &ConfigureWindowAux::new().border_width(bw as u32))?;
        self.conn.change_window_attributes(
            win,
            &ChangeWindowAttributesAux::new().border_pixel(self.colors.normal),
        )?;
        self.configure(id)?;
        self.update_window_type(id)?;
        self.update_size_hints(id);
        self.update_wm_hints(id)?;

        let m = self.reg.mon(self.reg.clients[id].mon);
        let (origin, work) = (m.geom, m.work);
        let c = &mut self.reg.clients[id];
        if c.geom.x == origin.x && c.geom.y == origin.y && !c.is_fullscreen {
            c.geom.x = work.x + (work.width - c.outer_width()) / 2;
            c.geom.y = work.y + (work.height - c.outer_height()) / 2;
        }

        self.conn.change_window_attributes(
            win,
            &ChangeWindowAttributesAux::new().event_mask(
                EventMask::ENTER_WINDOW
                    | EventMask::FOCUS_CHANGE
                    | EventMask::PROPERTY_CHANGE
                    | EventMask::STRUCTURE_NOTIFY,
            ),
        )?;
        self.grab_buttons(id, false)?;

        let c = &mut self.reg.clients[id];
        if !c.is_floating {
            c.is_floating = parent.is_some() || c.is_fixed;
        }
        if c.is_floating {
            self.conn
                .configure_window(win, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;
        }

        self.reg.attach(id);
        self.reg.attach_stack(id);
        self.update_client_list()?;

        // Map off-screen first so the client sees a configure before it shows
        let screen_width = self.screen().width_in_pixels as i32;
        let c = &self.reg.clients[id];
        self.conn.configure_window(
            win,
            &ConfigureWindowAux::new()
                .x(c.geom.x + 2 * screen_width)
                .y(c.geom.y)
                .width(c.geom.width.max(1) as u32)
                .height(c.geom.height.max(1) as u32),
        )?;
        self.set_client_state(win, NORMAL_STATE)?;

        let mon = c.mon;
        let tags = c.tags;
        if mon == self.reg.selmon {
            if let Some(sel) = self.reg.sel() {
                self.unfocus(sel, false)?;
            }
        }
        self.reg.mon_mut(mon).sel = Some(id);
        self.arrange(Some(mon))?;
        self.conn.map_window(win)?;

        log::info!("Managing window 0x{:x} on tags 0x{:x}", win, tags);
        let monitor = self.reg.mon_index(mon);
        self.tracer.trace_transition(&StateTransition::ClientManaged {
            window: win,
            monitor,
            tags,
        });

        if let Some(t) = term {
            self.swallow(t, id)?;
        }
        self.focus(None)
    }

    /// Apply the rule table and the always-on-top class list to a new client
    fn apply_rules(&self, c: &mut Client) {
        let (instance, class) = window_query::get_wm_class(&self.conn, c.win);
        let or_broken = |s: String| if s.is_empty() { BROKEN.to_string() } else { s };
        let (instance, class) = (or_broken(instance), or_broken(class));

        let out = client::apply_rules(
            &self.config.rules,
            &class,
            &instance,
            &c.name,
            self.reg.tag_mask,
            self.reg.order.len(),
        );
        c.is_floating = out.is_floating;
        c.is_terminal = out.is_terminal;
        c.no_swallow = out.no_swallow;
        c.scratch_key = out.scratch_key;
        if let Some(i) = out.monitor {
            c.mon = self.reg.order[i];
        }
        c.geom.x = out.x.unwrap_or(c.geom.x);
        c.geom.y = out.y.unwrap_or(c.geom.y);
        c.geom.width = out.w.unwrap_or(c.geom.width);
        c.geom.height = out.h.unwrap_or(c.geom.height);
        c.tags = if out.tags != 0 {
            out.tags
        } else {
            self.reg.mon(c.mon).active_tags()
        };

        if self.config.always_on_top.iter().any(|cls| *cls == class) {
            c.is_floating = true;
            c.always_on_top = true;
        }
    }

    /// Stop managing a client. `destroyed` means the window is already
    /// gone and must not be touched.
    pub fn unmanage(&mut self, id: ClientId, destroyed: bool) -> Result<()> {
        let Some(c) = self.reg.client(id) else {
            return Ok(());
        };
        let (win, mon, old_bw) = (c.win, c.mon, c.old_bw);

        if c.swallowing.is_some() {
            return self.unswallow(id);
        }

        // The swallowed window of a terminal went away
        if self.reg.release_swallowed(win).is_some() {
            self.arrange(Some(mon))?;
            return self.focus(None);
        }

        self.reg.detach(id);
        self.reg.detach_stack(id);
        if !destroyed {
            self.conn.grab_server()?;
            self.conn
                .configure_window(win, &ConfigureWindowAux::new().border_width(old_bw.max(0) as u32))?
                .ignore_error();
            self.conn
                .ungrab_button(ButtonIndex::ANY, win, ModMask::ANY)?
                .ignore_error();
            self.conn
                .change_property32(
                    PropMode::REPLACE,
                    win,
                    self.atoms.wm_state,
                    self.atoms.wm_state,
                    &[WITHDRAWN_STATE, x11rb::NONE],
                )?
                .ignore_error();
            self.conn.ungrab_server()?;
        }
        self.reg.clients.remove(id);

        let reason = if destroyed {
            UnmanageReason::Destroyed
        } else if self.running {
            UnmanageReason::Withdrawn
        } else {
            UnmanageReason::Shutdown
        };
        log::info!("Unmanaged window 0x{:x} ({:?})", win, reason);
        self.tracer
            .trace_transition(&StateTransition::ClientUnmanaged { window: win, reason });

        self.arrange(Some(mon))?;
        self.focus(None)?;
        self.update_client_list()
    }

    /// Hide terminal `term` behind the new client `id`: the terminal's
    /// record takes over the new window and keeps the new client's record
    /// (holding the terminal window) for later restoration
    pub fn swallow(&mut self, term: ClientId, id: ClientId) -> Result<()> {
        let c = &self.reg.clients[id];
        if c.no_swallow || c.is_terminal {
            return Ok(());
        }

        let (term_win, new_win) = self.reg.swallow(term, id);
        let term_mon = self.reg.clients[term].mon;
        self.set_client_state(new_win, WITHDRAWN_STATE)?;
        self.conn.unmap_window(term_win)?;

        self.update_title(term);
        let geom = self.reg.clients[term].geom;
        self.move_resize(new_win, geom)?;
        self.arrange(Some(term_mon))?;
        self.configure(term)?;
        self.update_client_list()?;

        log::info!("Terminal 0x{:x} swallowed 0x{:x}", term_win, new_win);
        self.tracer.trace_transition(&StateTransition::Swallowed {
            terminal: term_win,
            window: new_win,
        });
        Ok(())
    }

    /// Give a terminal its own window back after the window it swallowed is gone
    pub fn unswallow(&mut self, term: ClientId) -> Result<()> {
        let Some(win) = self.reg.unswallow(term) else {
            return Ok(());
        };
        let mon = self.reg.clients[term].mon;

        self.set_fullscreen(term, false)?;
        self.update_title(term);
        self.arrange(Some(mon))?;
        self.conn.map_window(win)?;
        let geom = self.reg.clients[term].geom;
        self.move_resize(win, geom)?;
        self.set_client_state(win, NORMAL_STATE)?;

        self.tracer
            .trace_transition(&StateTransition::Unswallowed { window: win });
        self.focus(None)?;
        self.arrange(Some(mon))
    }

    /// Move a client to another monitor, adopting that monitor's view
    pub fn send_mon(&mut self, id: ClientId, mon: MonitorId) -> Result<()> {
        if self.reg.clients[id].mon == mon {
            return Ok(());
        }
        self.unfocus(id, true)?;
        self.reg.detach(id);
        self.reg.detach_stack(id);
        let tags = self.reg.mon(mon).active_tags();
        let c = &mut self.reg.clients[id];
        c.mon = mon;
        c.tags = tags;
        let win = c.win;
        self.reg.attach(id);
        self.reg.attach_stack(id);

        let monitor = self.reg.mon_index(mon);
        self.tracer
            .trace_transition(&StateTransition::ClientSentToMonitor { window: win, monitor });
        self.focus(None)?;
        self.arrange(None)
    }

    /// Enter or leave fullscreen: the client covers its monitor without a
    /// border and floats, and gets its old border, floating state and
    /// geometry back on leaving
    pub fn set_fullscreen(&mut self, id: ClientId, fullscreen: bool) -> Result<()> {
        let Some(c) = self.reg.client(id) else {
            return Ok(());
        };
        let (win, mon, is_fullscreen) = (c.win, c.mon, c.is_fullscreen);

        if fullscreen && !is_fullscreen {
            let rect = self.reg.mon(mon).geom;
            let c = &mut self.reg.clients[id];
            c.is_fullscreen = true;
            c.fullscreen_saved = (c.bw, c.is_floating);
            c.bw = 0;
            c.is_floating = true;
            self.conn.change_property32(
                PropMode::REPLACE,
                win,
                self.atoms.net_wm_state,
                AtomEnum::ATOM,
                &[self.atoms.net_wm_state_fullscreen],
            )?;
            self.resize_client(id, rect)?;
            self.conn
                .configure_window(win, &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE))?;
        } else if !fullscreen && is_fullscreen {
            let c = &mut self.reg.clients[id];
            c.is_fullscreen = false;
            (c.bw, c.is_floating) = c.fullscreen_saved;
            let rect = c.old_geom;
            self.conn.change_property32(
                PropMode::REPLACE,
                win,
                self.atoms.net_wm_state,
                AtomEnum::ATOM,
                &[],
            )?;
            self.resize_client(id, rect)?;
            self.arrange(Some(mon))?;
        }
        Ok(())
    }

    pub fn set_client_state(&self, win: Window, state: u32) -> Result<()> {
        self.conn.change_property32(
            PropMode::REPLACE,
            win,
            self.atoms.wm_state,
            self.atoms.wm_state,
            &[state, x11rb::NONE],
        )?;
        Ok(())
    }

    pub fn move_resize(&self, win: Window, rect: Rect) -> Result<()> {
        self.conn.configure_window(
            win,
            &ConfigureWindowAux::new()
                .x(rect.x)
                .y(rect.y)
                .width(rect.width.max(1) as u32)
                .height(rect.height.max(1) as u32),
        )?;
        Ok(())
    }

    fn title_of(&self, win: Window) -> String {
        let title = window_query::get_window_title(&self.conn, &self.atoms, win);
        if title.is_empty() {
            BROKEN.to_string()
        } else {
            title
        }
    }

    pub fn update_title(&mut self, id: ClientId) {
        let Some(win) = self.reg.client(id).map(|c| c.win) else {
            return;
        };
        let title = self.title_of(win);
        if let Some(c) = self.reg.client_mut(id) {
            c.name = title;
        }
    }

    pub fn update_size_hints(&mut self, id: ClientId) {
        let Some(win) = self.reg.client(id).map(|c| c.win) else {
            return;
        };
        let hints = SizeHints::from_wm_normal_hints(&window_query::get_normal_hints(&self.conn, win));
        if let Some(c) = self.reg.client_mut(id) {
            c.is_fixed = hints.is_fixed();
            c.hints = hints;
        }
    }

    /// Mirror WM_HINTS urgency and input into the client. The selected
    /// client never stays urgent: its urgency bit is cleared instead.
    pub fn update_wm_hints(&mut self, id: ClientId) -> Result<()> {
        let Some(win) = self.reg.client(id).map(|c| c.win) else {
            return Ok(());
        };
        let values = window_query::get_wm_hints(&self.conn, win);
        if values.is_empty() {
            return Ok(());
        }
        let hints = WmHints::from_wm_hints(&values);
        if hints.urgent && self.reg.sel() == Some(id) {
            self.conn.change_property32(
                PropMode::REPLACE,
                win,
                AtomEnum::WM_HINTS,
                AtomEnum::WM_HINTS,
                &WmHints::with_urgency(&values, false),
            )?;
        } else if let Some(c) = self.reg.client_mut(id) {
            c.is_urgent = hints.urgent;
        }
        if let Some(c) = self.reg.client_mut(id) {
            c.never_focus = hints.input == Some(false);
        }
        Ok(())
    }

    /// Fullscreen windows enter fullscreen, dialogs float
    pub fn update_window_type(&mut self, id: ClientId) -> Result<()> {
        let Some(win) = self.reg.client(id).map(|c| c.win) else {
            return Ok(());
        };
        let state = window_query::get_atom_prop(&self.conn, win, self.atoms.net_wm_state);
        let wtype = window_query::get_atom_prop(&self.conn, win, self.atoms.net_wm_window_type);

        if state == Some(self.atoms.net_wm_state_fullscreen) {
            self.set_fullscreen(id, true)?;
        }
        if wtype == Some(self.atoms.net_wm_window_type_dialog) {
            if let Some(c) = self.reg.client_mut(id) {
                c.is_floating = true;
            }
        }
        Ok(())
    }

    /// Publish every managed window in _NET_CLIENT_LIST
    pub fn update_client_list(&self) -> Result<()> {
        let windows: Vec<Window> = self
            .reg
            .all_clients()
            .iter()
            .map(|&c| self.reg.clients[c].win)
            .collect();
        self.conn.change_property32(
            PropMode::REPLACE,
            self.root,
            self.atoms.net_client_list,
            AtomEnum::WINDOW,
            &windows,
        )?;
        Ok(())
    }

    /// Adopt windows that were mapped before we started, transients last
    pub fn scan(&mut self) -> Result<()> {
        let tree = self.conn.query_tree(self.root)?.reply()?;
        let mut transients = Vec::new();

        for &win in &tree.children {
            let Ok(attrs) = self.conn.get_window_attributes(win)?.reply() else {
                continue;
            };
            if attrs.override_redirect {
                continue;
            }
            let adoptable = attrs.map_state == MapState::VIEWABLE
                || window_query::get_wm_state(&self.conn, &self.atoms, win) == Some(ICONIC_STATE);
            if !adoptable {
                continue;
            }
            if window_query::get_transient_for(&self.conn, win).is_some() {
                transients.push(win);
                continue;
            }
            log::info!("Found existing window 0x{:x}", win);
            if let Err(e) = self.manage(win) {
                log::warn!("Failed to manage existing window 0x{:x}: {}", win, e);
            }
        }

        for win in transients {
            if let Err(e) = self.manage(win) {
                log::warn!("Failed to manage existing transient 0x{:x}: {}", win, e);
            }
        }
        Ok(())
    }
}
