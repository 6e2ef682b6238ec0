//! Applying layouts to the X server: showing and hiding clients, running
//! the layout engine through the size-hint resolver, and restacking.

use anyhow::Result;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::protocol::Event;

use crate::client::ClientId;
use crate::hints::{apply_size_hints, HintContext};
use crate::layout::{self, ArrangeArea, Arranger};
use crate::monitor::MonitorId;
use crate::types::Rect;
use crate::Wm;

/// Feeds layout placements back into the window manager. The first X
/// error is kept and reported once the layout has finished.
struct WmArranger<'a> {
    wm: &'a mut Wm,
    error: Option<anyhow::Error>,
}

impl WmArranger<'_> {
    fn record(&mut self, result: Result<()>) {
        if let Err(e) = result {
            if self.error.is_none() {
                self.error = Some(e);
            }
        }
    }
}

impl Arranger<ClientId> for WmArranger<'_> {
    fn resize(&mut self, id: ClientId, rect: Rect) -> Rect {
        match self.wm.resize(id, rect, false) {
            Ok(placed) => placed,
            Err(e) => {
                self.record(Err(e));
                rect
            }
        }
    }

    fn move_window(&mut self, id: ClientId, x: i32, y: i32) {
        let Some(win) = self.wm.reg.client(id).map(|c| c.win) else {
            return;
        };
        let result = self.wm.move_window(win, x, y);
        self.record(result);
    }

    fn true_fullscreen(&mut self, id: ClientId, rect: Rect) {
        if let Some(c) = self.wm.reg.client_mut(id) {
            c.is_floating = true;
            c.is_true_fullscreen = true;
            c.bw = 0;
        }
        let result = self.wm.resize_client(id, rect);
        self.record(result);
    }
}

impl Wm {
    /// Re-layout one monitor (showing, arranging and restacking it), or
    /// every monitor when `mon` is `None`.
    pub fn arrange(&mut self, mon: Option<MonitorId>) -> Result<()> {
        match mon {
            Some(m) => {
                self.show_hide(m)?;
                self.arrange_mon(m)?;
                self.restack(m)
            }
            None => {
                let order = self.reg.order.clone();
                for &m in &order {
                    self.show_hide(m)?;
                }
                for m in order {
                    self.arrange_mon(m)?;
                }
                Ok(())
            }
        }
    }

    /// Move visible clients on screen (top of the stack first) and park
    /// hidden ones to the left of the screen (bottom of the stack first)
    fn show_hide(&mut self, mon: MonitorId) -> Result<()> {
        let dragged = self.drag.as_ref().map(|d| d.client());
        let arranges = self.reg.layout_kind(mon).arranges();
        let stack = self.reg.mon(mon).stack.clone();

        for &id in &stack {
            if Some(id) == dragged || !self.reg.is_visible(id) {
                continue;
            }
            let c = &self.reg.clients[id];
            let (win, geom) = (c.win, c.geom);
            self.move_window(win, geom.x, geom.y)?;
            if (c.is_floating || !arranges) && !c.is_fullscreen {
                self.resize(id, geom, false)?;
            }
        }

        for &id in stack.iter().rev() {
            if Some(id) == dragged || self.reg.is_visible(id) {
                continue;
            }
            let c = &self.reg.clients[id];
            self.move_window(c.win, -2 * c.outer_width(), c.geom.y)?;
        }
        Ok(())
    }

    fn arrange_mon(&mut self, mon: MonitorId) -> Result<()> {
        self.refresh_symbol(mon);
        let kind = self.reg.layout_kind(mon);
        let m = self.reg.mon(mon);
        let area = ArrangeArea {
            work: m.work,
            screen: m.geom,
            mfact: m.mfact,
            nmaster: m.nmaster,
            gap: m.gap,
        };
        let input = self.reg.layout_input(mon);

        let mut arranger = WmArranger {
            wm: self,
            error: None,
        };
        let symbol = layout::arrange(kind, &area, &input, &mut arranger);
        if let Some(e) = arranger.error {
            return Err(e);
        }
        if let Some(symbol) = symbol {
            self.reg.mon_mut(mon).symbol = symbol;
        }
        Ok(())
    }

    /// Reset a monitor's symbol to that of its active layout
    pub fn refresh_symbol(&mut self, mon: MonitorId) {
        let index = self.reg.mon(mon).layout();
        if let Some(layout) = self.config.layouts.get(index) {
            let symbol = layout.symbol.clone();
            self.reg.mon_mut(mon).symbol = symbol;
        }
    }

    /// Fix the z-order of a monitor: the selection above the tiled clients
    /// when it floats, always-on-top clients above everything, and tiled
    /// clients in focus-stack order.
    pub fn restack(&mut self, mon: MonitorId) -> Result<()> {
        let Some(sel) = self.reg.mon(mon).sel else {
            return Ok(());
        };
        let arranges = self.reg.layout_kind(mon).arranges();
        let raise = ConfigureWindowAux::new().stack_mode(StackMode::ABOVE);

        if let Some(c) = self.reg.client(sel) {
            if c.is_floating || !arranges {
                self.conn.configure_window(c.win, &raise)?;
            }
        }

        for &m in &self.reg.order {
            let on_top = self.reg.mon(m).clients.iter().find(|&&c| self.reg.clients[c].always_on_top);
            if let Some(&c) = on_top {
                self.conn.configure_window(self.reg.clients[c].win, &raise)?;
            }
        }

        if arranges {
            let mut sibling = None;
            for &id in &self.reg.mon(mon).stack {
                let c = &self.reg.clients[id];
                if c.is_floating || !self.reg.is_visible(id) {
                    continue;
                }
                let mut aux = ConfigureWindowAux::new().stack_mode(StackMode::BELOW);
                if let Some(s) = sibling {
                    aux = aux.sibling(s);
                }
                self.conn.configure_window(c.win, &aux)?;
                sibling = Some(c.win);
            }
        }

        self.conn.flush()?;
        self.discard_enter_events()
    }

    /// Drop the EnterNotify events a restack just caused, keeping every
    /// other queued event for the main loop
    pub fn discard_enter_events(&mut self) -> Result<()> {
        self.conn.get_input_focus()?.reply()?;
        while let Some(event) = self.conn.poll_for_event()? {
            if !matches!(event, Event::EnterNotify(_)) {
                self.pending.push_back(event);
            }
        }
        Ok(())
    }

    /// Resize a client through its size hints. Returns the geometry the
    /// client ended up with.
    pub fn resize(&mut self, id: ClientId, rect: Rect, interact: bool) -> Result<Rect> {
        let Some(c) = self.reg.client(id) else {
            return Ok(rect);
        };
        let m = self.reg.mon(c.mon);
        let screen = self.screen();
        let ctx = HintContext {
            interact,
            screen_width: screen.width_in_pixels as i32,
            screen_height: screen.height_in_pixels as i32,
            work_area: m.work,
            min_dimension: m.bar_height,
            honour_hints: self.config.general.resize_hints
                || c.is_floating
                || !self.reg.layout_kind(c.mon).arranges(),
        };
        let (resolved, changed) = apply_size_hints(c.geom, rect, c.bw, &c.hints, &ctx);
        if changed {
            self.resize_client(id, resolved)?;
        }
        Ok(self.reg.client(id).map_or(resolved, |c| c.geom))
    }

    /// Apply a geometry to a client verbatim
    pub fn resize_client(&mut self, id: ClientId, rect: Rect) -> Result<()> {
        let Some(c) = self.reg.client_mut(id) else {
            return Ok(());
        };
        c.old_geom = c.geom;
        c.geom = rect;
        let (win, bw) = (c.win, c.bw);
        self.conn.configure_window(
            win,
            &ConfigureWindowAux::new()
                .x(rect.x)
                .y(rect.y)
                .width(rect.width.max(1) as u32)
                .height(rect.height.max(1) as u32)
                .border_width(bw.max(0) as u32),
        )?;
        self.configure(id)
    }

    pub fn move_window(&self, win: Window, x: i32, y: i32) -> Result<()> {
        self.conn
            .configure_window(win, &ConfigureWindowAux::new().x(x).y(y))?;
        Ok(())
    }

    /// Tell a client its geometry with a synthetic ConfigureNotify
    pub fn configure(&self, id: ClientId) -> Result<()> {
        let Some(c) = self.reg.client(id) else {
            return Ok(());
        };
        let event = ConfigureNotifyEvent {
            response_type: CONFIGURE_NOTIFY_EVENT,
            sequence: 0,
            event: c.win,
            window: c.win,
            above_sibling: x11rb::NONE,
            x: c.geom.x as i16,
            y: c.geom.y as i16,
            width: c.geom.width.max(1) as u16,
            height: c.geom.height.max(1) as u16,
            border_width: c.bw.max(0) as u16,
            override_redirect: false,
        };
        self.conn
            .send_event(false, c.win, EventMask::STRUCTURE_NOTIFY, event)?;
        Ok(())
    }
}
