//! Focus, urgency and pointer-button grabs.

use anyhow::Result;
use x11rb::protocol::xproto::*;
use x11rb::wrapper::ConnectionExt as _;

use crate::client::ClientId;
use crate::hints::WmHints;
use crate::layout::LayoutKind;
use crate::tracing::StateTransition;
use crate::window_query;
use crate::Wm;

/// Buttons grabbed on client windows together with the window manager modifier
pub const CLIENT_BUTTONS: [ButtonIndex; 3] = [ButtonIndex::M1, ButtonIndex::M2, ButtonIndex::M3];

impl Wm {
    /// Focus `candidate`, or the most recently focused visible client of
    /// the selected monitor if it is absent or hidden
    pub fn focus(&mut self, candidate: Option<ClientId>) -> Result<()> {
        let selmon = self.reg.selmon;
        let target = candidate
            .filter(|&c| self.reg.is_visible(c))
            .or_else(|| self.reg.first_visible_in_stack(selmon));

        let previous = self.reg.mon(selmon).sel;
        if let Some(prev) = previous.filter(|&p| Some(p) != target) {
            self.unfocus(prev, false)?;
        }

        if let Some(id) = target {
            self.reg.selmon = self.reg.clients[id].mon;
            if self.reg.clients[id].is_urgent {
                self.set_urgent(id, false)?;
            }
            self.reg.detach_stack(id);
            self.reg.attach_stack(id);
            self.grab_buttons(id, true)?;
            self.conn.change_window_attributes(
                self.reg.clients[id].win,
                &ChangeWindowAttributesAux::new().border_pixel(self.colors.selected),
            )?;
            self.set_focus(id)?;
        } else {
            self.conn
                .set_input_focus(InputFocus::POINTER_ROOT, self.root, x11rb::CURRENT_TIME)?;
            self.conn
                .delete_property(self.root, self.atoms.net_active_window)?;
        }

        let selmon = self.reg.selmon;
        self.reg.mon_mut(selmon).sel = target;

        if previous != target {
            let window_of = |c: Option<ClientId>| c.and_then(|c| self.reg.client(c)).map(|c| c.win);
            let transition = StateTransition::FocusChanged {
                from: window_of(previous),
                to: window_of(target),
            };
            self.tracer.trace_transition(&transition);
        }

        // Deck and monocle placement depends on the selection
        if matches!(
            self.reg.layout_kind(selmon),
            LayoutKind::Monocle | LayoutKind::Deck
        ) {
            self.arrange(Some(selmon))?;
        }
        Ok(())
    }

    /// Drop focus decorations from a client. With `set_focus` the input
    /// focus goes back to the root window.
    pub fn unfocus(&mut self, id: ClientId, set_focus: bool) -> Result<()> {
        let Some(win) = self.reg.client(id).map(|c| c.win) else {
            return Ok(());
        };
        self.grab_buttons(id, false)?;
        self.conn.change_window_attributes(
            win,
            &ChangeWindowAttributesAux::new().border_pixel(self.colors.normal),
        )?;
        if set_focus {
            self.conn
                .set_input_focus(InputFocus::POINTER_ROOT, self.root, x11rb::CURRENT_TIME)?;
            self.conn
                .delete_property(self.root, self.atoms.net_active_window)?;
        }
        Ok(())
    }

    /// Give a client the input focus unless it refuses it, and offer
    /// WM_TAKE_FOCUS either way
    pub fn set_focus(&self, id: ClientId) -> Result<()> {
        let c = &self.reg.clients[id];
        if !c.never_focus {
            self.conn
                .set_input_focus(InputFocus::POINTER_ROOT, c.win, x11rb::CURRENT_TIME)?;
            self.conn.change_property32(
                PropMode::REPLACE,
                self.root,
                self.atoms.net_active_window,
                AtomEnum::WINDOW,
                &[c.win],
            )?;
        }
        window_query::send_protocol(&self.conn, &self.atoms, c.win, self.atoms.wm_take_focus)?;
        Ok(())
    }

    /// Set or clear a client's urgency, mirroring it into WM_HINTS
    pub fn set_urgent(&mut self, id: ClientId, urgent: bool) -> Result<()> {
        let Some(c) = self.reg.client_mut(id) else {
            return Ok(());
        };
        c.is_urgent = urgent;
        let win = c.win;
        if urgent {
            self.conn.change_window_attributes(
                win,
                &ChangeWindowAttributesAux::new().border_pixel(self.colors.urgent),
            )?;
        }
        let values = window_query::get_wm_hints(&self.conn, win);
        if values.is_empty() {
            return Ok(());
        }
        self.conn.change_property32(
            PropMode::REPLACE,
            win,
            AtomEnum::WM_HINTS,
            AtomEnum::WM_HINTS,
            &WmHints::with_urgency(&values, urgent),
        )?;
        Ok(())
    }

    /// Grab the move/float/resize buttons on a client. Unfocused clients
    /// additionally get every button grabbed so a click focuses them.
    pub fn grab_buttons(&self, id: ClientId, focused: bool) -> Result<()> {
        let Some(win) = self.reg.client(id).map(|c| c.win) else {
            return Ok(());
        };
        let button_mask = EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE;

        self.conn
            .ungrab_button(ButtonIndex::ANY, win, ModMask::ANY)?;
        if !focused {
            self.conn.grab_button(
                false,
                win,
                button_mask,
                GrabMode::SYNC,
                GrabMode::SYNC,
                x11rb::NONE,
                x11rb::NONE,
                ButtonIndex::ANY,
                ModMask::ANY,
            )?;
        }

        let modifier = self.config.mod_mask();
        for button in CLIENT_BUTTONS {
            for extra in self.lock_combinations() {
                self.conn.grab_button(
                    false,
                    win,
                    button_mask,
                    GrabMode::ASYNC,
                    GrabMode::SYNC,
                    x11rb::NONE,
                    x11rb::NONE,
                    button,
                    ModMask::from(modifier | extra),
                )?;
            }
        }
        Ok(())
    }

    /// Focus the next (`dir > 0`) or previous visible client, wrapping around
    pub fn focus_stack(&mut self, dir: i32) -> Result<()> {
        let Some(sel) = self.reg.sel() else {
            return Ok(());
        };
        if self.config.general.lock_fullscreen && self.reg.clients[sel].is_fullscreen {
            return Ok(());
        }
        let selmon = self.reg.selmon;
        let Some(target) = self.reg.cycle_target(selmon, sel, dir) else {
            return Ok(());
        };
        self.focus(Some(target))?;
        self.restack(selmon)?;
        self.warp_to_center(target)
    }

    /// Move the pointer to the middle of a client
    pub fn warp_to_center(&self, id: ClientId) -> Result<()> {
        let Some(c) = self.reg.client(id) else {
            return Ok(());
        };
        self.conn.warp_pointer(
            x11rb::NONE,
            c.win,
            0,
            0,
            0,
            0,
            (c.geom.width / 2) as i16,
            (c.geom.height / 2) as i16,
        )?;
        Ok(())
    }

    /// Select the next (`dir > 0`) or previous monitor
    pub fn focus_mon(&mut self, dir: i32) -> Result<()> {
        if self.reg.order.len() <= 1 {
            return Ok(());
        }
        let target = self.reg.dir_to_mon(dir);
        if target == self.reg.selmon {
            return Ok(());
        }
        if let Some(sel) = self.reg.sel() {
            self.unfocus(sel, false)?;
        }
        self.reg.selmon = target;
        self.focus(None)
    }
}
