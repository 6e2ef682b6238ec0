//! Commands shared by key bindings and the control protocol.

use anyhow::Result;
use x11rb::protocol::xproto::*;

use crate::config::WmAction;
use crate::layout::LayoutKind;
use crate::window_query;
use crate::Wm;

impl Wm {
    pub fn execute_action(&mut self, action: WmAction) -> Result<()> {
        match action {
            WmAction::View(mask) => self.view(mask)?,
            WmAction::ToggleView(mask) => self.toggle_view(mask)?,
            WmAction::Tag(mask) => self.tag(mask)?,
            WmAction::ToggleTag(mask) => self.toggle_tag(mask)?,
            WmAction::ViewPrevious => self.view(0)?,
            WmAction::ViewNext => self.view_adjacent(true)?,
            WmAction::ViewPrev => self.view_adjacent(false)?,
            WmAction::TagToNext => self.tag_to_adjacent(true)?,
            WmAction::TagToPrev => self.tag_to_adjacent(false)?,
            WmAction::FocusStack(dir) => self.focus_stack(dir)?,
            WmAction::RotateStack(dir) => self.rotate_stack(dir)?,
            WmAction::FocusMon(dir) => self.focus_mon(dir)?,
            WmAction::TagMon(dir) => self.tag_mon(dir)?,
            WmAction::IncNmaster(delta) => self.inc_nmaster(delta)?,
            WmAction::SetMfact(f) => {
                self.set_mfact(f)?;
            }
            WmAction::SetLayout(index) => {
                self.set_layout_safe(index)?;
            }
            WmAction::SetGaps(delta) => self.set_gaps(delta)?,
            WmAction::Zoom => self.zoom()?,
            WmAction::KillClient => self.kill_client()?,
            WmAction::ToggleFloating => self.toggle_floating()?,
            WmAction::ToggleAlwaysOnTop => self.toggle_always_on_top()?,
            WmAction::ToggleBar => self.toggle_bar()?,
            WmAction::ToggleTrueFullscreen => self.toggle_true_fullscreen()?,
            WmAction::ToggleScratch(key) => self.toggle_scratch(key)?,
            WmAction::Quit => {
                log::info!("Quitting window manager");
                self.running = false;
            }
        }
        Ok(())
    }

    /// Swap the selection with the master, or promote the next tiled
    /// client if the selection already is the master
    pub fn zoom(&mut self) -> Result<()> {
        let selmon = self.reg.selmon;
        let Some(sel) = self.reg.sel() else {
            return Ok(());
        };
        if !self.reg.layout_kind(selmon).arranges() || self.reg.clients[sel].is_floating {
            return Ok(());
        }
        let Some(target) = self.reg.zoom_target(selmon, sel) else {
            return Ok(());
        };
        self.reg.pop_to_front(target);
        self.focus(Some(target))?;
        self.arrange(Some(selmon))
    }

    /// Rotate the tiled clients, keeping the selection
    pub fn rotate_stack(&mut self, dir: i32) -> Result<()> {
        let selmon = self.reg.selmon;
        let sel = self.reg.sel();
        self.reg.rotate_tiled(selmon, dir);
        self.arrange(Some(selmon))?;
        if let Some(sel) = sel {
            self.focus(Some(sel))?;
            self.restack(selmon)?;
        }
        Ok(())
    }

    /// Ask the selected client to close, or kill it if it does not
    /// speak WM_DELETE_WINDOW
    pub fn kill_client(&mut self) -> Result<()> {
        let Some(win) = self.reg.sel().map(|c| self.reg.clients[c].win) else {
            return Ok(());
        };
        if !window_query::send_protocol(&self.conn, &self.atoms, win, self.atoms.wm_delete_window)? {
            log::info!("Killing client of window 0x{:x}", win);
            self.conn.grab_server()?;
            self.conn.set_close_down_mode(CloseDown::DESTROY_ALL)?;
            self.conn.kill_client(win)?;
            self.conn.ungrab_server()?;
        }
        Ok(())
    }

    pub fn toggle_floating(&mut self) -> Result<()> {
        let selmon = self.reg.selmon;
        let Some(sel) = self.reg.sel() else {
            return Ok(());
        };
        let c = &mut self.reg.clients[sel];
        if c.is_fullscreen {
            return Ok(());
        }
        c.is_floating = !c.is_floating || c.is_fixed;
        if c.is_floating {
            let geom = c.geom;
            self.resize(sel, geom, false)?;
        } else {
            c.always_on_top = false;
        }
        self.arrange(Some(selmon))
    }

    /// Keep the selection above everything else. Only one client is
    /// always-on-top at a time.
    pub fn toggle_always_on_top(&mut self) -> Result<()> {
        let selmon = self.reg.selmon;
        let Some(sel) = self.reg.sel() else {
            return Ok(());
        };
        if self.reg.clients[sel].is_fullscreen {
            return Ok(());
        }
        if self.reg.clients[sel].always_on_top {
            self.reg.clients[sel].always_on_top = false;
        } else {
            for (_, c) in self.reg.clients.iter_mut() {
                c.always_on_top = false;
            }
            let c = &mut self.reg.clients[sel];
            c.is_floating = true;
            c.always_on_top = true;
        }
        self.arrange(Some(selmon))
    }

    /// Show or hide the scratchpad client bound to `key` on the selected monitor
    pub fn toggle_scratch(&mut self, key: char) -> Result<()> {
        let selmon = self.reg.selmon;
        let found = self
            .reg
            .mon(selmon)
            .clients
            .iter()
            .copied()
            .find(|&c| self.reg.clients[c].scratch_key == Some(key));
        let Some(id) = found else {
            log::info!("No scratchpad window for '{}', launching one is not supported", key);
            return Ok(());
        };

        let m = self.reg.mon(selmon);
        let (active, parked_y) = (m.active_tags(), m.geom.bottom() + 10);
        let visible = self.reg.is_visible(id);
        let c = &mut self.reg.clients[id];
        if visible {
            c.scratch_pos = (c.geom.x, c.geom.y);
            c.geom.y = parked_y;
            c.tags = 0;
        } else {
            (c.geom.x, c.geom.y) = c.scratch_pos;
            c.tags = active;
        }
        let (win, x, y) = (c.win, c.geom.x, c.geom.y);
        self.move_window(win, x, y)?;

        self.focus(None)?;
        self.arrange(Some(selmon))?;
        if self.reg.is_visible(id) {
            self.focus(Some(id))?;
            self.restack(selmon)?;
        }
        Ok(())
    }

    /// Switch the selected monitor into the true-fullscreen layout, or
    /// back to the layout it had before
    pub fn toggle_true_fullscreen(&mut self) -> Result<()> {
        let selmon = self.reg.selmon;
        if self.reg.layout_kind(selmon) != LayoutKind::TrueFullscreen {
            let Some(index) = self
                .config
                .layouts
                .iter()
                .position(|l| l.kind == LayoutKind::TrueFullscreen)
            else {
                log::warn!("No true-fullscreen layout configured");
                return Ok(());
            };
            let m = self.reg.mon_mut(selmon);
            m.last_layout = Some(m.layout());
            return self.set_layout(Some(index));
        }

        if let Some(last) = self.reg.mon_mut(selmon).last_layout.take() {
            self.set_layout(Some(last))?;
        }
        let mfact = self.config.general.mfact;
        let m = self.reg.mon_mut(selmon);
        m.show_bar = true;
        m.update_bar_pos();
        m.mfact = mfact;
        let cur = m.pertag.curtag;
        m.pertag.mfacts[cur] = mfact;
        m.pertag.show_bars[cur] = true;

        let bw = self.config.general.border_width as i32;
        let forced: Vec<_> = self
            .reg
            .mon(selmon)
            .clients
            .iter()
            .copied()
            .filter(|&c| self.reg.clients[c].is_true_fullscreen)
            .collect();
        for id in forced {
            let c = &mut self.reg.clients[id];
            c.is_true_fullscreen = false;
            c.is_floating = c.is_fixed;
            c.bw = bw;
            let geom = c.geom;
            self.resize_client(id, geom)?;
        }
        self.arrange(Some(selmon))
    }

    /// Send the selected client to the next (`dir > 0`) or previous monitor
    pub fn tag_mon(&mut self, dir: i32) -> Result<()> {
        let Some(sel) = self.reg.sel() else {
            return Ok(());
        };
        if self.reg.order.len() <= 1 {
            return Ok(());
        }
        let target = self.reg.dir_to_mon(dir);
        self.send_mon(sel, target)
    }
}
