//! Event handling for X11 events.
//!
//! Contains all event dispatch and handling logic for the window manager,
//! separated from main.rs for maintainability.

use anyhow::Result;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::protocol::{ErrorKind, Event};
use x11rb::x11_utils::X11Error;

use crate::monitor::probe_outputs;
use crate::types::Rect;
use crate::window_query;
use crate::Wm;

/// Whether an asynchronous X error is expected during normal operation.
///
/// Windows can vanish at any moment, so requests on them fail with
/// BadWindow; a few other request/error pairs are equally harmless.
pub fn is_benign_error(major_opcode: u8, kind: ErrorKind) -> bool {
    kind == ErrorKind::Window
        || matches!(
            (major_opcode, kind),
            (SET_INPUT_FOCUS_REQUEST, ErrorKind::Match)
                | (POLY_TEXT8_REQUEST, ErrorKind::Drawable)
                | (POLY_FILL_RECTANGLE_REQUEST, ErrorKind::Drawable)
                | (POLY_SEGMENT_REQUEST, ErrorKind::Drawable)
                | (CONFIGURE_WINDOW_REQUEST, ErrorKind::Match)
                | (GRAB_BUTTON_REQUEST, ErrorKind::Access)
                | (GRAB_KEY_REQUEST, ErrorKind::Access)
                | (COPY_AREA_REQUEST, ErrorKind::Drawable)
        )
}

/// Strip lock modifiers from an event state, keeping Shift, Control and Mod1-5
pub fn clean_mask(state: u16, numlock: u16) -> u16 {
    let relevant = u16::from(
        ModMask::SHIFT | ModMask::CONTROL | ModMask::M1 | ModMask::M2 | ModMask::M3 | ModMask::M4 | ModMask::M5,
    );
    state & !(numlock | u16::from(ModMask::LOCK)) & relevant
}

impl Wm {
    /// Handle an X11 event
    pub fn handle_event(&mut self, event: Event) -> Result<()> {
        // A drag only needs motion and release; map, configure and expose
        // requests still go through, everything else waits for the drop
        if self.drag.is_some() {
            match event {
                Event::MotionNotify(e) => return self.drag_motion(&e),
                Event::ButtonRelease(_) => {
                    self.tracer.trace_x11_event("ButtonRelease", None, "drag end");
                    return self.drag_release();
                }
                Event::ConfigureRequest(_)
                | Event::Expose(_)
                | Event::MapRequest(_)
                | Event::Error(_) => {}
                other => {
                    self.deferred.push_back(other);
                    return Ok(());
                }
            }
        }

        match event {
            Event::MapRequest(e) => {
                self.tracer.trace_x11_event("MapRequest", Some(e.window), "");
                log::debug!("MapRequest for window 0x{:x}", e.window);
                self.handle_map_request(e)?;
            }

            Event::UnmapNotify(e) => {
                self.tracer.trace_x11_event("UnmapNotify", Some(e.window), "");
                if let Some(id) = self.reg.win_to_client(e.window) {
                    // Synthetic unmaps announce withdrawal, real ones mean the window is gone
                    if e.response_type & 0x80 != 0 {
                        self.set_client_state(e.window, crate::manage::WITHDRAWN_STATE)?;
                    } else {
                        self.unmanage(id, false)?;
                    }
                }
            }

            Event::DestroyNotify(e) => {
                self.tracer.trace_x11_event("DestroyNotify", Some(e.window), "");
                log::debug!("DestroyNotify for window 0x{:x}", e.window);
                if let Some(id) = self.reg.win_to_client(e.window) {
                    self.unmanage(id, true)?;
                } else if let Some(term) = self.reg.swallowing_client(e.window) {
                    if let Some(swallowed) = self.reg.clients[term].swallowing {
                        self.unmanage(swallowed, true)?;
                    }
                }
            }

            Event::ConfigureRequest(e) => {
                self.tracer.trace_x11_event("ConfigureRequest", Some(e.window), "");
                self.handle_configure_request(e)?;
            }

            Event::ConfigureNotify(e) => {
                if e.window == self.root {
                    self.tracer.trace_x11_event(
                        "ConfigureNotify",
                        Some(e.window),
                        &format!("{}x{}", e.width, e.height),
                    );
                    self.update_outputs()?;
                }
            }

            Event::EnterNotify(e) => {
                self.tracer.trace_x11_event("EnterNotify", Some(e.event), "");
                self.handle_enter_notify(e)?;
            }

            Event::MotionNotify(e) => {
                if e.event == self.root {
                    self.handle_root_motion(e.root_x as i32, e.root_y as i32)?;
                }
            }

            Event::FocusIn(e) => {
                // Some clients grab focus on their own; give it back to the selection
                if let Some(sel) = self.reg.sel() {
                    if e.event != self.reg.clients[sel].win {
                        self.set_focus(sel)?;
                    }
                }
            }

            Event::KeyPress(e) => {
                self.tracer.trace_x11_event("KeyPress", None, &format!("keycode={}", e.detail));
                self.handle_key_press(e)?;
            }

            Event::ButtonPress(e) => {
                self.tracer.trace_x11_event("ButtonPress", Some(e.event), &format!("button={}", e.detail));
                self.handle_button_press(e)?;
            }

            Event::PropertyNotify(e) => {
                self.tracer.trace_x11_event("PropertyNotify", Some(e.window), &format!("atom={}", e.atom));
                self.handle_property_notify(e)?;
            }

            Event::ClientMessage(e) => {
                self.tracer.trace_x11_event(
                    "ClientMessage",
                    Some(e.window),
                    &format!("type={}", e.type_),
                );
                self.handle_client_message(e)?;
            }

            Event::MappingNotify(e) => {
                self.tracer.trace_x11_event("MappingNotify", None, &format!("request={:?}", e.request));
                // Re-grab keys when keyboard mapping changes (Modifier or Keyboard, not Pointer)
                if e.request != Mapping::POINTER {
                    log::info!("Keyboard mapping changed, re-grabbing keys");
                    self.update_numlock_mask()?;
                    self.grab_keys()?;
                }
            }

            Event::Error(err) => self.handle_x_error(&err),

            _ => {}
        }

        Ok(())
    }

    fn handle_x_error(&mut self, err: &X11Error) {
        if is_benign_error(err.major_opcode, err.error_kind) {
            log::debug!(
                "Ignoring X error {:?} for request {} (resource 0x{:x})",
                err.error_kind,
                err.major_opcode,
                err.bad_value
            );
            return;
        }
        log::error!(
            "Fatal X error {:?} for request {} (resource 0x{:x})",
            err.error_kind,
            err.major_opcode,
            err.bad_value
        );
        self.tracer.trace_x11_event("Error", None, &format!("{:?}", err.error_kind));
        self.running = false;
    }

    fn handle_map_request(&mut self, event: MapRequestEvent) -> Result<()> {
        let Ok(attrs) = self.conn.get_window_attributes(event.window)?.reply() else {
            return Ok(());
        };
        if attrs.override_redirect || self.reg.win_to_client(event.window).is_some() {
            return Ok(());
        }
        self.manage(event.window)
    }

    /// Honour geometry requests from floating clients (and all clients
    /// under a non-arranging layout); tiled clients are told their
    /// current geometry instead
    fn handle_configure_request(&mut self, event: ConfigureRequestEvent) -> Result<()> {
        let Some(id) = self.reg.win_to_client(event.window) else {
            let aux = ConfigureWindowAux::from_configure_request(&event);
            self.conn.configure_window(event.window, &aux)?;
            return Ok(());
        };

        let has = |flag: ConfigWindow| u16::from(event.value_mask) & u16::from(flag) != 0;
        let mon = self.reg.clients[id].mon;
        let arranges = self.reg.layout_kind(mon).arranges();
        let m = self.reg.mon(mon).geom;
        let visible = self.reg.is_visible(id);
        let c = &mut self.reg.clients[id];

        if has(ConfigWindow::BORDER_WIDTH) {
            c.bw = event.border_width as i32;
        } else if c.is_floating || !arranges {
            if has(ConfigWindow::X) {
                c.old_geom.x = c.geom.x;
                c.geom.x = m.x + event.x as i32;
            }
            if has(ConfigWindow::Y) {
                c.old_geom.y = c.geom.y;
                c.geom.y = m.y + event.y as i32;
            }
            if has(ConfigWindow::WIDTH) {
                c.old_geom.width = c.geom.width;
                c.geom.width = event.width as i32;
            }
            if has(ConfigWindow::HEIGHT) {
                c.old_geom.height = c.geom.height;
                c.geom.height = event.height as i32;
            }
            if c.geom.x + c.geom.width > m.right() && c.is_floating {
                c.geom.x = m.center_x() - c.outer_width() / 2;
            }
            if c.geom.y + c.geom.height > m.bottom() && c.is_floating {
                c.geom.y = m.center_y() - c.outer_height() / 2;
            }
            let (win, geom) = (c.win, c.geom);
            let moved_only = (has(ConfigWindow::X) || has(ConfigWindow::Y))
                && !(has(ConfigWindow::WIDTH) || has(ConfigWindow::HEIGHT));
            if moved_only {
                self.configure(id)?;
            }
            if visible {
                self.move_resize(win, geom)?;
            }
        } else {
            self.configure(id)?;
        }
        Ok(())
    }

    /// Re-read the output layout after the root window changed size
    fn update_outputs(&mut self) -> Result<()> {
        let outputs = probe_outputs(&self.conn, self.root, self.screen_num)?;
        if !self.reg.update_geometry(&self.config, &outputs) {
            return Ok(());
        }
        let fullscreen: Vec<_> = self
            .reg
            .all_clients()
            .into_iter()
            .filter(|&c| self.reg.clients[c].is_fullscreen)
            .collect();
        for id in fullscreen {
            let rect = self.reg.mon(self.reg.clients[id].mon).geom;
            self.resize_client(id, rect)?;
        }
        self.focus(None)?;
        self.arrange(None)
    }

    /// Focus follows the pointer into clients and across monitors
    fn handle_enter_notify(&mut self, event: EnterNotifyEvent) -> Result<()> {
        if (event.mode != NotifyMode::NORMAL || event.detail == NotifyDetail::INFERIOR)
            && event.event != self.root
        {
            return Ok(());
        }
        let client = self.reg.win_to_client(event.event);
        let mon = match client {
            Some(c) => self.reg.clients[c].mon,
            None => self.pointer_mon(event.root_x as i32, event.root_y as i32),
        };
        if mon != self.reg.selmon {
            if let Some(sel) = self.reg.sel() {
                self.unfocus(sel, true)?;
            }
            self.reg.selmon = mon;
        } else if client.is_none() || client == self.reg.sel() {
            return Ok(());
        }
        self.focus(client)
    }

    fn handle_root_motion(&mut self, x: i32, y: i32) -> Result<()> {
        let mon = self.pointer_mon(x, y);
        if let Some(last) = self.motion_mon {
            if mon != last {
                if let Some(sel) = self.reg.sel() {
                    self.unfocus(sel, true)?;
                }
                self.reg.selmon = mon;
                self.focus(None)?;
            }
        }
        self.motion_mon = Some(mon);
        Ok(())
    }

    fn pointer_mon(&self, x: i32, y: i32) -> crate::monitor::MonitorId {
        self.reg.rect_to_mon(&Rect::new(x, y, 1, 1))
    }

    fn handle_button_press(&mut self, event: ButtonPressEvent) -> Result<()> {
        let client = self.reg.win_to_client(event.event);
        let mon = match client {
            Some(c) => self.reg.clients[c].mon,
            None => self.pointer_mon(event.root_x as i32, event.root_y as i32),
        };
        if mon != self.reg.selmon {
            if let Some(sel) = self.reg.sel() {
                self.unfocus(sel, true)?;
            }
            self.reg.selmon = mon;
            self.focus(None)?;
        }

        let Some(id) = client else {
            return Ok(());
        };
        self.focus(Some(id))?;
        self.restack(self.reg.selmon)?;
        self.conn
            .allow_events(Allow::REPLAY_POINTER, x11rb::CURRENT_TIME)?;

        let state = clean_mask(u16::from(event.state), self.numlock_mask);
        if state != clean_mask(self.config.mod_mask(), self.numlock_mask) {
            return Ok(());
        }
        match event.detail {
            1 => self.start_move(id)?,
            2 => self.toggle_floating()?,
            3 => self.start_resize(id)?,
            _ => {}
        }
        Ok(())
    }

    fn handle_property_notify(&mut self, event: PropertyNotifyEvent) -> Result<()> {
        if event.state == Property::DELETE {
            return Ok(());
        }
        let Some(id) = self.reg.win_to_client(event.window) else {
            return Ok(());
        };
        let atom = event.atom;

        if atom == u32::from(AtomEnum::WM_TRANSIENT_FOR) {
            let parent = window_query::get_transient_for(&self.conn, event.window)
                .and_then(|t| self.reg.win_to_client(t));
            if !self.reg.clients[id].is_floating && parent.is_some() {
                self.reg.clients[id].is_floating = true;
                let mon = self.reg.clients[id].mon;
                self.arrange(Some(mon))?;
            }
        } else if atom == u32::from(AtomEnum::WM_NORMAL_HINTS) {
            self.update_size_hints(id);
        } else if atom == u32::from(AtomEnum::WM_HINTS) {
            self.update_wm_hints(id)?;
        }

        if atom == u32::from(AtomEnum::WM_NAME) || atom == self.atoms.net_wm_name {
            self.update_title(id);
        }
        if atom == self.atoms.net_wm_window_type {
            self.update_window_type(id)?;
        }
        Ok(())
    }

    /// Handle a client message event (EWMH requests)
    fn handle_client_message(&mut self, event: ClientMessageEvent) -> Result<()> {
        let Some(id) = self.reg.win_to_client(event.window) else {
            return Ok(());
        };
        let data = event.data.as_data32();

        if event.type_ == self.atoms.net_wm_state {
            let fs = self.atoms.net_wm_state_fullscreen;
            if data[1] == fs || data[2] == fs {
                // 0 = remove, 1 = add, 2 = toggle
                let fullscreen = match data[0] {
                    1 => true,
                    2 => !self.reg.clients[id].is_fullscreen,
                    _ => false,
                };
                self.set_fullscreen(id, fullscreen)?;
            }
        } else if event.type_ == self.atoms.net_active_window {
            let c = &self.reg.clients[id];
            if self.reg.sel() != Some(id) && !c.is_urgent {
                log::info!("Window 0x{:x} asked to be activated", event.window);
                let (mon, tags) = (c.mon, c.tags);
                self.set_urgent(id, true)?;
                if mon != self.reg.selmon {
                    if let Some(sel) = self.reg.sel() {
                        self.unfocus(sel, true)?;
                    }
                    self.reg.selmon = mon;
                }
                self.view(tags)?;
            }
        }
        Ok(())
    }

    /// Handle a key press event
    fn handle_key_press(&mut self, event: KeyPressEvent) -> Result<()> {
        let state = clean_mask(u16::from(event.state), self.numlock_mask);

        // Get the keysym for this keycode
        let setup = self.conn.setup();
        let min_keycode = setup.min_keycode;
        let max_keycode = setup.max_keycode;

        let mapping = self
            .conn
            .get_keyboard_mapping(min_keycode, max_keycode - min_keycode + 1)?
            .reply()?;

        let keysyms_per_keycode = mapping.keysyms_per_keycode as usize;
        let idx = (event.detail - min_keycode) as usize * keysyms_per_keycode;
        let keysym = mapping.keysyms.get(idx).copied().unwrap_or(0);

        log::debug!(
            "KeyPress: keycode={}, keysym=0x{:x}, clean_state=0x{:x}",
            event.detail,
            keysym,
            state
        );

        let action = self
            .keybindings
            .iter()
            .find(|(binding, _)| {
                binding.keysym == keysym && clean_mask(binding.modifiers, self.numlock_mask) == state
            })
            .map(|(_, action)| action.clone());

        if let Some(action) = action {
            self.execute_action(action)?;
        }
        Ok(())
    }
}
