//! Interactive move and resize, and pointer edge switching.
//!
//! A drag is a state of the main loop rather than a loop of its own: a
//! button press enters [`DragState`], motion events update it, and the
//! button release leaves it. While a drag is active the loop only
//! dispatches the events a drag needs and holds everything else back.

use std::time::{Duration, Instant};

use anyhow::Result;
use x11rb::protocol::xproto::*;

use crate::client::ClientId;
use crate::types::Rect;
use crate::Wm;

/// Minimum event-time gap between two handled motion events (60 Hz)
const MOTION_INTERVAL_MS: u32 = 1000 / 60;
/// Cooldown between tag switches while dragging, in event time
const DRAG_SWITCH_COOLDOWN_MS: u32 = 1000;
/// Cooldown between tag switches for a resting pointer
const EDGE_COOLDOWN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragState {
    Move {
        client: ClientId,
        /// Pointer position when the drag started
        start_x: i32,
        start_y: i32,
        /// Client position when the drag started
        orig_x: i32,
        orig_y: i32,
        last_motion: u32,
        last_switch: u32,
    },
    Resize {
        client: ClientId,
        orig: Rect,
        /// Dragging the left (true) or right edge
        left: bool,
        /// Dragging the top (true) or bottom edge
        top: bool,
        last_motion: u32,
    },
}

impl DragState {
    pub fn client(&self) -> ClientId {
        match *self {
            DragState::Move { client, .. } | DragState::Resize { client, .. } => client,
        }
    }

    /// Coalesce motion: accept an event only if enough time has passed
    /// since the last accepted one
    pub fn accept_motion(&mut self, time: u32) -> bool {
        let last = match self {
            DragState::Move { last_motion, .. } | DragState::Resize { last_motion, .. } => {
                last_motion
            }
        };
        if time.wrapping_sub(*last) <= MOTION_INTERVAL_MS {
            return false;
        }
        *last = time;
        true
    }
}

/// A screen edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Left,
    Right,
}

/// Which edge of `mon` the pointer at `x` is within `threshold` of
pub fn edge_at(x: i32, mon: Rect, threshold: i32) -> Option<Edge> {
    if x < mon.x + threshold {
        Some(Edge::Left)
    } else if x > mon.right() - threshold {
        Some(Edge::Right)
    } else {
        None
    }
}

/// Shift a view one tag towards `edge`, without wrapping past the first
/// or last tag
pub fn shift_towards(active: u32, edge: Edge, ntags: usize) -> Option<u32> {
    match edge {
        Edge::Left if active > 1 => Some(active >> 1),
        Edge::Right if active < 1 << (ntags - 1) => Some(active << 1),
        _ => None,
    }
}

/// Pull a position onto the work-area edges it is within `snap` pixels of
pub fn snap_position(x: i32, y: i32, outer_w: i32, outer_h: i32, work: Rect, snap: i32) -> (i32, i32) {
    let nx = if (work.x - x).abs() < snap {
        work.x
    } else if (work.right() - (x + outer_w)).abs() < snap {
        work.right() - outer_w
    } else {
        x
    };
    let ny = if (work.y - y).abs() < snap {
        work.y
    } else if (work.bottom() - (y + outer_h)).abs() < snap {
        work.bottom() - outer_h
    } else {
        y
    };
    (nx, ny)
}

/// Geometry of a client being resized from one corner, with the pointer at (`px`, `py`)
pub fn resize_target(orig: Rect, bw: i32, left: bool, top: bool, px: i32, py: i32) -> Rect {
    let x = if left { px } else { orig.x };
    let y = if top { py } else { orig.y };
    let w = if left { orig.right() - x } else { px - orig.x - 2 * bw + 1 };
    let h = if top { orig.bottom() - y } else { py - orig.y - 2 * bw + 1 };
    Rect::new(x, y, w.max(1), h.max(1))
}

/// Whether a client rectangle covers the pointer. The left edge counts
/// only for clients spanning the whole monitor width.
pub fn covers_pointer(rect: Rect, mon_width: i32, x: i32, y: i32) -> bool {
    let past_left = if rect.width == mon_width { x >= rect.x } else { x > rect.x };
    past_left && x < rect.right() && y > rect.y && y < rect.bottom()
}

/// Edge switching for a resting pointer
#[derive(Debug, Default)]
pub struct EdgeSwitch {
    was_at_edge: bool,
    last_switch: Option<Instant>,
}

impl EdgeSwitch {
    /// Record the pointer's edge state; true when a switch should happen.
    /// Arriving at an edge switches at once, staying there repeats after
    /// the cooldown.
    pub fn should_switch(&mut self, at_edge: bool, now: Instant) -> bool {
        if !at_edge {
            self.was_at_edge = false;
            return false;
        }
        let cooled = self
            .last_switch
            .map_or(true, |t| now.duration_since(t) > EDGE_COOLDOWN);
        let fire = !self.was_at_edge || cooled;
        if fire {
            self.last_switch = Some(now);
        }
        self.was_at_edge = true;
        fire
    }
}

impl Wm {
    fn grab_drag_pointer(&self, cursor: Cursor) -> Result<bool> {
        let reply = self
            .conn
            .grab_pointer(
                false,
                self.root,
                EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE | EventMask::POINTER_MOTION,
                GrabMode::ASYNC,
                GrabMode::ASYNC,
                x11rb::NONE,
                cursor,
                x11rb::CURRENT_TIME,
            )?
            .reply()?;
        Ok(reply.status == GrabStatus::SUCCESS)
    }

    /// Begin moving a client with the pointer
    pub fn start_move(&mut self, id: ClientId) -> Result<()> {
        if self.reg.clients[id].is_fullscreen {
            return Ok(());
        }
        self.restack(self.reg.selmon)?;
        if !self.grab_drag_pointer(self.cursors.moving)? {
            return Ok(());
        }
        let pointer = self.conn.query_pointer(self.root)?.reply()?;
        let c = &self.reg.clients[id];
        self.drag = Some(DragState::Move {
            client: id,
            start_x: pointer.root_x as i32,
            start_y: pointer.root_y as i32,
            orig_x: c.geom.x,
            orig_y: c.geom.y,
            last_motion: 0,
            last_switch: 0,
        });
        Ok(())
    }

    /// Begin resizing a client from the corner nearest the pointer
    pub fn start_resize(&mut self, id: ClientId) -> Result<()> {
        if self.reg.clients[id].is_fullscreen {
            return Ok(());
        }
        self.restack(self.reg.selmon)?;
        if !self.grab_drag_pointer(self.cursors.resizing)? {
            return Ok(());
        }
        let c = &self.reg.clients[id];
        let pointer = self.conn.query_pointer(c.win)?.reply()?;
        let left = (pointer.win_x as i32) < c.geom.width / 2;
        let top = (pointer.win_y as i32) < c.geom.height / 2;
        self.drag = Some(DragState::Resize {
            client: id,
            orig: c.geom,
            left,
            top,
            last_motion: 0,
        });
        self.warp_to_corner(id, left, top)
    }

    fn warp_to_corner(&self, id: ClientId, left: bool, top: bool) -> Result<()> {
        let c = &self.reg.clients[id];
        let x = if left { -c.bw } else { c.geom.width + c.bw - 1 };
        let y = if top { -c.bw } else { c.geom.height + c.bw - 1 };
        self.conn
            .warp_pointer(x11rb::NONE, c.win, 0, 0, 0, 0, x as i16, y as i16)?;
        Ok(())
    }

    pub fn drag_motion(&mut self, event: &MotionNotifyEvent) -> Result<()> {
        let Some(drag) = self.drag.as_mut() else {
            return Ok(());
        };
        if !drag.accept_motion(event.time) {
            return Ok(());
        }
        let state = *drag;
        let (px, py) = (event.root_x as i32, event.root_y as i32);
        let selmon = self.reg.selmon;
        let arranges = self.reg.layout_kind(selmon).arranges();
        let snap = self.config.general.snap;

        match state {
            DragState::Move {
                client,
                start_x,
                start_y,
                orig_x,
                orig_y,
                last_switch,
                ..
            } => {
                let Some(c) = self.reg.client(client) else {
                    return Ok(());
                };
                let work = self.reg.mon(selmon).work;
                let (nx, ny) = snap_position(
                    orig_x + (px - start_x),
                    orig_y + (py - start_y),
                    c.outer_width(),
                    c.outer_height(),
                    work,
                    snap,
                );
                let size = (c.geom.width, c.geom.height);
                if !c.is_floating
                    && arranges
                    && ((nx - c.geom.x).abs() > snap || (ny - c.geom.y).abs() > snap)
                {
                    self.toggle_floating()?;
                }
                if !arranges || self.reg.clients[client].is_floating {
                    self.resize(client, Rect::new(nx, ny, size.0, size.1), true)?;
                }

                if self.config.general.drag_edge_switch
                    && event.time.wrapping_sub(last_switch) >= DRAG_SWITCH_COOLDOWN_MS
                {
                    self.drag_edge_switch(px, event.time)?;
                }
            }
            DragState::Resize {
                client,
                orig,
                left,
                top,
                ..
            } => {
                let Some(c) = self.reg.client(client) else {
                    return Ok(());
                };
                let target = resize_target(orig, c.bw, left, top, px, py);
                let own = self.reg.mon(c.mon).work;
                let sel = self.reg.mon(selmon).work;
                let inside = own.x + target.width >= sel.x
                    && own.x + target.width <= sel.right()
                    && own.y + target.height >= sel.y
                    && own.y + target.height <= sel.bottom();
                if inside
                    && !c.is_floating
                    && arranges
                    && ((target.width - c.geom.width).abs() > snap
                        || (target.height - c.geom.height).abs() > snap)
                {
                    self.toggle_floating()?;
                }
                if !arranges || self.reg.clients[client].is_floating {
                    self.resize(client, target, true)?;
                }
            }
        }
        Ok(())
    }

    /// Carry the dragged client to the adjacent tag when the pointer
    /// reaches a monitor edge
    fn drag_edge_switch(&mut self, px: i32, time: u32) -> Result<()> {
        let m = self.reg.selmon();
        let Some(edge) = edge_at(px, m.geom, self.config.general.edge_threshold) else {
            return Ok(());
        };
        let Some(mask) = shift_towards(m.active_tags(), edge, self.config.tags.len()) else {
            return Ok(());
        };
        if let Some(DragState::Move { last_switch, .. }) = self.drag.as_mut() {
            *last_switch = time;
        }
        log::debug!("Drag reached {:?} edge, moving to tags 0x{:x}", edge, mask);
        self.tag(mask)?;
        self.view(mask)
    }

    /// Finish a drag; a client dropped onto another monitor moves there
    pub fn drag_release(&mut self) -> Result<()> {
        let Some(drag) = self.drag.take() else {
            return Ok(());
        };
        let id = drag.client();
        if let DragState::Resize { left, top, .. } = drag {
            if self.reg.client(id).is_some() {
                self.warp_to_corner(id, left, top)?;
            }
        }
        self.conn.ungrab_pointer(x11rb::CURRENT_TIME)?;
        self.discard_enter_events()?;

        if let Some(c) = self.reg.client(id) {
            let target = self.reg.rect_to_mon(&c.geom);
            if target != self.reg.selmon {
                self.send_mon(id, target)?;
                self.reg.selmon = target;
                self.focus(None)?;
            }
        }
        self.resume_after_drag();
        Ok(())
    }

    /// Poll the pointer and switch tags when it rests at a monitor edge
    /// outside any client
    pub fn check_edge_switch(&mut self) -> Result<()> {
        if self.drag.is_some() || !self.config.general.mouse_edge_switch {
            return Ok(());
        }
        let pointer = self.conn.query_pointer(self.root)?.reply()?;
        let (x, y) = (pointer.root_x as i32, pointer.root_y as i32);

        let selmon = self.reg.selmon;
        let m = self.reg.mon(selmon);
        let over_client = m.clients.iter().any(|&c| {
            self.reg.is_visible(c) && covers_pointer(self.reg.clients[c].outer_rect(), m.geom.width, x, y)
        });
        if over_client {
            return Ok(());
        }

        let edge = edge_at(x, m.geom, self.config.general.edge_threshold);
        let active = m.active_tags();
        if !self.edge.should_switch(edge.is_some(), Instant::now()) {
            return Ok(());
        }
        if let Some(mask) = edge.and_then(|e| shift_towards(active, e, self.config.tags.len())) {
            log::debug!("Pointer at {:?} edge, viewing tags 0x{:x}", edge, mask);
            self.view(mask)?;
        }
        Ok(())
    }
}
