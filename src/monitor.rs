//! Monitors, per-tag settings, and output detection using RandR.

use anyhow::{Context, Result};
use slotmap::new_key_type;
use x11rb::connection::Connection;
use x11rb::protocol::randr;
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

use crate::client::ClientId;
use crate::config::Config;
use crate::types::Rect;

new_key_type! {
    /// Unique identifier for a monitor
    pub struct MonitorId;
}

/// Settings remembered per tag. Index 0 is the all-tags view, index
/// `i` (1-based) belongs to tag `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pertag {
    pub curtag: usize,
    pub prevtag: usize,
    pub nmasters: Vec<i32>,
    pub mfacts: Vec<f32>,
    /// Layout select-bit per tag
    pub sellts: Vec<usize>,
    /// Layout pair per tag, as indices into the layout list
    pub layouts: Vec<[usize; 2]>,
    pub show_bars: Vec<bool>,
}

/// A physical output region
#[derive(Debug, Clone)]
pub struct Monitor {
    /// Position in the monitor list
    pub num: usize,
    /// Full monitor area
    pub geom: Rect,
    /// Usable area after bar reservation
    pub work: Rect,
    /// Bar position (off-screen when hidden)
    pub bar_y: i32,
    pub bar_height: i32,
    pub show_bar: bool,
    pub top_bar: bool,
    pub gap: i32,
    pub mfact: f32,
    pub nmaster: i32,
    /// Two most recent tag views; `seltags` selects the active one
    pub tagset: [u32; 2],
    pub seltags: usize,
    /// Two most recent layouts; `sellt` selects the active one
    pub layouts: [usize; 2],
    pub sellt: usize,
    /// Layout restored when true-fullscreen is toggled off
    pub last_layout: Option<usize>,
    pub symbol: String,
    /// Membership list, in layout order
    pub clients: Vec<ClientId>,
    /// Focus history, most recent first
    pub stack: Vec<ClientId>,
    pub sel: Option<ClientId>,
    pub pertag: Pertag,
}

impl Monitor {
    /// Create monitor `num` covering `geom`, applying monitor rules
    pub fn new(num: usize, geom: Rect, config: &Config) -> Self {
        let general = &config.general;
        let last_layout = config.layouts.len() - 1;
        let mut m = Self {
            num,
            geom,
            work: geom,
            bar_y: 0,
            bar_height: general.bar_height,
            show_bar: general.show_bar,
            top_bar: general.top_bar,
            gap: general.gap,
            mfact: general.mfact,
            nmaster: general.nmaster,
            tagset: [1, 1],
            seltags: 0,
            layouts: [0, 1.min(last_layout)],
            sellt: 0,
            last_layout: None,
            symbol: config.layouts[0].symbol.clone(),
            clients: Vec::new(),
            stack: Vec::new(),
            sel: None,
            pertag: Pertag {
                curtag: 1,
                prevtag: 1,
                nmasters: Vec::new(),
                mfacts: Vec::new(),
                sellts: Vec::new(),
                layouts: Vec::new(),
                show_bars: Vec::new(),
            },
        };

        if let Some(rule) = config
            .monitor_rules
            .iter()
            .find(|r| r.matches_monitor(num, m.tagset[0]))
        {
            let layout = rule.layout.min(last_layout);
            m.layouts = [layout, 1.min(last_layout)];
            m.symbol = config.layouts[layout].symbol.clone();
            m.mfact = rule.mfact.unwrap_or(m.mfact);
            m.nmaster = rule.nmaster.unwrap_or(m.nmaster);
            m.show_bar = rule.show_bar.unwrap_or(m.show_bar);
            m.top_bar = rule.top_bar.unwrap_or(m.top_bar);
        }

        for tag in 0..=config.tags.len() {
            let rule = config
                .monitor_rules
                .iter()
                .find(|r| r.matches_tag(num, tag));
            let (layouts, nmaster, mfact, show_bar) = match rule {
                Some(r) => (
                    [r.layout.min(last_layout), m.layouts[0]],
                    r.nmaster.unwrap_or(m.nmaster),
                    r.mfact.unwrap_or(m.mfact),
                    r.show_bar.unwrap_or(m.show_bar),
                ),
                None => (m.layouts, m.nmaster, m.mfact, m.show_bar),
            };
            m.pertag.layouts.push(layouts);
            m.pertag.nmasters.push(nmaster);
            m.pertag.mfacts.push(mfact);
            m.pertag.show_bars.push(show_bar);
            m.pertag.sellts.push(m.sellt);
        }

        m.update_bar_pos();
        m
    }

    /// Active tag view
    pub fn active_tags(&self) -> u32 {
        self.tagset[self.seltags]
    }

    /// Index of the active layout in the layout list
    pub fn layout(&self) -> usize {
        self.layouts[self.sellt]
    }

    /// Recompute the work area from the bar settings
    pub fn update_bar_pos(&mut self) {
        self.work = self.geom;
        if self.show_bar {
            self.work.height -= self.bar_height;
            self.bar_y = if self.top_bar {
                self.work.y
            } else {
                self.work.y + self.work.height
            };
            if self.top_bar {
                self.work.y += self.bar_height;
            }
        } else {
            self.bar_y = -self.bar_height;
        }
    }
}

/// Query output rectangles via RandR, falling back to the whole screen.
///
/// Duplicate rectangles (mirrored outputs) are reported once.
pub fn probe_outputs(conn: &RustConnection, root: Window, screen_num: usize) -> Result<Vec<Rect>> {
    let reply = randr::get_monitors(conn, root, true)?
        .reply()
        .context("Failed to get monitors from RandR")?;

    log::info!("RandR reports {} monitor(s)", reply.monitors.len());

    let mut rects: Vec<Rect> = Vec::new();
    for info in reply.monitors {
        let rect = Rect::new(
            info.x as i32,
            info.y as i32,
            info.width as i32,
            info.height as i32,
        );
        if !rects.contains(&rect) {
            log::info!(
                "Monitor {}: {}x{}+{}+{}{}",
                rects.len(),
                rect.width,
                rect.height,
                rect.x,
                rect.y,
                if info.primary { " (primary)" } else { "" }
            );
            rects.push(rect);
        }
    }

    if rects.is_empty() {
        log::warn!("No monitors detected, creating fallback from screen dimensions");
        rects.push(screen_rect(conn, screen_num));
    }
    Ok(rects)
}

/// The root window's full rectangle
pub fn screen_rect(conn: &RustConnection, screen_num: usize) -> Rect {
    let screen = &conn.setup().roots[screen_num];
    Rect::new(
        0,
        0,
        screen.width_in_pixels as i32,
        screen.height_in_pixels as i32,
    )
}
