//! Managed client windows and rule matching.

use slotmap::new_key_type;
use x11rb::protocol::xproto::Window;

use crate::config::Rule;
use crate::hints::SizeHints;
use crate::monitor::MonitorId;
use crate::types::Rect;

new_key_type! {
    /// Unique identifier for a managed client
    pub struct ClientId;
}

/// Class and instance used when a window sets no WM_CLASS
pub const BROKEN: &str = "broken";

/// A managed top-level window
#[derive(Debug, Clone)]
pub struct Client {
    pub win: Window,
    pub name: String,
    /// Current geometry; width and height exclude the border
    pub geom: Rect,
    /// Geometry before the last resize
    pub old_geom: Rect,
    pub hints: SizeHints,
    pub bw: i32,
    /// Border width the window had before it was managed
    pub old_bw: i32,
    pub tags: u32,
    pub is_fixed: bool,
    pub is_floating: bool,
    pub is_urgent: bool,
    pub never_focus: bool,
    pub is_fullscreen: bool,
    /// Border width and floating state to restore when leaving fullscreen
    pub fullscreen_saved: (i32, bool),
    pub is_true_fullscreen: bool,
    pub always_on_top: bool,
    pub is_terminal: bool,
    pub no_swallow: bool,
    pub scratch_key: Option<char>,
    /// Where a scratchpad was before it was last hidden
    pub scratch_pos: (i32, i32),
    /// Owning process, 0 if unknown
    pub pid: u32,
    pub mon: MonitorId,
    /// The client this one is standing in for on screen
    pub swallowing: Option<ClientId>,
}

impl Client {
    pub fn new(win: Window, geom: Rect, border: i32, mon: MonitorId) -> Self {
        Self {
            win,
            name: String::new(),
            geom,
            old_geom: geom,
            hints: SizeHints::default(),
            bw: border,
            old_bw: border,
            tags: 0,
            is_fixed: false,
            is_floating: false,
            is_urgent: false,
            never_focus: false,
            is_fullscreen: false,
            fullscreen_saved: (border, false),
            is_true_fullscreen: false,
            always_on_top: false,
            is_terminal: false,
            no_swallow: false,
            scratch_key: None,
            scratch_pos: (geom.x, geom.y),
            pid: 0,
            mon,
            swallowing: None,
        }
    }

    /// Width including borders
    pub fn outer_width(&self) -> i32 {
        self.geom.width + 2 * self.bw
    }

    /// Height including borders
    pub fn outer_height(&self) -> i32 {
        self.geom.height + 2 * self.bw
    }

    /// Geometry including borders
    pub fn outer_rect(&self) -> Rect {
        Rect::new(self.geom.x, self.geom.y, self.outer_width(), self.outer_height())
    }
}

/// What the rule table decided for a new window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOutcome {
    pub tags: u32,
    pub is_floating: bool,
    pub is_terminal: bool,
    pub no_swallow: bool,
    pub scratch_key: Option<char>,
    /// Index of the monitor the window was sent to
    pub monitor: Option<usize>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub w: Option<i32>,
    pub h: Option<i32>,
}

/// Match a window against every rule in order.
///
/// Rules accumulate: each matching rule overwrites the flags it sets, so the
/// last match wins per field, while tag masks are OR-ed together. The
/// resulting tag mask is limited to `tag_mask`; zero means "use the
/// monitor's current view".
pub fn apply_rules(
    rules: &[Rule],
    class: &str,
    instance: &str,
    title: &str,
    tag_mask: u32,
    monitor_count: usize,
) -> RuleOutcome {
    let mut out = RuleOutcome::default();
    let matches = |pattern: &Option<String>, value: &str| {
        pattern.as_deref().map_or(true, |p| value.contains(p))
    };

    for rule in rules {
        if !(matches(&rule.title, title)
            && matches(&rule.class, class)
            && matches(&rule.instance, instance))
        {
            continue;
        }
        out.is_terminal = rule.terminal;
        out.no_swallow = rule.no_swallow;
        out.is_floating = rule.floating;
        out.scratch_key = rule.scratch_key;
        out.tags |= rule.tags;
        if rule.monitor >= 0 && (rule.monitor as usize) < monitor_count {
            out.monitor = Some(rule.monitor as usize);
        }
        let set = |v: i32| (v != -1).then_some(v);
        out.x = set(rule.x).or(out.x);
        out.y = set(rule.y).or(out.y);
        out.w = set(rule.w).or(out.w);
        out.h = set(rule.h).or(out.h);
    }
    out.tags &= tag_mask;
    out
}
