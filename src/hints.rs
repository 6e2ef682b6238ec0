//! ICCCM size hints and the size-hint resolver.
//!
//! `WM_NORMAL_HINTS` is decoded into [`SizeHints`], and every geometry
//! request (from a layout, a drag or a client) is passed through
//! [`apply_size_hints`] before it reaches the server.

use crate::types::Rect;

// WM_SIZE_HINTS flags
const P_MIN_SIZE: u32 = 1 << 4;
const P_MAX_SIZE: u32 = 1 << 5;
const P_RESIZE_INC: u32 = 1 << 6;
const P_ASPECT: u32 = 1 << 7;
const P_BASE_SIZE: u32 = 1 << 8;

// WM_HINTS flags
const INPUT_HINT: u32 = 1 << 0;
const URGENCY_HINT: u32 = 1 << 8;

/// Size constraints declared by a client
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SizeHints {
    pub base_w: i32,
    pub base_h: i32,
    pub inc_w: i32,
    pub inc_h: i32,
    pub max_w: i32,
    pub max_h: i32,
    pub min_w: i32,
    pub min_h: i32,
    pub min_aspect: f32,
    pub max_aspect: f32,
}

impl SizeHints {
    /// Decode the 18 CARD32s of a `WM_NORMAL_HINTS` property.
    ///
    /// A missing or short property yields all-zero hints.
    pub fn from_wm_normal_hints(values: &[u32]) -> Self {
        if values.len() < 15 {
            return Self::default();
        }
        let flags = values[0];
        let field = |i: usize| values.get(i).copied().unwrap_or(0) as i32;
        let (min_w, min_h) = (field(5), field(6));
        let (max_w, max_h) = (field(7), field(8));
        let (inc_w, inc_h) = (field(9), field(10));
        let (min_aspect_x, min_aspect_y) = (field(11), field(12));
        let (max_aspect_x, max_aspect_y) = (field(13), field(14));
        let (base_w, base_h) = (field(15), field(16));

        let mut hints = Self::default();
        if flags & P_BASE_SIZE != 0 {
            hints.base_w = base_w;
            hints.base_h = base_h;
        } else if flags & P_MIN_SIZE != 0 {
            hints.base_w = min_w;
            hints.base_h = min_h;
        }
        if flags & P_RESIZE_INC != 0 {
            hints.inc_w = inc_w;
            hints.inc_h = inc_h;
        }
        if flags & P_MAX_SIZE != 0 {
            hints.max_w = max_w;
            hints.max_h = max_h;
        }
        if flags & P_MIN_SIZE != 0 {
            hints.min_w = min_w;
            hints.min_h = min_h;
        } else if flags & P_BASE_SIZE != 0 {
            hints.min_w = base_w;
            hints.min_h = base_h;
        }
        if flags & P_ASPECT != 0 && min_aspect_x != 0 && max_aspect_y != 0 {
            hints.min_aspect = min_aspect_y as f32 / min_aspect_x as f32;
            hints.max_aspect = max_aspect_x as f32 / max_aspect_y as f32;
        }
        hints
    }

    /// A client whose min and max sizes coincide cannot be resized
    pub fn is_fixed(&self) -> bool {
        self.max_w != 0 && self.max_h != 0 && self.max_w == self.min_w && self.max_h == self.min_h
    }
}

/// The subset of `WM_HINTS` the window manager acts on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WmHints {
    pub urgent: bool,
    /// `Some(false)` when the client asked never to receive input focus
    pub input: Option<bool>,
}

impl WmHints {
    pub fn from_wm_hints(values: &[u32]) -> Self {
        let Some(&flags) = values.first() else {
            return Self::default();
        };
        Self {
            urgent: flags & URGENCY_HINT != 0,
            input: (flags & INPUT_HINT != 0).then(|| values.get(1).copied().unwrap_or(1) != 0),
        }
    }

    /// Encode back to the property form with the urgency bit set or cleared
    pub fn with_urgency(values: &[u32], urgent: bool) -> Vec<u32> {
        let mut out = if values.len() >= 9 { values.to_vec() } else { vec![0; 9] };
        if urgent {
            out[0] |= URGENCY_HINT;
        } else {
            out[0] &= !URGENCY_HINT;
        }
        out
    }
}

/// Where a geometry request came from and what it may be clamped against
#[derive(Debug, Clone, Copy)]
pub struct HintContext {
    /// Interactive requests are clamped to the whole screen, others to the work area
    pub interact: bool,
    pub screen_width: i32,
    pub screen_height: i32,
    pub work_area: Rect,
    /// Minimum width and height for any client
    pub min_dimension: i32,
    /// Size hints are honoured (always for floating clients and floating layouts)
    pub honour_hints: bool,
}

/// Resolve a requested geometry against the client's current geometry,
/// border width and size hints.
///
/// Returns the adjusted rectangle and whether it differs from `current`.
pub fn apply_size_hints(
    current: Rect,
    requested: Rect,
    bw: i32,
    hints: &SizeHints,
    ctx: &HintContext,
) -> (Rect, bool) {
    let Rect {
        mut x,
        mut y,
        width: mut w,
        height: mut h,
    } = requested;
    let outer_w = current.width + 2 * bw;
    let outer_h = current.height + 2 * bw;

    w = w.max(1);
    h = h.max(1);
    if ctx.interact {
        if x > ctx.screen_width {
            x = ctx.screen_width - outer_w;
        }
        if y > ctx.screen_height {
            y = ctx.screen_height - outer_h;
        }
        if x + w + 2 * bw < 0 {
            x = 0;
        }
        if y + h + 2 * bw < 0 {
            y = 0;
        }
    } else {
        let wa = &ctx.work_area;
        if x >= wa.right() {
            x = wa.right() - outer_w;
        }
        if y >= wa.bottom() {
            y = wa.bottom() - outer_h;
        }
        if x + w + 2 * bw <= wa.x {
            x = wa.x;
        }
        if y + h + 2 * bw <= wa.y {
            y = wa.y;
        }
    }
    h = h.max(ctx.min_dimension);
    w = w.max(ctx.min_dimension);

    if ctx.honour_hints {
        // ICCCM 4.1.2.3: base size is only subtracted before the aspect
        // check when it is not also the minimum size
        let base_is_min = hints.base_w == hints.min_w && hints.base_h == hints.min_h;
        if !base_is_min {
            w -= hints.base_w;
            h -= hints.base_h;
        }
        if hints.min_aspect > 0.0 && hints.max_aspect > 0.0 && w > 0 && h > 0 {
            if hints.max_aspect < w as f32 / h as f32 {
                w = (h as f32 * hints.max_aspect + 0.5) as i32;
            } else if hints.min_aspect < h as f32 / w as f32 {
                h = (w as f32 * hints.min_aspect + 0.5) as i32;
            }
        }
        if base_is_min {
            w -= hints.base_w;
            h -= hints.base_h;
        }
        if hints.inc_w > 0 {
            w -= w % hints.inc_w;
        }
        if hints.inc_h > 0 {
            h -= h % hints.inc_h;
        }
        w = (w + hints.base_w).max(hints.min_w);
        h = (h + hints.base_h).max(hints.min_h);
        if hints.max_w > 0 {
            w = w.min(hints.max_w);
        }
        if hints.max_h > 0 {
            h = h.min(hints.max_h);
        }
    }

    let resolved = Rect::new(x, y, w, h);
    (resolved, resolved != current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(honour_hints: bool) -> HintContext {
        HintContext {
            interact: false,
            screen_width: 1920,
            screen_height: 1080,
            work_area: Rect::new(0, 20, 1920, 1060),
            min_dimension: 20,
            honour_hints,
        }
    }

    fn normal_hints(flags: u32, min: (u32, u32), max: (u32, u32), inc: (u32, u32), base: (u32, u32)) -> Vec<u32> {
        let mut v = vec![0u32; 18];
        v[0] = flags;
        v[5] = min.0;
        v[6] = min.1;
        v[7] = max.0;
        v[8] = max.1;
        v[9] = inc.0;
        v[10] = inc.1;
        v[15] = base.0;
        v[16] = base.1;
        v
    }

    #[test]
    fn test_base_falls_back_to_min() {
        let hints = SizeHints::from_wm_normal_hints(&normal_hints(P_MIN_SIZE, (100, 50), (0, 0), (0, 0), (0, 0)));
        assert_eq!((hints.base_w, hints.base_h), (100, 50));
        assert_eq!((hints.min_w, hints.min_h), (100, 50));
        assert!(!hints.is_fixed());
    }

    #[test]
    fn test_min_falls_back_to_base() {
        let hints = SizeHints::from_wm_normal_hints(&normal_hints(P_BASE_SIZE, (0, 0), (0, 0), (0, 0), (4, 2)));
        assert_eq!((hints.min_w, hints.min_h), (4, 2));
        assert_eq!((hints.base_w, hints.base_h), (4, 2));
    }

    #[test]
    fn test_fixed_client() {
        let hints = SizeHints::from_wm_normal_hints(&normal_hints(
            P_MIN_SIZE | P_MAX_SIZE,
            (300, 200),
            (300, 200),
            (0, 0),
            (0, 0),
        ));
        assert!(hints.is_fixed());
    }

    #[test]
    fn test_missing_hints_are_zero() {
        assert_eq!(SizeHints::from_wm_normal_hints(&[]), SizeHints::default());
    }

    #[test]
    fn test_increment_rounding_removes_base_first() {
        // Terminal-style hints: base 4x2, cells of 10x20, minimum one cell
        let hints = SizeHints {
            base_w: 4,
            base_h: 2,
            inc_w: 10,
            inc_h: 20,
            min_w: 14,
            min_h: 22,
            ..SizeHints::default()
        };
        let current = Rect::new(0, 20, 100, 100);
        let (r, changed) = apply_size_hints(current, Rect::new(0, 20, 509, 1000), 0, &hints, &ctx(true));
        // (509 - 4) rounded down to 500, plus base
        assert_eq!(r.width, 504);
        // (1000 - 2) rounded down to 980, plus base
        assert_eq!(r.height, 982);
        assert!(changed);
    }

    #[test]
    fn test_hints_ignored_when_not_honoured() {
        let hints = SizeHints {
            inc_w: 10,
            inc_h: 20,
            ..SizeHints::default()
        };
        let current = Rect::new(0, 20, 100, 100);
        let (r, _) = apply_size_hints(current, Rect::new(5, 25, 509, 1001), 0, &hints, &ctx(false));
        assert_eq!(r, Rect::new(5, 25, 509, 1001));
    }

    #[test]
    fn test_max_and_min_clamp() {
        let hints = SizeHints {
            min_w: 200,
            min_h: 150,
            max_w: 800,
            max_h: 600,
            base_w: 200,
            base_h: 150,
            ..SizeHints::default()
        };
        let current = Rect::new(0, 20, 100, 100);
        let (r, _) = apply_size_hints(current, Rect::new(0, 20, 50, 2000), 0, &hints, &ctx(true));
        assert_eq!((r.width, r.height), (200, 600));
    }

    #[test]
    fn test_minimum_dimension_and_unchanged_detection() {
        let current = Rect::new(10, 30, 20, 20);
        let (r, changed) = apply_size_hints(current, Rect::new(10, 30, 0, -5), 0, &SizeHints::default(), &ctx(true));
        assert_eq!(r, current);
        assert!(!changed);
    }

    #[test]
    fn test_offscreen_request_pulled_into_work_area() {
        let current = Rect::new(0, 20, 100, 100);
        let (r, _) = apply_size_hints(current, Rect::new(4000, 20, 100, 100), 1, &SizeHints::default(), &ctx(false));
        // Pulled back so the old outer width fits against the right edge
        assert_eq!(r.x, 1920 - 102);

        let (r, _) = apply_size_hints(current, Rect::new(-500, -500, 100, 100), 1, &SizeHints::default(), &ctx(false));
        assert_eq!((r.x, r.y), (0, 20));
    }

    #[test]
    fn test_aspect_ratio() {
        let hints = SizeHints {
            min_aspect: 0.5,
            max_aspect: 1.0,
            ..SizeHints::default()
        };
        let current = Rect::new(0, 20, 100, 100);
        let (r, _) = apply_size_hints(current, Rect::new(0, 20, 400, 200), 0, &hints, &ctx(true));
        // Too wide for a 1:1 maximum
        assert_eq!((r.width, r.height), (200, 200));
    }

    #[test]
    fn test_wm_hints() {
        let hints = WmHints::from_wm_hints(&[INPUT_HINT | URGENCY_HINT, 0]);
        assert!(hints.urgent);
        assert_eq!(hints.input, Some(false));

        let hints = WmHints::from_wm_hints(&[0, 0]);
        assert!(!hints.urgent);
        assert_eq!(hints.input, None);

        let cleared = WmHints::with_urgency(&[INPUT_HINT | URGENCY_HINT, 1, 0, 0, 0, 0, 0, 0, 0], false);
        assert_eq!(cleared[0], INPUT_HINT);
    }
}
