//! Layout engine.
//!
//! Layouts are pure placement algorithms over the visible tiled clients of
//! one monitor. They never talk to the X server directly: every placement
//! goes through an [`Arranger`], which applies size hints and reports back
//! the geometry a client actually ended up with, so that column layouts can
//! stack the next client below the real height of the previous one.

use serde::{Deserialize, Serialize};

use crate::types::Rect;

/// Which arrangement algorithm a layout runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Tile,
    /// No arrangement; clients keep the geometry they ask for
    Floating,
    Monocle,
    MasterStack,
    Deck,
    Spiral,
    Dwindle,
    TrueFullscreen,
}

impl LayoutKind {
    /// Whether the layout positions clients at all
    pub fn arranges(self) -> bool {
        self != LayoutKind::Floating
    }

    /// Layouts that expect new clients at the end of the client list
    pub fn attach_at_tail(self) -> bool {
        matches!(
            self,
            LayoutKind::MasterStack | LayoutKind::Spiral | LayoutKind::Dwindle
        )
    }
}

/// A layout entry: a bar symbol paired with an algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub symbol: String,
    pub kind: LayoutKind,
}

impl Layout {
    pub fn new(symbol: &str, kind: LayoutKind) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind,
        }
    }
}

/// A client as seen by a layout
#[derive(Debug, Clone, Copy)]
pub struct Tiled<K> {
    pub id: K,
    /// Border width
    pub bw: i32,
    /// Current geometry (inner size, position of the border's outer corner)
    pub geom: Rect,
}

/// Monitor parameters a layout works within
#[derive(Debug, Clone, Copy)]
pub struct ArrangeArea {
    /// Usable area after bar reservation
    pub work: Rect,
    /// Full monitor rectangle
    pub screen: Rect,
    pub mfact: f32,
    pub nmaster: i32,
    pub gap: i32,
}

/// Everything a layout may look at
#[derive(Debug, Clone)]
pub struct LayoutInput<K> {
    /// Visible non-floating clients in client-list order
    pub tiled: Vec<Tiled<K>>,
    /// Visible non-floating clients in focus-stack order
    pub stack_tiled: Vec<Tiled<K>>,
    /// Every visible client in client-list order, floating ones included
    pub visible: Vec<Tiled<K>>,
    /// Position of the client-list head among `tiled`, if it is tiled
    pub head_index: Option<usize>,
    /// Position of the selected client among `tiled`, if it is tiled
    pub selected_index: Option<usize>,
}

/// Receives the placements a layout decides on
pub trait Arranger<K> {
    /// Resize a client (inner size) and return the geometry it actually took
    fn resize(&mut self, id: K, rect: Rect) -> Rect;

    /// Move a window without recording the new position on the client
    fn move_window(&mut self, id: K, x: i32, y: i32);

    /// Force a client floating and borderless over `rect`
    fn true_fullscreen(&mut self, id: K, rect: Rect);
}

/// Run the layout `kind` over `input`.
///
/// Returns a replacement bar symbol when the layout computes one.
pub fn arrange<K: Copy>(
    kind: LayoutKind,
    area: &ArrangeArea,
    input: &LayoutInput<K>,
    arranger: &mut impl Arranger<K>,
) -> Option<String> {
    match kind {
        LayoutKind::Tile | LayoutKind::MasterStack => tile(area, &input.tiled, arranger),
        LayoutKind::Floating => {}
        LayoutKind::Monocle => return monocle(area, input, arranger),
        LayoutKind::Deck => deck(area, input, arranger),
        LayoutKind::Spiral => fibonacci(area, &input.tiled, false, arranger),
        LayoutKind::Dwindle => fibonacci(area, &input.tiled, true, arranger),
        LayoutKind::TrueFullscreen => {
            for c in &input.visible {
                arranger.true_fullscreen(c.id, area.screen);
            }
        }
    }
    None
}

/// Outer height of a placed client
fn outer_height(rect: Rect, bw: i32) -> i32 {
    rect.height + 2 * bw
}

fn master_width(area: &ArrangeArea, n: i32, full: i32) -> i32 {
    if n > area.nmaster {
        if area.nmaster > 0 {
            (area.work.width as f32 * area.mfact) as i32
        } else {
            0
        }
    } else {
        full
    }
}

/// Master column on the left, stack column on the right, separated by gaps
fn tile<K: Copy>(area: &ArrangeArea, tiled: &[Tiled<K>], arranger: &mut impl Arranger<K>) {
    let n = tiled.len() as i32;
    if n == 0 {
        return;
    }
    let wa = area.work;
    let g = area.gap;
    let mw = master_width(area, n, wa.width - g);
    let masters = n.min(area.nmaster);

    let (mut my, mut ty) = (g, g);
    for (i, c) in tiled.iter().enumerate() {
        let i = i as i32;
        if i < area.nmaster {
            let h = (wa.height - my) / (masters - i) - g;
            let placed = arranger.resize(
                c.id,
                Rect::new(wa.x + g, wa.y + my, mw - 2 * c.bw - g, h - 2 * c.bw),
            );
            my += outer_height(placed, c.bw) + g;
        } else {
            let h = (wa.height - ty) / (n - i) - g;
            let placed = arranger.resize(
                c.id,
                Rect::new(
                    wa.x + mw + g,
                    wa.y + ty,
                    wa.width - mw - 2 * c.bw - 2 * g,
                    h - 2 * c.bw,
                ),
            );
            ty += outer_height(placed, c.bw) + g;
        }
    }
}

/// Only the most recently focused tiled client is shown, full size
fn monocle<K: Copy>(
    area: &ArrangeArea,
    input: &LayoutInput<K>,
    arranger: &mut impl Arranger<K>,
) -> Option<String> {
    let wa = area.work;
    let mut stack = input.stack_tiled.iter();
    if let Some(top) = stack.next() {
        arranger.move_window(top.id, wa.x, wa.y);
        arranger.resize(
            top.id,
            Rect::new(wa.x, wa.y, wa.width - 2 * top.bw, wa.height - 2 * top.bw),
        );
    }
    for c in stack {
        arranger.move_window(c.id, -2 * (c.geom.width + 2 * c.bw), c.geom.y);
    }

    let visible = input.visible.len();
    (visible > 0).then(|| format!("[{}]", visible))
}

/// Masters as in tile; stack clients are laid side by side and scrolled so
/// that the selected one is in view. Only two stack slots are on screen.
fn deck<K: Copy>(area: &ArrangeArea, input: &LayoutInput<K>, arranger: &mut impl Arranger<K>) {
    let tiled = &input.tiled;
    let n = tiled.len() as i32;
    if n == 0 {
        return;
    }
    let wa = area.work;
    let mw = master_width(area, n, wa.width);
    let stack_w = wa.width - mw;
    let masters = n.min(area.nmaster);

    let shift = match (input.head_index, input.selected_index) {
        (Some(head), Some(sel)) => (head as i32 - sel as i32) * stack_w,
        _ => 0,
    };

    let mut my = 0;
    for (i, c) in tiled.iter().enumerate() {
        let i = i as i32;
        if i < area.nmaster {
            let h = (wa.height - my) / (masters - i);
            let placed = arranger.resize(
                c.id,
                Rect::new(wa.x + shift, wa.y + my, mw - 2 * c.bw, h - 2 * c.bw),
            );
            my += outer_height(placed, c.bw);
        } else {
            let relx = (i - area.nmaster) * stack_w;
            if relx < 2 * stack_w {
                arranger.move_window(c.id, wa.x + mw + relx + shift, wa.y);
            } else {
                arranger.move_window(c.id, wa.width + wa.x, wa.y);
            }
        }
    }
}

/// Recursive halving. `dwindle` keeps every split towards the bottom-right,
/// otherwise the splits rotate into a spiral.
fn fibonacci<K: Copy>(
    area: &ArrangeArea,
    tiled: &[Tiled<K>],
    dwindle: bool,
    arranger: &mut impl Arranger<K>,
) {
    let n = tiled.len() as i32;
    if n == 0 {
        return;
    }
    let wa = area.work;
    let (mut nx, mut ny, mut nw, mut nh) = (wa.x, 0, wa.width, wa.height);

    let mut i = 0;
    for c in tiled {
        let splittable = if i % 2 == 1 {
            nh / 2 > 2 * c.bw
        } else {
            nw / 2 > 2 * c.bw
        };
        if splittable {
            if i < n - 1 {
                if i % 2 == 1 {
                    nh /= 2;
                } else {
                    nw /= 2;
                }
                if i % 4 == 2 && !dwindle {
                    nx += nw;
                } else if i % 4 == 3 && !dwindle {
                    ny += nh;
                }
            }
            match i % 4 {
                0 => {
                    if dwindle {
                        ny += nh;
                    } else {
                        ny -= nh;
                    }
                }
                1 => nx += nw,
                2 => ny += nh,
                _ => {
                    if dwindle {
                        nx += nw;
                    } else {
                        nx -= nw;
                    }
                }
            }
            if i == 0 {
                if n != 1 {
                    nw = (wa.width as f32 * area.mfact) as i32;
                }
                ny = wa.y;
            } else if i == 1 {
                nw = wa.width - nw;
            }
            i += 1;
        }
        arranger.resize(c.id, Rect::new(nx, ny, nw - 2 * c.bw, nh - 2 * c.bw));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Op {
        Resize(u32, Rect),
        Move(u32, i32, i32),
        Fullscreen(u32, Rect),
    }

    /// Records placements and accepts every requested size
    #[derive(Default)]
    struct Recorder {
        ops: Vec<Op>,
    }

    impl Recorder {
        fn resized(&self, id: u32) -> Option<Rect> {
            self.ops.iter().rev().find_map(|op| match op {
                Op::Resize(i, r) if *i == id => Some(*r),
                _ => None,
            })
        }
    }

    impl Arranger<u32> for Recorder {
        fn resize(&mut self, id: u32, rect: Rect) -> Rect {
            self.ops.push(Op::Resize(id, rect));
            rect
        }
        fn move_window(&mut self, id: u32, x: i32, y: i32) {
            self.ops.push(Op::Move(id, x, y));
        }
        fn true_fullscreen(&mut self, id: u32, rect: Rect) {
            self.ops.push(Op::Fullscreen(id, rect));
        }
    }

    fn area(nmaster: i32) -> ArrangeArea {
        ArrangeArea {
            work: Rect::new(0, 0, 1920, 1080),
            screen: Rect::new(0, 0, 1920, 1080),
            mfact: 0.55,
            nmaster,
            gap: 5,
        }
    }

    fn clients(n: u32) -> Vec<Tiled<u32>> {
        (1..=n)
            .map(|id| Tiled {
                id,
                bw: 0,
                geom: Rect::new(0, 0, 400, 300),
            })
            .collect()
    }

    fn input(n: u32) -> LayoutInput<u32> {
        let tiled = clients(n);
        LayoutInput {
            stack_tiled: tiled.clone(),
            visible: tiled.clone(),
            tiled,
            head_index: Some(0),
            selected_index: Some(0),
        }
    }

    #[test]
    fn test_tile_two_clients_with_gaps() {
        let mut rec = Recorder::default();
        arrange(LayoutKind::Tile, &area(1), &input(2), &mut rec);
        assert_eq!(rec.resized(1), Some(Rect::new(5, 5, 1051, 1070)));
        assert_eq!(rec.resized(2), Some(Rect::new(1061, 5, 854, 1070)));
    }

    #[test]
    fn test_tile_single_client_fills_area() {
        let mut rec = Recorder::default();
        arrange(LayoutKind::Tile, &area(1), &input(1), &mut rec);
        assert_eq!(rec.resized(1), Some(Rect::new(5, 5, 1910, 1070)));
    }

    #[test]
    fn test_tile_height_conservation() {
        let g = 5;
        let h = 1080;
        for n in 1..=6u32 {
            for k in 0..=n as i32 {
                let mut rec = Recorder::default();
                arrange(LayoutKind::Tile, &area(k), &input(n), &mut rec);

                let heights: Vec<i32> = (1..=n).map(|id| rec.resized(id).unwrap().height).collect();
                let (masters, stack) = heights.split_at(k as usize);
                if !masters.is_empty() {
                    let sum: i32 = masters.iter().sum();
                    assert_eq!(sum + (masters.len() as i32 - 1) * g, h - 2 * g, "n={} k={}", n, k);
                }
                if !stack.is_empty() {
                    let sum: i32 = stack.iter().sum();
                    assert_eq!(sum + (stack.len() as i32 - 1) * g, h - 2 * g, "n={} k={}", n, k);
                }
            }
        }
    }

    #[test]
    fn test_tile_zero_masters_uses_full_width_stack() {
        let mut rec = Recorder::default();
        arrange(LayoutKind::Tile, &area(0), &input(2), &mut rec);
        let r = rec.resized(1).unwrap();
        assert_eq!(r.x, 5);
        assert_eq!(r.width, 1910);
    }

    #[test]
    fn test_masterstack_matches_tile() {
        let mut a = Recorder::default();
        let mut b = Recorder::default();
        arrange(LayoutKind::Tile, &area(2), &input(4), &mut a);
        arrange(LayoutKind::MasterStack, &area(2), &input(4), &mut b);
        assert_eq!(a.ops, b.ops);
    }

    #[test]
    fn test_arrange_is_idempotent() {
        let mut a = Recorder::default();
        let mut b = Recorder::default();
        arrange(LayoutKind::Spiral, &area(1), &input(5), &mut a);
        arrange(LayoutKind::Spiral, &area(1), &input(5), &mut b);
        assert_eq!(a.ops, b.ops);
    }

    #[test]
    fn test_monocle_shows_top_of_stack() {
        let mut inp = input(3);
        inp.stack_tiled = vec![inp.tiled[2], inp.tiled[0], inp.tiled[1]];
        let mut rec = Recorder::default();
        let symbol = arrange(LayoutKind::Monocle, &area(1), &inp, &mut rec);

        assert_eq!(symbol.as_deref(), Some("[3]"));
        assert_eq!(rec.ops[0], Op::Move(3, 0, 0));
        assert_eq!(rec.ops[1], Op::Resize(3, Rect::new(0, 0, 1920, 1080)));
        assert_eq!(rec.ops[2], Op::Move(1, -800, 0));
        assert_eq!(rec.ops[3], Op::Move(2, -800, 0));
    }

    #[test]
    fn test_monocle_empty_keeps_symbol() {
        let mut rec = Recorder::default();
        let symbol = arrange(LayoutKind::Monocle, &area(1), &input(0), &mut rec);
        assert!(symbol.is_none());
        assert!(rec.ops.is_empty());
    }

    #[test]
    fn test_deck_scrolls_to_selection() {
        let mut inp = input(5);
        inp.selected_index = Some(2);
        let mut rec = Recorder::default();
        arrange(LayoutKind::Deck, &area(1), &inp, &mut rec);

        let mw = (1920.0 * 0.55f32) as i32;
        let stack_w = 1920 - mw;
        let shift = -2 * stack_w;
        assert_eq!(rec.ops[0], Op::Resize(1, Rect::new(shift, 0, mw, 1080)));
        assert_eq!(rec.ops[1], Op::Move(2, mw + shift, 0));
        assert_eq!(rec.ops[2], Op::Move(3, mw + stack_w + shift, 0));
        // Third and later stack clients parked to the right of the monitor
        assert_eq!(rec.ops[3], Op::Move(4, 1920, 0));
        assert_eq!(rec.ops[4], Op::Move(5, 1920, 0));
    }

    #[test]
    fn test_spiral_first_split_uses_mfact() {
        let mut rec = Recorder::default();
        arrange(LayoutKind::Spiral, &area(1), &input(2), &mut rec);
        assert_eq!(rec.resized(1), Some(Rect::new(0, 0, 1056, 1080)));
        assert_eq!(rec.resized(2), Some(Rect::new(1056, 0, 864, 1080)));
    }

    #[test]
    fn test_dwindle_splits_towards_bottom_right() {
        let mut rec = Recorder::default();
        arrange(LayoutKind::Dwindle, &area(1), &input(3), &mut rec);
        assert_eq!(rec.resized(1), Some(Rect::new(0, 0, 1056, 1080)));
        assert_eq!(rec.resized(2), Some(Rect::new(1056, 0, 864, 540)));
        assert_eq!(rec.resized(3), Some(Rect::new(1056, 540, 864, 540)));
    }

    #[test]
    fn test_spiral_single_client_fills_area() {
        let mut rec = Recorder::default();
        arrange(LayoutKind::Spiral, &area(1), &input(1), &mut rec);
        assert_eq!(rec.resized(1), Some(Rect::new(0, 0, 1920, 1080)));
    }

    #[test]
    fn test_true_fullscreen_covers_monitor() {
        let mut a = area(1);
        a.work = Rect::new(0, 20, 1920, 1060);
        let mut rec = Recorder::default();
        arrange(LayoutKind::TrueFullscreen, &a, &input(2), &mut rec);
        assert_eq!(rec.ops[0], Op::Fullscreen(1, Rect::new(0, 0, 1920, 1080)));
        assert_eq!(rec.ops[1], Op::Fullscreen(2, Rect::new(0, 0, 1920, 1080)));
    }

    #[test]
    fn test_floating_places_nothing() {
        let mut rec = Recorder::default();
        arrange(LayoutKind::Floating, &area(1), &input(3), &mut rec);
        assert!(rec.ops.is_empty());
    }

    #[test]
    fn test_attach_policy() {
        assert!(LayoutKind::MasterStack.attach_at_tail());
        assert!(LayoutKind::Spiral.attach_at_tail());
        assert!(LayoutKind::Dwindle.attach_at_tail());
        assert!(!LayoutKind::Tile.attach_at_tail());
        assert!(!LayoutKind::Monocle.attach_at_tail());
        assert!(!LayoutKind::Floating.arranges());
    }
}
