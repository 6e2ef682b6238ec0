//! Tag views and per-tag settings.
//!
//! The bitmask state machine lives on [`Monitor`] and is free of X calls;
//! the `Wm` wrappers below re-focus and re-arrange after each transition.

use anyhow::Result;

use crate::monitor::{Monitor, MonitorId};
use crate::tracing::StateTransition;
use crate::Wm;

/// Pertag slot for a view mask: 0 for the all-tags view, otherwise the
/// lowest set bit plus one (the first selected tag wins for multi-tag views).
pub fn pertag_index(mask: u32, tag_mask: u32) -> usize {
    if mask & tag_mask == tag_mask {
        0
    } else {
        mask.trailing_zeros() as usize + 1
    }
}

/// Rotate a single-step shift of `mask` within `tag_mask`, wrapping around
pub fn shift_mask(mask: u32, forward: bool, ntags: usize) -> u32 {
    let tag_mask = (1u32 << ntags) - 1;
    let mask = mask & tag_mask;
    let shifted = if forward {
        (mask << 1) | (mask >> (ntags - 1))
    } else {
        (mask >> 1) | (mask << (ntags - 1))
    };
    shifted & tag_mask
}

impl Monitor {
    /// Switch the active view to `mask`; a zero mask swaps back to the
    /// previous view. Returns false when the view is already active.
    pub fn view(&mut self, mask: u32, tag_mask: u32) -> bool {
        let mask = mask & tag_mask;
        if mask == self.active_tags() {
            return false;
        }
        self.seltags ^= 1;
        if mask != 0 {
            self.tagset[self.seltags] = mask;
            self.pertag.prevtag = self.pertag.curtag;
            self.pertag.curtag = pertag_index(mask, tag_mask);
        } else {
            std::mem::swap(&mut self.pertag.curtag, &mut self.pertag.prevtag);
        }
        self.load_pertag();
        true
    }

    /// XOR `mask` into the active view. Rejected (returns false) if the
    /// result would show no tags.
    pub fn toggle_view(&mut self, mask: u32, tag_mask: u32) -> bool {
        let newtagset = self.active_tags() ^ (mask & tag_mask);
        if newtagset == 0 {
            return false;
        }
        self.tagset[self.seltags] = newtagset;

        if newtagset == tag_mask {
            self.pertag.prevtag = self.pertag.curtag;
            self.pertag.curtag = 0;
        } else if self.pertag.curtag == 0 || newtagset & (1 << (self.pertag.curtag - 1)) == 0 {
            self.pertag.prevtag = self.pertag.curtag;
            self.pertag.curtag = pertag_index(newtagset, tag_mask);
        }
        self.load_pertag();
        true
    }

    /// Flip bar visibility for the current tag
    pub fn toggle_bar(&mut self) {
        self.show_bar = !self.show_bar;
        self.pertag.show_bars[self.pertag.curtag] = self.show_bar;
        self.update_bar_pos();
    }

    /// Select a layout, or flip between the two recent ones when `layout` is `None`
    pub fn set_layout(&mut self, layout: Option<usize>, symbols: &[String]) {
        let cur = self.pertag.curtag;
        if layout.map_or(true, |l| l != self.layout()) {
            self.pertag.sellts[cur] ^= 1;
            self.sellt = self.pertag.sellts[cur];
        }
        if let Some(l) = layout {
            self.layouts[self.sellt] = l;
            self.pertag.layouts[cur][self.sellt] = l;
        }
        if let Some(symbol) = symbols.get(self.layout()) {
            self.symbol = symbol.clone();
        }
    }

    /// Adjust the master ratio. Values below 1.0 are relative, values of
    /// 1.0 and above are absolute (offset by 1.0). Returns false if the
    /// result falls outside [0.05, 0.95].
    pub fn set_mfact(&mut self, f: f32) -> bool {
        let f = if f < 1.0 { f + self.mfact } else { f - 1.0 };
        if !(0.05..=0.95).contains(&f) {
            return false;
        }
        self.mfact = f;
        self.pertag.mfacts[self.pertag.curtag] = f;
        true
    }

    /// Change the master count by `delta`, never below zero
    pub fn inc_nmaster(&mut self, delta: i32) {
        self.nmaster = (self.nmaster + delta).max(0);
        self.pertag.nmasters[self.pertag.curtag] = self.nmaster;
    }

    /// Restore the settings stored for the current pertag slot
    fn load_pertag(&mut self) {
        let cur = self.pertag.curtag;
        self.nmaster = self.pertag.nmasters[cur];
        self.mfact = self.pertag.mfacts[cur];
        self.sellt = self.pertag.sellts[cur];
        self.layouts[self.sellt] = self.pertag.layouts[cur][self.sellt];
        self.layouts[self.sellt ^ 1] = self.pertag.layouts[cur][self.sellt ^ 1];
        if self.show_bar != self.pertag.show_bars[cur] {
            self.toggle_bar();
        }
    }
}

/// New tag mask for a client after `toggletag`, or `None` if it would be empty
pub fn toggled_tags(current: u32, mask: u32, tag_mask: u32) -> Option<u32> {
    let new = current ^ (mask & tag_mask);
    (new != 0).then_some(new)
}

impl Wm {
    fn layout_symbols(&self) -> Vec<String> {
        self.config.layouts.iter().map(|l| l.symbol.clone()).collect()
    }

    /// Show the tags in `mask` on the selected monitor
    pub fn view(&mut self, mask: u32) -> Result<()> {
        let tag_mask = self.reg.tag_mask;
        let selmon = self.reg.selmon;
        if self.reg.mon_mut(selmon).view(mask, tag_mask) {
            self.view_changed(selmon)?;
        }
        self.update_current_desktop()
    }

    pub fn toggle_view(&mut self, mask: u32) -> Result<()> {
        let tag_mask = self.reg.tag_mask;
        let selmon = self.reg.selmon;
        if self.reg.mon_mut(selmon).toggle_view(mask, tag_mask) {
            self.view_changed(selmon)?;
        }
        self.update_current_desktop()
    }

    /// Record a new tagset and lay the monitor out for it
    fn view_changed(&mut self, mon: MonitorId) -> Result<()> {
        self.tracer.trace_transition(&StateTransition::ViewChanged {
            monitor: self.reg.mon_index(mon),
            tags: self.reg.mon(mon).active_tags(),
        });
        self.refresh_symbol(mon);
        self.focus(None)?;
        self.arrange(Some(mon))
    }

    /// Move the selected client to the tags in `mask`
    pub fn tag(&mut self, mask: u32) -> Result<()> {
        let mask = mask & self.reg.tag_mask;
        let Some(sel) = self.reg.sel() else {
            return Ok(());
        };
        if mask == 0 {
            return Ok(());
        }
        if let Some(c) = self.reg.client_mut(sel) {
            c.tags = mask;
        }
        self.focus(None)?;
        self.arrange(Some(self.reg.selmon))
    }

    pub fn toggle_tag(&mut self, mask: u32) -> Result<()> {
        let Some(sel) = self.reg.sel() else {
            return Ok(());
        };
        let tag_mask = self.reg.tag_mask;
        let current = self.reg.client(sel).map_or(0, |c| c.tags);
        if let Some(new) = toggled_tags(current, mask, tag_mask) {
            if let Some(c) = self.reg.client_mut(sel) {
                c.tags = new;
            }
            self.focus(None)?;
            self.arrange(Some(self.reg.selmon))?;
        }
        self.update_current_desktop()
    }

    /// View the adjacent tag, wrapping around
    pub fn view_adjacent(&mut self, forward: bool) -> Result<()> {
        let active = self.reg.selmon().active_tags();
        self.view(shift_mask(active, forward, self.config.tags.len()))
    }

    /// Send the selected client to the adjacent tag and follow it
    pub fn tag_to_adjacent(&mut self, forward: bool) -> Result<()> {
        if self.reg.sel().is_none() {
            return Ok(());
        }
        let active = self.reg.selmon().active_tags();
        let target = shift_mask(active, forward, self.config.tags.len());
        self.tag(target)?;
        self.view(target)
    }

    pub fn toggle_bar(&mut self) -> Result<()> {
        let selmon = self.reg.selmon;
        self.reg.mon_mut(selmon).toggle_bar();
        self.arrange(Some(selmon))
    }

    /// Select layout `index`, or flip between the two recent layouts
    pub fn set_layout(&mut self, index: Option<usize>) -> Result<()> {
        let symbols = self.layout_symbols();
        let selmon = self.reg.selmon;
        self.reg.mon_mut(selmon).set_layout(index, &symbols);
        if self.reg.sel().is_some() {
            self.arrange(Some(selmon))
        } else {
            self.refresh_symbol(selmon);
            Ok(())
        }
    }

    /// Like `set_layout`, but reports an out-of-range index instead of using it
    pub fn set_layout_safe(&mut self, index: Option<usize>) -> Result<bool> {
        match index {
            Some(i) if i >= self.config.layouts.len() => Ok(false),
            _ => {
                self.set_layout(index)?;
                Ok(true)
            }
        }
    }

    pub fn set_mfact(&mut self, f: f32) -> Result<bool> {
        let selmon = self.reg.selmon;
        if !self.reg.layout_kind(selmon).arranges() {
            return Ok(false);
        }
        if !self.reg.mon_mut(selmon).set_mfact(f) {
            return Ok(false);
        }
        self.arrange(Some(selmon))?;
        Ok(true)
    }

    pub fn inc_nmaster(&mut self, delta: i32) -> Result<()> {
        let selmon = self.reg.selmon;
        self.reg.mon_mut(selmon).inc_nmaster(delta);
        self.arrange(Some(selmon))
    }

    /// Adjust the gap between tiled clients; 0 restores the configured gap
    pub fn set_gaps(&mut self, delta: i32) -> Result<()> {
        let selmon = self.reg.selmon;
        let default = self.config.general.gap;
        let m = self.reg.mon_mut(selmon);
        m.gap = if delta == 0 { default } else { (m.gap + delta).max(0) };
        self.arrange(Some(selmon))
    }

    /// Announce the highest visible tag as the EWMH current desktop
    pub fn update_current_desktop(&self) -> Result<()> {
        let active = self.reg.selmon().active_tags();
        let desktop = 31 - active.max(1).leading_zeros();
        self.set_root_cardinal(self.atoms.net_current_desktop, desktop)
    }
}
