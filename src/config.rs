//! Configuration file support for tagwm.
//!
//! Loads settings from ~/.config/tagwm/config.toml if it exists,
//! otherwise uses the built-in defaults. Every table is optional; a
//! partial file only overrides the keys it names.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::layout::{Layout, LayoutKind};

/// Highest number of tags that fits the tag mask with one bit to spare
pub const MAX_TAGS: usize = 31;

// =============================================================================
// File-based Configuration (TOML parsing)
// =============================================================================

/// Top-level configuration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub colors: ColorConfig,
    /// Tag names, one per virtual desktop
    pub tags: Vec<String>,
    /// Layout list; the first two seed every monitor's layout pair
    pub layouts: Vec<Layout>,
    pub rules: Vec<Rule>,
    pub monitor_rules: Vec<MonitorRule>,
    /// Window classes forced floating and always-on-top when admitted
    pub always_on_top: Vec<String>,
    /// Key combo -> action, e.g. `"Mod4+Shift+q" = "quit"`
    pub keybindings: HashMap<String, String>,
}

/// General settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub border_width: u32,
    pub gap: i32,
    /// Snap distance in pixels for interactive moves
    pub snap: i32,
    pub show_bar: bool,
    pub top_bar: bool,
    /// Height reserved for an external status bar
    pub bar_height: i32,
    pub mfact: f32,
    pub nmaster: i32,
    /// Respect size hints in tiled resizals
    pub resize_hints: bool,
    /// Keep focus on a fullscreen window
    pub lock_fullscreen: bool,
    pub mouse_edge_switch: bool,
    pub drag_edge_switch: bool,
    pub edge_threshold: i32,
    /// Modifier used for mouse bindings and the default key table
    pub mod_key: String,
    pub socket_path: Option<PathBuf>,
}

/// Border colors (hex strings like "#005577")
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ColorConfig {
    pub border_normal: String,
    pub border_selected: String,
    pub border_urgent: String,
}

/// Window matching rule applied once at admission
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Rule {
    pub class: Option<String>,
    pub instance: Option<String>,
    pub title: Option<String>,
    pub tags: u32,
    pub floating: bool,
    pub terminal: bool,
    pub no_swallow: bool,
    /// Target monitor index, -1 for the current one
    pub monitor: i32,
    pub scratch_key: Option<char>,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Per-monitor (and optionally per-tag) defaults
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MonitorRule {
    /// Monitor index, `None` matches every monitor
    pub monitor: Option<usize>,
    /// Tag number (1-based, 0 is the all-tags view), `None` matches every tag
    pub tag: Option<usize>,
    /// Index into the layout list
    pub layout: usize,
    pub mfact: Option<f32>,
    pub nmaster: Option<i32>,
    pub show_bar: Option<bool>,
    pub top_bar: Option<bool>,
}

impl MonitorRule {
    /// Whether this rule seeds the monitor-wide defaults of monitor `index`
    pub fn matches_monitor(&self, index: usize, initial_tagset: u32) -> bool {
        self.monitor.map_or(true, |m| m == index)
            && match self.tag {
                None | Some(0) => true,
                Some(t) => initial_tagset & (1 << (t - 1)) != 0,
            }
    }

    /// Whether this rule seeds the pertag slot `tag` of monitor `index`
    pub fn matches_tag(&self, index: usize, tag: usize) -> bool {
        self.monitor.map_or(true, |m| m == index) && self.tag.map_or(true, |t| t == tag)
    }
}

/// Parsed keybinding (ready for X11 grab)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParsedBinding {
    pub keysym: u32,
    pub modifiers: u16,
}

/// Window manager action bound to a key
#[derive(Debug, Clone, PartialEq)]
pub enum WmAction {
    View(u32),
    ToggleView(u32),
    Tag(u32),
    ToggleTag(u32),
    /// Swap back to the previous tagset
    ViewPrevious,
    ViewNext,
    ViewPrev,
    TagToNext,
    TagToPrev,
    FocusStack(i32),
    RotateStack(i32),
    FocusMon(i32),
    TagMon(i32),
    IncNmaster(i32),
    SetMfact(f32),
    /// `None` flips between the two most recent layouts
    SetLayout(Option<usize>),
    SetGaps(i32),
    Zoom,
    KillClient,
    ToggleFloating,
    ToggleAlwaysOnTop,
    ToggleBar,
    ToggleTrueFullscreen,
    ToggleScratch(char),
    Quit,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            colors: ColorConfig::default(),
            tags: (1..=9).map(|i| i.to_string()).collect(),
            layouts: default_layouts(),
            rules: vec![
                Rule {
                    class: Some("Gimp".to_string()),
                    floating: true,
                    ..Rule::default()
                },
                Rule {
                    class: Some("Firefox".to_string()),
                    tags: 1 << 8,
                    ..Rule::default()
                },
            ],
            monitor_rules: Vec::new(),
            always_on_top: Vec::new(),
            keybindings: HashMap::new(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            border_width: 0,
            gap: 5,
            snap: 0,
            show_bar: true,
            top_bar: true,
            bar_height: 20,
            mfact: 0.55,
            nmaster: 1,
            resize_hints: true,
            lock_fullscreen: false,
            mouse_edge_switch: true,
            drag_edge_switch: true,
            edge_threshold: 5,
            mod_key: "Mod4".to_string(),
            socket_path: None,
        }
    }
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            border_normal: "#444444".to_string(),
            border_selected: "#005577".to_string(),
            border_urgent: "#ff0000".to_string(),
        }
    }
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            class: None,
            instance: None,
            title: None,
            tags: 0,
            floating: false,
            terminal: false,
            no_swallow: false,
            monitor: -1,
            scratch_key: None,
            x: -1,
            y: -1,
            w: -1,
            h: -1,
        }
    }
}

fn default_layouts() -> Vec<Layout> {
    vec![
        Layout::new("[]=", LayoutKind::Tile),
        Layout::new("><>", LayoutKind::Floating),
        Layout::new("[M]", LayoutKind::Monocle),
        Layout::new("[]|", LayoutKind::MasterStack),
        Layout::new("[F]", LayoutKind::TrueFullscreen),
        Layout::new("[D]", LayoutKind::Deck),
        Layout::new("[@]", LayoutKind::Spiral),
        Layout::new("[\\]", LayoutKind::Dwindle),
    ]
}

impl Config {
    /// Load config from `$TAGWM_CONFIG` or the default path
    pub fn load() -> Self {
        let path = std::env::var_os("TAGWM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_path);
        Self::load_from_path(path)
    }

    /// Default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tagwm")
            .join("config.toml")
    }

    /// Load config from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        let config = match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse config: {}", e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        };
        config.validated()
    }

    /// Clamp values that the tag mask and layout tables cannot represent
    fn validated(mut self) -> Self {
        if self.tags.is_empty() {
            log::warn!("Config has no tags, using 9 numbered tags");
            self.tags = (1..=9).map(|i| i.to_string()).collect();
        }
        if self.tags.len() > MAX_TAGS {
            log::warn!("Config has {} tags, truncating to {}", self.tags.len(), MAX_TAGS);
            self.tags.truncate(MAX_TAGS);
        }
        if self.layouts.is_empty() {
            log::warn!("Config has no layouts, using the default list");
            self.layouts = default_layouts();
        }
        self.general.mfact = self.general.mfact.clamp(0.05, 0.95);
        self.general.nmaster = self.general.nmaster.max(0);
        self
    }

    /// Mask with one bit set per configured tag
    pub fn tag_mask(&self) -> u32 {
        (1u32 << self.tags.len()) - 1
    }

    /// Modifier mask for mouse bindings
    pub fn mod_mask(&self) -> u16 {
        parse_modifier(&self.general.mod_key).unwrap_or(MOD4_MASK)
    }

    /// Parse the keybinding table, falling back to the built-in table when none is configured
    pub fn parse_keybindings(&self) -> Vec<(ParsedBinding, WmAction)> {
        let table = if self.keybindings.is_empty() {
            self.default_keybindings()
        } else {
            self.keybindings.clone()
        };

        let mut bindings = Vec::new();
        for (combo, action) in &table {
            let Some(parsed) = parse_key_binding(combo) else {
                log::warn!("Failed to parse keybinding: {}", combo);
                continue;
            };
            match parse_action(action) {
                Some(action) => bindings.push((parsed, action)),
                None => log::warn!("Unknown action '{}' bound to {}", action, combo),
            }
        }
        bindings
    }

    /// The default key table, expressed in the same syntax as the config file
    fn default_keybindings(&self) -> HashMap<String, String> {
        let m = &self.general.mod_key;
        let mut table: HashMap<String, String> = [
            ("j", "focusstack +1"),
            ("k", "focusstack -1"),
            ("Shift+j", "rotatestack +1"),
            ("Shift+k", "rotatestack -1"),
            ("i", "incnmaster +1"),
            ("d", "incnmaster -1"),
            ("h", "setmfact -0.05"),
            ("l", "setmfact +0.05"),
            ("Tab", "view_previous"),
            ("q", "killclient"),
            ("t", "setlayout 0"),
            ("f", "toggletruefullscreen"),
            ("space", "setlayout"),
            ("Shift+space", "togglefloating"),
            ("Control+b", "togglebar"),
            ("a", "togglealwaysontop"),
            ("0", "view_all"),
            ("Shift+0", "tag_all"),
            ("comma", "focusmon -1"),
            ("period", "focusmon +1"),
            ("Shift+comma", "tagmon -1"),
            ("Shift+period", "tagmon +1"),
            ("Right", "viewnext"),
            ("Left", "viewprev"),
            ("Shift+Right", "tagtonext"),
            ("Shift+Left", "tagtoprev"),
            ("minus", "setgaps +1"),
            ("equal", "setgaps -1"),
            ("Shift+equal", "setgaps 0"),
            ("Shift+Return", "zoom"),
            ("Shift+q", "quit"),
        ]
        .into_iter()
        .map(|(k, v)| (format!("{}+{}", m, k), v.to_string()))
        .collect();

        for i in 1..=self.tags.len().min(9) {
            table.insert(format!("{}+{}", m, i), format!("view {}", i));
            table.insert(format!("{}+Control+{}", m, i), format!("toggleview {}", i));
            table.insert(format!("{}+Shift+{}", m, i), format!("tag {}", i));
            table.insert(format!("{}+Control+Shift+{}", m, i), format!("toggletag {}", i));
        }
        table
    }
}

/// Parse an action string such as `"view 3"`, `"focusstack -1"` or `"quit"`.
///
/// Tag arguments are 1-based tag numbers.
pub fn parse_action(s: &str) -> Option<WmAction> {
    let mut parts = s.split_whitespace();
    let name = parts.next()?;
    let arg = parts.next();

    let tag_bit = |a: Option<&str>| -> Option<u32> {
        let n: u32 = a?.parse().ok()?;
        (1..=MAX_TAGS as u32).contains(&n).then(|| 1 << (n - 1))
    };
    let int = |a: Option<&str>| -> Option<i32> { a?.trim_start_matches('+').parse().ok() };

    Some(match name {
        "view" => WmAction::View(tag_bit(arg)?),
        "view_all" => WmAction::View(!0),
        "view_previous" => WmAction::ViewPrevious,
        "toggleview" => WmAction::ToggleView(tag_bit(arg)?),
        "tag" => WmAction::Tag(tag_bit(arg)?),
        "tag_all" => WmAction::Tag(!0),
        "toggletag" => WmAction::ToggleTag(tag_bit(arg)?),
        "viewnext" => WmAction::ViewNext,
        "viewprev" => WmAction::ViewPrev,
        "tagtonext" => WmAction::TagToNext,
        "tagtoprev" => WmAction::TagToPrev,
        "focusstack" => WmAction::FocusStack(int(arg)?),
        "rotatestack" => WmAction::RotateStack(int(arg)?),
        "focusmon" => WmAction::FocusMon(int(arg)?),
        "tagmon" => WmAction::TagMon(int(arg)?),
        "incnmaster" => WmAction::IncNmaster(int(arg)?),
        "setmfact" => WmAction::SetMfact(arg?.trim_start_matches('+').parse().ok()?),
        "setlayout" => WmAction::SetLayout(match arg {
            Some(a) => Some(a.parse().ok()?),
            None => None,
        }),
        "setgaps" => WmAction::SetGaps(int(arg)?),
        "zoom" => WmAction::Zoom,
        "killclient" => WmAction::KillClient,
        "togglefloating" => WmAction::ToggleFloating,
        "togglealwaysontop" => WmAction::ToggleAlwaysOnTop,
        "togglebar" => WmAction::ToggleBar,
        "toggletruefullscreen" => WmAction::ToggleTrueFullscreen,
        "togglescratch" => WmAction::ToggleScratch(arg?.chars().next()?),
        "quit" => WmAction::Quit,
        _ => return None,
    })
}

// X11 modifier masks
const SHIFT_MASK: u16 = 1;
const CONTROL_MASK: u16 = 4;
const MOD1_MASK: u16 = 8; // Alt
const MOD4_MASK: u16 = 64; // Super/Win

fn parse_modifier(s: &str) -> Option<u16> {
    match s.to_lowercase().as_str() {
        "mod4" | "super" | "win" => Some(MOD4_MASK),
        "shift" => Some(SHIFT_MASK),
        "control" | "ctrl" => Some(CONTROL_MASK),
        "mod1" | "alt" => Some(MOD1_MASK),
        _ => None,
    }
}

/// Parse a key binding string like "Mod4+Shift+h" into keysym and modifiers
pub fn parse_key_binding(s: &str) -> Option<ParsedBinding> {
    let parts: Vec<&str> = s.split('+').collect();
    let (key_part, mods) = parts.split_last()?;

    let mut modifiers: u16 = 0;
    for part in mods {
        match parse_modifier(part) {
            Some(mask) => modifiers |= mask,
            None => log::warn!("Unknown modifier: {}", part),
        }
    }

    let keysym = key_to_keysym(key_part)?;
    Some(ParsedBinding { keysym, modifiers })
}

/// Convert key name to X11 keysym
fn key_to_keysym(key: &str) -> Option<u32> {
    let lower = key.to_lowercase();
    // Letters and digits map directly onto their Latin-1 keysyms
    if lower.len() == 1 {
        let c = lower.chars().next()?;
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            return Some(c as u32);
        }
    }
    match lower.as_str() {
        "return" | "enter" => Some(0xff0d),
        "tab" => Some(0xff09),
        "escape" | "esc" => Some(0xff1b),
        "space" => Some(0x20),
        "backspace" => Some(0xff08),
        "delete" => Some(0xffff),
        "comma" | "," => Some(0x2c),
        "period" | "." => Some(0x2e),
        "minus" | "-" => Some(0x2d),
        "equal" | "=" => Some(0x3d),
        "left" => Some(0xff51),
        "up" => Some(0xff52),
        "right" => Some(0xff53),
        "down" => Some(0xff54),
        "page_up" | "pageup" | "prior" => Some(0xff55),
        "page_down" | "pagedown" | "next" => Some(0xff56),
        "home" => Some(0xff50),
        "end" => Some(0xff57),
        "[" | "bracketleft" => Some(0x5b),
        "]" | "bracketright" => Some(0x5d),
        "/" | "slash" => Some(0x2f),
        f if f.starts_with('f') && f.len() > 1 => {
            // F1-F12
            let n: u32 = f[1..].parse().ok()?;
            (1..=12).contains(&n).then(|| 0xffbe + n - 1)
        }
        _ => {
            log::warn!("Unknown key: {}", key);
            None
        }
    }
}

/// Parse hex color string (e.g., "#5294e2" or "5294e2") to u32
pub fn parse_color(s: &str) -> Option<u32> {
    let s = s.trim_start_matches('#');
    u32::from_str_radix(s, 16).ok()
}
