//! tagwm - a dynamic tiling window manager for X11
//!
//! Clients live on bitmask tags, each monitor shows a set of tags under a
//! per-tag layout, and a JSON control socket exposes the same commands as
//! the key bindings.

mod arrange;
mod client;
mod commands;
mod config;
mod drag;
mod event;
mod ewmh;
mod focus;
mod hints;
mod ipc;
mod ipc_handler;
mod layout;
mod manage;
mod monitor;
mod process;
mod registry;
mod tags;
mod tracing;
mod types;
mod window_query;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use x11rb::connection::Connection;
use x11rb::cursor::Handle as CursorHandle;
use x11rb::protocol::xproto::*;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use config::{parse_color, Config, ParsedBinding, WmAction};
use drag::{DragState, EdgeSwitch};
use ewmh::Atoms;
use ipc::IpcServer;
use ipc_handler::BroadcastState;
use monitor::{probe_outputs, MonitorId};
use registry::Registry;
use tracing::EventTracer;

/// Poll token of the X connection
const X11: Token = Token(0);

/// How often a resting pointer is checked for edge switching
const EDGE_POLL_INTERVAL: Duration = Duration::from_millis(100);

const XK_NUM_LOCK: u32 = 0xff7f;

/// tagwm - dynamic tiling window manager
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/tagwm/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Pointer shapes for the root window and interactive drags
pub struct Cursors {
    pub normal: Cursor,
    pub moving: Cursor,
    pub resizing: Cursor,
}

impl Cursors {
    fn load(conn: &RustConnection, screen_num: usize) -> Result<Self> {
        let db = x11rb::resource_manager::new_from_default(conn)?;
        let handle = CursorHandle::new(conn, screen_num, &db)?.reply()?;
        Ok(Self {
            normal: handle.load_cursor(conn, "left_ptr")?,
            moving: handle.load_cursor(conn, "fleur")?,
            resizing: handle.load_cursor(conn, "se-resize")?,
        })
    }
}

/// Border pixels
pub struct Colors {
    pub normal: u32,
    pub selected: u32,
    pub urgent: u32,
}

impl Colors {
    fn from_config(config: &Config) -> Self {
        let colors = &config.colors;
        Self {
            normal: parse_color(&colors.border_normal).unwrap_or(0x444444),
            selected: parse_color(&colors.border_selected).unwrap_or(0x005577),
            urgent: parse_color(&colors.border_urgent).unwrap_or(0xff0000),
        }
    }
}

/// The main window manager state
pub struct Wm {
    pub conn: RustConnection,
    pub screen_num: usize,
    pub root: Window,
    pub atoms: Atoms,
    pub config: Config,
    /// Clients and monitors
    pub reg: Registry,
    /// WM check window for EWMH
    check_window: Window,
    /// Whether we should keep running
    pub running: bool,
    /// IPC server for external control
    pub ipc: Option<IpcServer>,
    /// Event tracer for debugging
    pub tracer: EventTracer,
    pub keybindings: Vec<(ParsedBinding, WmAction)>,
    /// Modifier bit NumLock is currently mapped to
    pub numlock_mask: u16,
    pub cursors: Cursors,
    pub colors: Colors,
    /// Interactive move or resize in progress
    pub drag: Option<DragState>,
    pub edge: EdgeSwitch,
    /// Events read ahead of the main loop, handled before new ones
    pub pending: VecDeque<Event>,
    /// Events held back until the current drag ends
    pub deferred: VecDeque<Event>,
    /// Control connections that became readable during a drag
    deferred_ipc: BTreeSet<Token>,
    /// State last announced to IPC subscribers
    pub last_broadcast: BroadcastState,
    /// Monitor the pointer was last seen on by root motion events
    pub motion_mon: Option<MonitorId>,
}

impl Wm {
    /// Connect to X11 and set up the window manager
    fn new(config: Config) -> Result<Self> {
        // Connect to X11 server
        let (conn, screen_num) =
            RustConnection::connect(None).context("Failed to connect to X11 server")?;

        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;

        log::info!(
            "Connected to X11, screen {}, root window 0x{:x}, {}x{}",
            screen_num,
            root,
            screen.width_in_pixels,
            screen.height_in_pixels
        );

        // Create atoms for EWMH
        let atoms = Atoms::new(&conn)?;

        let outputs = probe_outputs(&conn, root, screen_num)?;
        let reg = Registry::new(&config, &outputs);

        // Create a small check window for EWMH _NET_SUPPORTING_WM_CHECK
        let check_window = conn.generate_id()?;
        conn.create_window(
            0, // depth (copy from parent)
            check_window,
            root,
            -1, -1, 1, 1, 0, // x, y, w, h, border
            WindowClass::INPUT_ONLY,
            0, // visual (copy from parent)
            &CreateWindowAux::new(),
        )?;

        let cursors = Cursors::load(&conn, screen_num).context("Failed to load cursors")?;
        let colors = Colors::from_config(&config);
        let keybindings = config.parse_keybindings();

        Ok(Self {
            conn,
            screen_num,
            root,
            atoms,
            config,
            reg,
            check_window,
            running: true,
            ipc: None,
            tracer: EventTracer::new(),
            keybindings,
            numlock_mask: 0,
            cursors,
            colors,
            drag: None,
            edge: EdgeSwitch::default(),
            pending: VecDeque::new(),
            deferred: VecDeque::new(),
            deferred_ipc: BTreeSet::new(),
            last_broadcast: BroadcastState::default(),
            motion_mon: None,
        })
    }

    /// Get screen info
    pub fn screen(&self) -> &Screen {
        &self.conn.setup().roots[self.screen_num]
    }

    /// Become the window manager by requesting SubstructureRedirect on root
    fn become_wm(&self) -> Result<()> {
        // SubstructureRedirect is the key - it makes us the WM
        let event_mask = EventMask::SUBSTRUCTURE_REDIRECT
            | EventMask::SUBSTRUCTURE_NOTIFY
            | EventMask::BUTTON_PRESS
            | EventMask::POINTER_MOTION
            | EventMask::ENTER_WINDOW
            | EventMask::LEAVE_WINDOW
            | EventMask::STRUCTURE_NOTIFY
            | EventMask::PROPERTY_CHANGE;

        let result = self.conn.change_window_attributes(
            self.root,
            &ChangeWindowAttributesAux::new()
                .event_mask(event_mask)
                .cursor(self.cursors.normal),
        );

        // Flush and check for errors
        self.conn.flush()?;

        if let Err(e) = result?.check() {
            anyhow::bail!("Another window manager is already running! Error: {}", e);
        }

        log::info!("Successfully became the window manager");
        Ok(())
    }

    /// Set up EWMH properties on root window
    fn setup_ewmh(&self) -> Result<()> {
        self.conn.change_property32(
            PropMode::REPLACE,
            self.root,
            self.atoms.net_supported,
            AtomEnum::ATOM,
            &self.atoms.supported(),
        )?;

        // Set _NET_SUPPORTING_WM_CHECK on root and check window
        for win in [self.root, self.check_window] {
            self.conn.change_property32(
                PropMode::REPLACE,
                win,
                self.atoms.net_supporting_wm_check,
                AtomEnum::WINDOW,
                &[self.check_window],
            )?;
        }
        self.conn.change_property8(
            PropMode::REPLACE,
            self.check_window,
            self.atoms.net_wm_name,
            self.atoms.utf8_string,
            b"tagwm",
        )?;

        let ntags = self.config.tags.len() as u32;
        self.set_root_cardinal(self.atoms.net_number_of_desktops, ntags)?;
        self.conn.change_property8(
            PropMode::REPLACE,
            self.root,
            self.atoms.net_desktop_names,
            self.atoms.utf8_string,
            &desktop_names(&self.config.tags),
        )?;
        self.conn.change_property32(
            PropMode::REPLACE,
            self.root,
            self.atoms.net_desktop_viewport,
            AtomEnum::CARDINAL,
            &vec![0; 2 * ntags as usize],
        )?;
        self.update_current_desktop()?;

        self.conn
            .delete_property(self.root, self.atoms.net_client_list)?;
        self.conn
            .delete_property(self.root, self.atoms.net_active_window)?;

        self.conn.flush()?;
        log::info!("EWMH properties set up");
        Ok(())
    }

    pub fn set_root_cardinal(&self, atom: Atom, value: u32) -> Result<()> {
        self.conn
            .change_property32(PropMode::REPLACE, self.root, atom, AtomEnum::CARDINAL, &[value])?;
        Ok(())
    }

    /// Lock-modifier variations every grab is repeated with
    pub fn lock_combinations(&self) -> [u16; 4] {
        let lock = u16::from(ModMask::LOCK);
        [0, lock, self.numlock_mask, self.numlock_mask | lock]
    }

    /// Find the modifier bit NumLock is mapped to
    pub fn update_numlock_mask(&mut self) -> Result<()> {
        let setup = self.conn.setup();
        let min_keycode = setup.min_keycode;
        let max_keycode = setup.max_keycode;

        let mapping = self
            .conn
            .get_keyboard_mapping(min_keycode, max_keycode - min_keycode + 1)?
            .reply()?;
        let modmap = self.conn.get_modifier_mapping()?.reply()?;

        let codes = keycode_map(min_keycode, mapping.keysyms_per_keycode, &mapping.keysyms);
        self.numlock_mask = codes
            .get(&XK_NUM_LOCK)
            .map_or(0, |&code| modifier_bit(&modmap.keycodes, code));
        log::debug!("NumLock mask is 0x{:x}", self.numlock_mask);
        Ok(())
    }

    /// Grab all configured keybindings on the root window
    pub fn grab_keys(&self) -> Result<()> {
        // Get keyboard mapping to find keycodes
        let setup = self.conn.setup();
        let min_keycode = setup.min_keycode;
        let max_keycode = setup.max_keycode;

        let mapping = self
            .conn
            .get_keyboard_mapping(min_keycode, max_keycode - min_keycode + 1)?
            .reply()?;
        let keysym_to_keycode =
            keycode_map(min_keycode, mapping.keysyms_per_keycode, &mapping.keysyms);

        self.conn.ungrab_key(Grab::ANY, self.root, ModMask::ANY)?;

        for (binding, action) in &self.keybindings {
            let Some(&keycode) = keysym_to_keycode.get(&binding.keysym) else {
                log::warn!(
                    "Could not find keycode for {:?} (keysym 0x{:x})",
                    action,
                    binding.keysym
                );
                continue;
            };
            // Grab with and without NumLock/CapsLock to handle those states
            for extra in self.lock_combinations() {
                self.conn.grab_key(
                    false, // owner_events
                    self.root,
                    ModMask::from(binding.modifiers | extra),
                    keycode,
                    GrabMode::ASYNC,
                    GrabMode::ASYNC,
                )?;
            }
            log::debug!(
                "Grabbed {:?} (keycode {}, mods 0x{:x})",
                action,
                keycode,
                binding.modifiers
            );
        }

        self.conn.flush()?;
        Ok(())
    }

    /// Put events held back by a drag in front of anything read since
    pub fn resume_after_drag(&mut self) {
        let mut events = std::mem::take(&mut self.deferred);
        events.append(&mut self.pending);
        self.pending = events;
    }

    /// Handle every queued X event, those read ahead first
    fn dispatch_x_events(&mut self) -> Result<()> {
        let mut handled = false;
        while self.running {
            let event = match self.pending.pop_front() {
                Some(event) => event,
                None => match self.conn.poll_for_event()? {
                    Some(event) => event,
                    None => break,
                },
            };
            handled = true;
            if let Err(e) = self.handle_event(event) {
                log::warn!("Error handling event: {:#}", e);
            }
        }
        if handled {
            self.conn.flush()?;
            self.broadcast_changes();
        }
        Ok(())
    }

    fn run(&mut self, poll: &mut Poll) -> Result<()> {
        log::info!("Entering event loop");

        let fd = self.conn.stream().as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), X11, Interest::READABLE)
            .context("Failed to register the X connection")?;
        let mut events = Events::with_capacity(64);

        while self.running {
            // Buffered events never make the socket readable
            self.dispatch_x_events()?;
            if self.drag.is_none() && !self.deferred_ipc.is_empty() {
                for token in std::mem::take(&mut self.deferred_ipc) {
                    self.service_ipc(token);
                }
                continue;
            }
            if !self.running {
                break;
            }

            let timeout = self
                .config
                .general
                .mouse_edge_switch
                .then_some(EDGE_POLL_INTERVAL);
            if let Err(e) = poll.poll(&mut events, timeout) {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e).context("Poll failed");
            }

            for event in events.iter() {
                match event.token() {
                    X11 => {}
                    ipc::LISTENER => {
                        if let Some(ipc) = self.ipc.as_mut() {
                            ipc.accept();
                        }
                    }
                    token if self.drag.is_some() => {
                        self.deferred_ipc.insert(token);
                    }
                    token => self.service_ipc(token),
                }
            }

            self.dispatch_x_events()?;
            if let Err(e) = self.check_edge_switch() {
                log::warn!("Edge switch failed: {:#}", e);
            }
            self.conn.flush()?;
        }

        log::info!("Exiting window manager");
        Ok(())
    }

    /// Release every client and give the display back
    fn cleanup(&mut self) -> Result<()> {
        self.running = false;
        self.drag = None;
        self.view(!0)?;
        for mon in self.reg.order.clone() {
            while let Some(&id) = self.reg.mon(mon).stack.first() {
                self.unmanage(id, false)?;
            }
        }
        self.conn.ungrab_key(Grab::ANY, self.root, ModMask::ANY)?;
        self.conn.destroy_window(self.check_window)?;
        for cursor in [self.cursors.normal, self.cursors.moving, self.cursors.resizing] {
            self.conn.free_cursor(cursor)?;
        }
        self.conn
            .set_input_focus(InputFocus::POINTER_ROOT, self.root, x11rb::CURRENT_TIME)?;
        self.conn
            .delete_property(self.root, self.atoms.net_active_window)?;
        self.conn.flush()?;
        if let Some(ipc) = self.ipc.take() {
            log::info!(
                "Closing IPC server at {:?} ({} connections)",
                ipc.path(),
                ipc.connection_count()
            );
        }
        log::info!("Cleaned up");
        Ok(())
    }
}

/// Map each keysym to the first keycode producing it
fn keycode_map(min_keycode: Keycode, keysyms_per_keycode: u8, keysyms: &[Keysym]) -> HashMap<Keysym, Keycode> {
    let mut map = HashMap::new();
    let per = keysyms_per_keycode.max(1) as usize;
    for (i, chunk) in keysyms.chunks(per).enumerate() {
        for &keysym in chunk {
            if keysym != 0 {
                map.entry(keysym).or_insert(min_keycode + i as u8);
            }
        }
    }
    map
}

/// The modifier bit `keycode` is bound to in a modifier mapping (eight
/// rows of equal length, Shift first), or 0
fn modifier_bit(modmap: &[Keycode], keycode: Keycode) -> u16 {
    let per = modmap.len() / 8;
    if per == 0 {
        return 0;
    }
    modmap
        .chunks(per)
        .position(|row| row.contains(&keycode))
        .map_or(0, |row| 1 << row)
}

/// Tag names as a NUL-separated UTF-8 list
fn desktop_names(tags: &[String]) -> Vec<u8> {
    let mut names = Vec::new();
    for tag in tags {
        names.extend_from_slice(tag.as_bytes());
        names.push(0);
    }
    names
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    log::info!("Starting tagwm");

    let config = match cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };

    let mut poll = Poll::new().context("Failed to create poll")?;

    // Create window manager
    let mut wm = Wm::new(config)?;

    // Become the window manager
    wm.become_wm()?;

    // Set up EWMH properties
    wm.setup_ewmh()?;

    // Grab our keybindings
    wm.update_numlock_mask()?;
    wm.grab_keys()?;

    // Initialize IPC server (non-fatal if it fails)
    let path = ipc::socket_path(wm.config.general.socket_path.as_deref());
    wm.ipc = match IpcServer::bind(path, poll.registry()) {
        Ok(server) => Some(server),
        Err(e) => {
            log::warn!("Failed to start IPC server: {}. IPC will be disabled.", e);
            None
        }
    };

    // Manage any existing windows
    wm.scan()?;
    wm.focus(None)?;
    wm.arrange(None)?;
    wm.last_broadcast = wm.broadcast_state();

    // Run the event loop
    let result = wm.run(&mut poll);
    if let Err(e) = wm.cleanup() {
        log::warn!("Cleanup failed: {:#}", e);
    }
    result
}
