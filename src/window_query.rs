//! Window property query functions.
//!
//! Stateless functions for querying X11 window properties. Failed queries
//! (usually a window that has already been destroyed) read as "unset".

use anyhow::Result;
use x11rb::connection::Connection;
use x11rb::protocol::res::{self, ClientIdMask, ClientIdSpec};
use x11rb::protocol::xproto::*;

use crate::ewmh::Atoms;

/// Fetch a property's raw reply, `None` if the window or property is gone
fn property(
    conn: &impl Connection,
    window: Window,
    prop: impl Into<Atom>,
    type_: impl Into<Atom>,
    long_length: u32,
) -> Option<GetPropertyReply> {
    conn.get_property(false, window, prop, type_, 0, long_length)
        .ok()?
        .reply()
        .ok()
}

/// Read a property as a list of CARD32 values (empty if unset)
pub fn get_cardinals(
    conn: &impl Connection,
    window: Window,
    prop: impl Into<Atom>,
    type_: impl Into<Atom>,
    long_length: u32,
) -> Vec<u32> {
    property(conn, window, prop, type_, long_length)
        .and_then(|reply| reply.value32().map(|v| v.collect()))
        .unwrap_or_default()
}

/// Get the window title from _NET_WM_NAME or WM_NAME (empty if neither is set).
pub fn get_window_title(conn: &impl Connection, atoms: &Atoms, window: Window) -> String {
    let candidates = [
        (atoms.net_wm_name, atoms.utf8_string),
        (AtomEnum::WM_NAME.into(), AtomEnum::STRING.into()),
    ];
    for (prop, type_) in candidates {
        if let Some(reply) = property(conn, window, prop, type_, 1024) {
            if !reply.value.is_empty() {
                return String::from_utf8_lossy(&reply.value).into_owned();
            }
        }
    }
    String::new()
}

/// Split a WM_CLASS value into (instance, class)
pub fn parse_wm_class(value: &[u8]) -> (String, String) {
    let mut parts = value
        .split(|&b| b == 0)
        .map(|s| String::from_utf8_lossy(s).into_owned());
    let instance = parts.next().unwrap_or_default();
    let class = parts.next().unwrap_or_default();
    (instance, class)
}

/// Get (instance, class) from WM_CLASS
pub fn get_wm_class(conn: &impl Connection, window: Window) -> (String, String) {
    property(conn, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 256)
        .map(|reply| parse_wm_class(&reply.value))
        .unwrap_or_default()
}

/// Window this one is transient for, if any
pub fn get_transient_for(conn: &impl Connection, window: Window) -> Option<Window> {
    get_cardinals(conn, window, AtomEnum::WM_TRANSIENT_FOR, AtomEnum::WINDOW, 1)
        .first()
        .copied()
        .filter(|&w| w != x11rb::NONE)
}

/// First atom stored in an ATOM-typed property
pub fn get_atom_prop(conn: &impl Connection, window: Window, prop: Atom) -> Option<Atom> {
    get_cardinals(conn, window, prop, AtomEnum::ATOM, 1)
        .first()
        .copied()
}

/// Raw WM_NORMAL_HINTS values
pub fn get_normal_hints(conn: &impl Connection, window: Window) -> Vec<u32> {
    get_cardinals(
        conn,
        window,
        AtomEnum::WM_NORMAL_HINTS,
        AtomEnum::WM_SIZE_HINTS,
        18,
    )
}

/// Raw WM_HINTS values
pub fn get_wm_hints(conn: &impl Connection, window: Window) -> Vec<u32> {
    get_cardinals(conn, window, AtomEnum::WM_HINTS, AtomEnum::WM_HINTS, 9)
}

/// ICCCM WM_STATE of a window (1 = normal, 3 = iconic)
pub fn get_wm_state(conn: &impl Connection, atoms: &Atoms, window: Window) -> Option<u32> {
    get_cardinals(conn, window, atoms.wm_state, atoms.wm_state, 2)
        .first()
        .copied()
}

/// Owning process of a window: asked of the X-Resource extension first,
/// then read from _NET_WM_PID. Returns 0 when unknown.
pub fn get_window_pid(conn: &impl Connection, atoms: &Atoms, window: Window) -> u32 {
    let spec = ClientIdSpec {
        client: window,
        mask: ClientIdMask::LOCAL_CLIENT_PID,
    };
    let from_res = res::query_client_ids(conn, &[spec])
        .ok()
        .and_then(|cookie| cookie.reply().ok())
        .and_then(|reply| {
            reply
                .ids
                .into_iter()
                .find(|id| id.spec.mask.contains(ClientIdMask::LOCAL_CLIENT_PID))
                .and_then(|id| id.value.first().copied())
        });
    from_res.unwrap_or_else(|| {
        get_cardinals(conn, window, atoms.net_wm_pid, AtomEnum::CARDINAL, 1)
            .first()
            .copied()
            .unwrap_or(0)
    })
}

/// Check if a window lists `protocol` in WM_PROTOCOLS.
pub fn supports_protocol(conn: &impl Connection, atoms: &Atoms, window: Window, protocol: Atom) -> bool {
    get_cardinals(conn, window, atoms.wm_protocols, AtomEnum::ATOM, 32).contains(&protocol)
}

/// Send a WM_PROTOCOLS client message if the window supports `protocol`.
///
/// Returns whether the message was sent.
pub fn send_protocol(conn: &impl Connection, atoms: &Atoms, window: Window, protocol: Atom) -> Result<bool> {
    if !supports_protocol(conn, atoms, window, protocol) {
        return Ok(false);
    }
    let data = ClientMessageData::from([protocol, x11rb::CURRENT_TIME, 0u32, 0u32, 0u32]);
    let event = ClientMessageEvent {
        response_type: CLIENT_MESSAGE_EVENT,
        format: 32,
        sequence: 0,
        window,
        type_: atoms.wm_protocols,
        data,
    };
    conn.send_event(false, window, EventMask::NO_EVENT, event)?;
    Ok(true)
}
