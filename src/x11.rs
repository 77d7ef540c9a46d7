//! X11 backend
//!
//! Owns the x11rb connection and everything wire-level: becoming the window
//! manager (substructure-redirect acquisition), the root event mask, window
//! scans, key grabs, geometry requests, and translation of raw X events into
//! the wire-independent [`WmEvent`] values the dispatcher consumes.
//!
//! Core logic never talks to x11rb directly; it goes through the [`Display`]
//! trait so it can run against a recording fake in tests.

use anyhow::{Context, Result};
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xproto::*;
use x11rb::rust_connection::RustConnection;

use crate::wm::client::{Rect, Window};
use crate::wm::events::WmEvent;
use crate::wm::keyboard::Keymap;

/// Window attributes the dispatcher cares about.
#[derive(Debug, Clone, Copy)]
pub struct WindowAttrs {
    pub override_redirect: bool,
    pub viewable: bool,
}

/// The protocol operations the core issues. Implemented by [`XDisplay`] for
/// a live connection and by fakes in tests.
pub trait Display {
    fn root(&self) -> Window;
    fn screen_size(&self) -> (u16, u16);

    /// Reassign a window's geometry and border width.
    fn configure(&self, window: Window, rect: Rect, border_width: u16) -> Result<()>;
    fn map(&self, window: Window) -> Result<()>;

    fn window_attributes(&self, window: Window) -> Result<WindowAttrs>;
    /// Current geometry and border width of a window.
    fn query_geometry(&self, window: Window) -> Result<(Rect, u16)>;

    /// Grab one physical key on the root window.
    fn grab_key(&self, mod_mask: u16, keycode: u8) -> Result<()>;
    fn set_input_focus(&self, window: Window) -> Result<()>;
    /// The top-level window currently under the pointer, if any.
    fn pointer_window(&self) -> Result<Option<Window>>;

    /// Graceful-close negotiation: ask the window to close itself if it
    /// advertises `WM_DELETE_WINDOW`, otherwise kill its client.
    fn close_window(&self, window: Window) -> Result<()>;

    fn flush(&self) -> Result<()>;
}

/// ICCCM atoms used by the graceful-close handshake.
#[derive(Debug, Clone, Copy)]
struct Atoms {
    wm_protocols: Atom,
    wm_delete_window: Atom,
}

impl Atoms {
    fn intern(conn: &RustConnection) -> Result<Self> {
        let wm_protocols = conn.intern_atom(false, b"WM_PROTOCOLS")?.reply()?.atom;
        let wm_delete_window = conn.intern_atom(false, b"WM_DELETE_WINDOW")?.reply()?.atom;
        Ok(Self {
            wm_protocols,
            wm_delete_window,
        })
    }
}

/// Live X server connection.
pub struct XDisplay {
    conn: RustConnection,
    root: Window,
    screen_width: u16,
    screen_height: u16,
    atoms: Atoms,
}

impl XDisplay {
    /// Connect to the X server named by `DISPLAY`.
    pub fn open() -> Result<Self> {
        let (conn, screen_num) =
            x11rb::connect(None).context("failed to connect to X server")?;
        let screen = &conn.setup().roots[screen_num];
        let root = Window(screen.root);
        let screen_width = screen.width_in_pixels;
        let screen_height = screen.height_in_pixels;
        debug!(
            "connected to X server, screen {}, root {}, {}x{}",
            screen_num, root, screen_width, screen_height
        );
        let atoms = Atoms::intern(&conn).context("failed to intern ICCCM atoms")?;
        Ok(Self {
            conn,
            root,
            screen_width,
            screen_height,
            atoms,
        })
    }

    /// Claim window-placement authority by selecting substructure redirect
    /// on the root window, then the full root event mask. Fails if another
    /// window manager already holds the redirect.
    pub fn become_wm(&self) -> Result<()> {
        self.conn.grab_server()?;
        let result = self
            .conn
            .change_window_attributes(
                self.root.0,
                &ChangeWindowAttributesAux::new()
                    .event_mask(EventMask::SUBSTRUCTURE_REDIRECT),
            )?
            .check()
            .context("another window manager is already running");
        self.conn.ungrab_server()?;
        self.conn.flush()?;
        result?;

        let mask = EventMask::SUBSTRUCTURE_REDIRECT
            | EventMask::SUBSTRUCTURE_NOTIFY
            | EventMask::STRUCTURE_NOTIFY
            | EventMask::ENTER_WINDOW
            | EventMask::LEAVE_WINDOW
            | EventMask::PROPERTY_CHANGE
            | EventMask::BUTTON_PRESS
            | EventMask::BUTTON_RELEASE
            | EventMask::FOCUS_CHANGE;
        self.conn
            .change_window_attributes(
                self.root.0,
                &ChangeWindowAttributesAux::new().event_mask(mask),
            )?
            .check()
            .context("failed to select root window events")?;
        Ok(())
    }

    /// Load the current keycode-to-keysym mapping.
    pub fn keymap(&self) -> Result<Keymap> {
        let setup = self.conn.setup();
        let min = setup.min_keycode;
        let max = setup.max_keycode;
        let reply = self
            .conn
            .get_keyboard_mapping(min, max - min + 1)?
            .reply()
            .context("failed to get keyboard mapping")?;
        Ok(Keymap::new(
            min,
            reply.keysyms_per_keycode,
            reply.keysyms,
        ))
    }

    /// Enumerate viewable, non-override-redirect children of the root, with
    /// their current geometry. Used for the initial adoption scan.
    pub fn scan(&self) -> Result<Vec<(Window, Rect, u16)>> {
        let tree = self.conn.query_tree(self.root.0)?.reply()?;
        debug!("root window has {} children", tree.children.len());
        let mut found = Vec::new();
        for &child in &tree.children {
            let attrs = match self.conn.get_window_attributes(child)?.reply() {
                Ok(a) => a,
                Err(e) => {
                    debug!("skipping window {}: attributes query failed: {}", child, e);
                    continue;
                }
            };
            if attrs.override_redirect || attrs.map_state != MapState::VIEWABLE {
                continue;
            }
            match self.conn.get_geometry(child)?.reply() {
                Ok(geom) => found.push((
                    Window(child),
                    Rect::new(geom.x, geom.y, geom.width, geom.height),
                    geom.border_width,
                )),
                Err(e) => warn!("failed to get geometry for window {}: {}", child, e),
            }
        }
        Ok(found)
    }

    /// Pull the next meaningful event off the queue, draining any events
    /// that are observational only. `Ok(None)` means the queue is empty.
    pub fn poll_event(&self, trace: bool) -> Result<Option<WmEvent>> {
        while let Some(event) = self.conn.poll_for_event()? {
            if trace {
                debug!("X event: {:?}", event);
            }
            if let Some(ev) = translate(&event) {
                return Ok(Some(ev));
            }
        }
        Ok(None)
    }
}

/// Map a raw X event onto the dispatcher's vocabulary. Events with no state
/// transition are dropped here (after the optional trace log) so the queue
/// is always drained.
fn translate(event: &Event) -> Option<WmEvent> {
    match event {
        Event::MapRequest(e) => Some(WmEvent::MapRequested {
            window: Window(e.window),
        }),
        Event::ConfigureRequest(e) => Some(WmEvent::ConfigureRequested {
            window: Window(e.window),
            rect: Rect::new(e.x, e.y, e.width, e.height),
            border_width: e.border_width,
        }),
        Event::UnmapNotify(e) => Some(WmEvent::UnmapNotified {
            window: Window(e.window),
            event_window: Window(e.event),
            // High bit of response_type marks a SendEvent-generated event.
            synthetic: e.response_type & 0x80 != 0,
        }),
        Event::DestroyNotify(e) => Some(WmEvent::DestroyNotified {
            window: Window(e.window),
        }),
        Event::KeyPress(e) => Some(WmEvent::KeyPressed {
            keycode: e.detail,
            mod_mask: u16::from(e.state),
        }),
        Event::MappingNotify(_) => Some(WmEvent::MappingChanged),
        Event::Error(e) => {
            // Individual request errors are recoverable: log and move on.
            warn!(
                "X error: code={}, major={}, minor={}",
                e.error_code, e.major_opcode, e.minor_opcode
            );
            None
        }
        _ => None,
    }
}

impl Display for XDisplay {
    fn root(&self) -> Window {
        self.root
    }

    fn screen_size(&self) -> (u16, u16) {
        (self.screen_width, self.screen_height)
    }

    fn configure(&self, window: Window, rect: Rect, border_width: u16) -> Result<()> {
        debug!(
            "updating geometry for window {} to ({},{}) + ({},{}), border width={}",
            window, rect.x, rect.y, rect.width, rect.height, border_width
        );
        self.conn.configure_window(
            window.0,
            &ConfigureWindowAux::new()
                .x(i32::from(rect.x))
                .y(i32::from(rect.y))
                .width(u32::from(rect.width))
                .height(u32::from(rect.height))
                .border_width(u32::from(border_width)),
        )?;
        Ok(())
    }

    fn map(&self, window: Window) -> Result<()> {
        self.conn.map_window(window.0)?;
        Ok(())
    }

    fn window_attributes(&self, window: Window) -> Result<WindowAttrs> {
        let attrs = self
            .conn
            .get_window_attributes(window.0)?
            .reply()
            .with_context(|| format!("failed to get attributes for window {}", window))?;
        Ok(WindowAttrs {
            override_redirect: attrs.override_redirect,
            viewable: attrs.map_state == MapState::VIEWABLE,
        })
    }

    fn query_geometry(&self, window: Window) -> Result<(Rect, u16)> {
        let geom = self
            .conn
            .get_geometry(window.0)?
            .reply()
            .with_context(|| format!("failed to get geometry for window {}", window))?;
        Ok((
            Rect::new(geom.x, geom.y, geom.width, geom.height),
            geom.border_width,
        ))
    }

    fn grab_key(&self, mod_mask: u16, keycode: u8) -> Result<()> {
        self.conn.grab_key(
            true,
            self.root.0,
            ModMask::from(mod_mask),
            keycode,
            GrabMode::ASYNC,
            GrabMode::ASYNC,
        )?;
        Ok(())
    }

    fn set_input_focus(&self, window: Window) -> Result<()> {
        self.conn
            .set_input_focus(InputFocus::POINTER_ROOT, window.0, x11rb::CURRENT_TIME)?;
        Ok(())
    }

    fn pointer_window(&self) -> Result<Option<Window>> {
        let reply = self.conn.query_pointer(self.root.0)?.reply()?;
        if reply.child == x11rb::NONE {
            Ok(None)
        } else {
            Ok(Some(Window(reply.child)))
        }
    }

    fn close_window(&self, window: Window) -> Result<()> {
        // Two steps: a fast local property read, then one of the two
        // termination requests. Never blocks on the client.
        let supports_delete = self
            .conn
            .get_property(
                false,
                window.0,
                self.atoms.wm_protocols,
                AtomEnum::ATOM,
                0,
                1024,
            )?
            .reply()
            .map(|prop| {
                prop.value32()
                    .map(|mut atoms| atoms.any(|a| a == self.atoms.wm_delete_window))
                    .unwrap_or(false)
            })
            .unwrap_or(false);

        if supports_delete {
            debug!("sending WM_DELETE_WINDOW to window {}", window);
            let msg = ClientMessageEvent::new(
                32,
                window.0,
                self.atoms.wm_protocols,
                [self.atoms.wm_delete_window, 0, 0, 0, 0],
            );
            self.conn
                .send_event(false, window.0, EventMask::NO_EVENT, msg)?;
        } else {
            debug!("window {} does not support WM_DELETE_WINDOW, killing", window);
            self.conn.kill_client(window.0)?;
        }
        self.conn.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }
}
