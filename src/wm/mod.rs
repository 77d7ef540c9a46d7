//! Window manager state
//!
//! The [`Wm`] context is the process-wide mutable state: client registry,
//! key bindings, keymap, screen dimensions, and the scheduler's stop flag.
//! It is constructed once at startup and threaded by `&mut` into the
//! dispatcher, the command server, and the scheduler tasks; there are no
//! ambient globals.

pub mod client;
pub mod events;
pub mod keyboard;
pub mod layout;

use anyhow::Result;
use tracing::{debug, warn};

use crate::interp::CallbackRef;
use crate::wm::client::{ClientRegistry, Rect, Window};
use crate::wm::keyboard::{BindingTable, Keymap};
use crate::x11::Display;

pub struct Wm {
    pub clients: ClientRegistry,
    pub bindings: BindingTable,
    pub keymap: Keymap,
    pub root: Window,
    pub screen_width: u16,
    pub screen_height: u16,
    /// Window last given input focus by the pointer-follow task.
    pub focused: Option<Window>,
    /// Cooperative stop: checked at the top of every scheduler iteration.
    pub stop: bool,
    /// Verbose event tracing.
    pub trace: bool,
}

impl Wm {
    pub fn new(root: Window, screen_width: u16, screen_height: u16, keymap: Keymap) -> Self {
        Self {
            clients: ClientRegistry::new(),
            bindings: BindingTable::new(),
            keymap,
            root,
            screen_width,
            screen_height,
            focused: None,
            stop: false,
            trace: false,
        }
    }

    /// Bind a key: grab it at the protocol level and record the callback.
    pub fn bind_key(
        &mut self,
        dpy: &dyn Display,
        mod_mask: u16,
        keysym: u32,
        callback: CallbackRef,
    ) -> Result<()> {
        self.bindings.bind(dpy, &self.keymap, mod_mask, keysym, callback)
    }

    /// Adopt windows found by the startup scan, preserving scan order.
    pub fn adopt_scanned(&mut self, scanned: Vec<(Window, Rect, u16)>) {
        for (window, rect, border_width) in scanned {
            match self.clients.add(window) {
                Some(client) => {
                    client.rect = rect;
                    client.border_width = border_width;
                    debug!("adopted existing window {}", window);
                }
                None => debug!("window {} already managed, skipping", window),
            }
        }
    }

    /// Pointer-follow focus: focus the managed window under the pointer when
    /// it differs from the last focused one. Failed focus requests are
    /// logged and leave the previous focus in place.
    pub fn focus_pointer_window(&mut self, dpy: &dyn Display) -> Result<()> {
        let Some(under) = dpy.pointer_window()? else {
            return Ok(());
        };
        if self.focused == Some(under) || self.clients.find(under).is_none() {
            return Ok(());
        }
        match dpy.set_input_focus(under) {
            Ok(()) => {
                debug!("focus follows pointer to window {}", under);
                self.focused = Some(under);
            }
            Err(e) => warn!("failed to focus window {}: {}", under, e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x11::testing::{Call, RecordingDisplay};

    fn test_wm() -> Wm {
        Wm::new(Window(1), 1920, 1080, Keymap::new(8, 1, vec![0; 248]))
    }

    #[test]
    fn adopt_scanned_preserves_order_and_geometry() {
        let mut wm = test_wm();
        wm.adopt_scanned(vec![
            (Window(10), Rect::new(5, 5, 300, 200), 2),
            (Window(20), Rect::new(0, 0, 640, 480), 0),
        ]);
        let ids: Vec<u32> = wm.clients.iter().map(|c| c.window.0).collect();
        assert_eq!(ids, vec![10, 20]);
        assert_eq!(wm.clients.find(Window(10)).unwrap().rect, Rect::new(5, 5, 300, 200));
    }

    #[test]
    fn pointer_focus_only_managed_windows() {
        let mut wm = test_wm();
        wm.clients.add(Window(10));

        let mut dpy = RecordingDisplay::new(1920, 1080);
        dpy.pointer = Some(Window(99));
        wm.focus_pointer_window(&dpy).unwrap();
        assert!(dpy.calls().is_empty());
        assert_eq!(wm.focused, None);

        dpy.pointer = Some(Window(10));
        wm.focus_pointer_window(&dpy).unwrap();
        assert_eq!(dpy.calls(), vec![Call::Focus(Window(10))]);
        assert_eq!(wm.focused, Some(Window(10)));

        // Unchanged pointer position does not refocus.
        wm.focus_pointer_window(&dpy).unwrap();
        assert_eq!(dpy.calls().len(), 1);
    }
}
