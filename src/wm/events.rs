//! Protocol event dispatcher
//!
//! Drives the managed-window lifecycle from wire-independent protocol
//! notifications. The X backend translates raw events into [`WmEvent`]
//! values and drains everything else; this module owns the state
//! transitions.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::interp::Interpreter;
use crate::wm::client::{Rect, Window};
use crate::wm::layout;
use crate::wm::Wm;
use crate::x11::Display;

/// Protocol notifications with a state transition attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WmEvent {
    /// A window asked to be mapped.
    MapRequested { window: Window },
    /// A window asked for new geometry. The requested values are ignored;
    /// the manager owns geometry.
    ConfigureRequested {
        window: Window,
        rect: Rect,
        border_width: u16,
    },
    /// A window was unmapped. `synthetic` is set for SendEvent-generated
    /// notifications (ICCCM withdraw), `event_window` is the window the
    /// event was reported relative to.
    UnmapNotified {
        window: Window,
        event_window: Window,
        synthetic: bool,
    },
    /// A window was destroyed.
    DestroyNotified { window: Window },
    /// A grabbed key was pressed.
    KeyPressed { keycode: u8, mod_mask: u16 },
    /// The keyboard mapping changed. Observed but not applied; existing
    /// grabs keep their keycodes.
    MappingChanged,
}

/// Apply one protocol event to the window manager state.
pub fn dispatch(
    wm: &mut Wm,
    dpy: &dyn Display,
    interp: &mut dyn Interpreter,
    event: WmEvent,
) -> Result<()> {
    match event {
        WmEvent::MapRequested { window } => handle_map_request(wm, dpy, window),
        WmEvent::ConfigureRequested { window, rect, .. } => {
            handle_configure_request(wm, dpy, window, rect)
        }
        WmEvent::UnmapNotified {
            window,
            event_window,
            synthetic,
        } => handle_unmap(wm, window, event_window, synthetic),
        WmEvent::DestroyNotified { window } => handle_destroy(wm, window),
        WmEvent::KeyPressed { keycode, mod_mask } => {
            handle_key_press(wm, dpy, interp, keycode, mod_mask);
            Ok(())
        }
        WmEvent::MappingChanged => {
            // Known gap: grabs are not re-issued for the new mapping.
            debug!("keyboard mapping changed, keeping existing grabs");
            Ok(())
        }
    }
}

fn handle_map_request(wm: &mut Wm, dpy: &dyn Display, window: Window) -> Result<()> {
    let attrs = match dpy.window_attributes(window) {
        Ok(attrs) => attrs,
        Err(e) => {
            warn!("map request for window {}: {}", window, e);
            return Ok(());
        }
    };
    if attrs.override_redirect {
        debug!("window {} has override redirect set, ignoring map request", window);
        return Ok(());
    }

    if wm.clients.find(window).is_none() {
        // New window: record its current geometry, then take it over.
        let (rect, border_width) = match dpy.query_geometry(window) {
            Ok(geom) => geom,
            Err(e) => {
                // Best-known state: manage it anyway with a zeroed rect.
                warn!("failed to read geometry for window {}: {}", window, e);
                (Rect::default(), 0)
            }
        };
        if let Some(client) = wm.clients.add(window) {
            client.rect = rect;
            client.border_width = border_width;
            let (rect, bw) = (client.rect, client.border_width);
            dpy.configure(window, rect, bw)?;
        }
        info!("managing window {}", window);
    } else {
        debug!("window {} already managed", window);
    }

    dpy.map(window)?;
    layout::arrange(wm, dpy)?;
    info!("mapped window {}", window);
    Ok(())
}

fn handle_configure_request(
    wm: &mut Wm,
    dpy: &dyn Display,
    window: Window,
    requested: Rect,
) -> Result<()> {
    // The caller's geometry is ignored entirely: every configure request is
    // answered with full-screen dimensions at the origin, zero border.
    debug!(
        "configure request for window {} asked for ({},{}) + ({},{}), assigning {}x{}",
        window,
        requested.x,
        requested.y,
        requested.width,
        requested.height,
        wm.screen_width,
        wm.screen_height
    );
    dpy.configure(
        window,
        Rect::new(0, 0, wm.screen_width, wm.screen_height),
        0,
    )?;
    dpy.flush()?;
    Ok(())
}

fn handle_unmap(
    wm: &mut Wm,
    window: Window,
    event_window: Window,
    synthetic: bool,
) -> Result<()> {
    // Only a client-initiated ICCCM withdraw removes the record: a synthetic
    // UnmapNotify reported against the root. Unmaps caused by our own window
    // operations are not synthetic and are ignored.
    if wm.clients.find(window).is_none() {
        return Ok(());
    }
    if synthetic && event_window == wm.root {
        info!("window {} withdrawn, removing from registry", window);
        wm.clients.remove(window);
        if wm.focused == Some(window) {
            wm.focused = None;
        }
    } else {
        debug!("ignoring incidental unmap of window {}", window);
    }
    Ok(())
}

fn handle_destroy(wm: &mut Wm, window: Window) -> Result<()> {
    match wm.clients.remove(window) {
        Some(_) => {
            info!("window {} destroyed, removed from registry", window);
            if wm.focused == Some(window) {
                wm.focused = None;
            }
        }
        // Unmanaged and override-redirect windows get destroyed too.
        None => debug!("destroy notify for unmanaged window {}", window),
    }
    Ok(())
}

fn handle_key_press(
    wm: &mut Wm,
    dpy: &dyn Display,
    interp: &mut dyn Interpreter,
    keycode: u8,
    mod_mask: u16,
) {
    let keysym = wm.keymap.keysym(keycode);
    debug!(
        "key press: keycode {}, keysym {:#x}, mod mask {:#x}",
        keycode, keysym, mod_mask
    );
    let Some(binding) = wm.bindings.lookup(mod_mask, keysym) else {
        return;
    };
    let callback = binding.callback.clone();
    // Callback failures are caught here; they never reach the scheduler.
    match interp.eval(wm, dpy, callback.source()) {
        Ok(outcome) => {
            if !outcome.output.is_empty() {
                debug!("key callback output: {}", outcome.output.trim_end());
            }
        }
        Err(e) => warn!("key callback `{}` failed: {}", callback.source(), e),
    }
}
