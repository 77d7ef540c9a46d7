//! Keyboard module
//!
//! Keycode/keysym resolution from the server's current mapping, plus the
//! key binding table. A binding pairs an exact (modifier mask, keysym) match
//! with an opaque callback reference that the interpreter boundary resolves
//! and runs on dispatch.

use anyhow::Result;
use tracing::debug;

use crate::interp::CallbackRef;
use crate::x11::Display;

/// Snapshot of the server's keycode-to-keysym mapping.
///
/// A keyboard remap after startup is observed as a MappingChanged event but
/// not applied; existing grabs keep their original keycodes.
#[derive(Debug, Clone)]
pub struct Keymap {
    min_keycode: u8,
    keysyms_per_keycode: u8,
    keysyms: Vec<u32>,
}

impl Keymap {
    pub fn new(min_keycode: u8, keysyms_per_keycode: u8, keysyms: Vec<u32>) -> Self {
        Self {
            min_keycode,
            keysyms_per_keycode,
            keysyms,
        }
    }

    /// The unshifted (column zero) keysym for a physical key.
    pub fn keysym(&self, keycode: u8) -> u32 {
        if keycode < self.min_keycode || self.keysyms_per_keycode == 0 {
            return 0;
        }
        let idx = usize::from(keycode - self.min_keycode) * usize::from(self.keysyms_per_keycode);
        self.keysyms.get(idx).copied().unwrap_or(0)
    }

    /// Every physical key currently producing `keysym` in any column.
    pub fn keycodes(&self, keysym: u32) -> Vec<u8> {
        let per = usize::from(self.keysyms_per_keycode);
        if per == 0 {
            return Vec::new();
        }
        self.keysyms
            .chunks(per)
            .enumerate()
            .filter(|(_, syms)| syms.contains(&keysym))
            .map(|(i, _)| self.min_keycode + i as u8)
            .collect()
    }
}

/// One key binding.
#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub mod_mask: u16,
    pub keysym: u32,
    pub callback: CallbackRef,
}

/// Ordered table of key bindings; first structural match wins. Bindings are
/// never removed in normal operation.
#[derive(Debug, Default)]
pub struct BindingTable {
    bindings: Vec<KeyBinding>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grab every keycode mapped to `keysym` and append the binding.
    pub fn bind(
        &mut self,
        dpy: &dyn Display,
        keymap: &Keymap,
        mod_mask: u16,
        keysym: u32,
        callback: CallbackRef,
    ) -> Result<()> {
        let keycodes = keymap.keycodes(keysym);
        debug!(
            "binding keysym {:#x} mod mask {:#x} to `{}` ({} keycodes)",
            keysym,
            mod_mask,
            callback.source(),
            keycodes.len()
        );
        for keycode in keycodes {
            dpy.grab_key(mod_mask, keycode)?;
        }
        dpy.flush()?;
        self.bindings.push(KeyBinding {
            mod_mask,
            keysym,
            callback,
        });
        Ok(())
    }

    /// Linear scan, first exact (mod mask, keysym) match.
    pub fn lookup(&self, mod_mask: u16, keysym: u32) -> Option<&KeyBinding> {
        self.bindings
            .iter()
            .find(|b| b.mod_mask == mod_mask && b.keysym == keysym)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Parse a modifier spec such as `mod4`, `mod1|shift`, or a raw number.
pub fn parse_mod_mask(spec: &str) -> Option<u16> {
    if let Ok(n) = spec.parse::<u16>() {
        return Some(n);
    }
    let mut mask = 0u16;
    for part in spec.split(['|', '+']) {
        mask |= match part.to_ascii_lowercase().as_str() {
            "shift" => 1 << 0,
            "lock" => 1 << 1,
            "control" | "ctrl" => 1 << 2,
            "mod1" | "alt" => 1 << 3,
            "mod2" => 1 << 4,
            "mod3" => 1 << 5,
            "mod4" | "super" => 1 << 6,
            "mod5" => 1 << 7,
            "none" => 0,
            _ => return None,
        };
    }
    Some(mask)
}

/// Parse a keysym spec: a single printable character (Latin-1 keysyms equal
/// their codepoint), a well-known key name, or a number.
pub fn parse_keysym(spec: &str) -> Option<u32> {
    let mut chars = spec.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if (' '..='~').contains(&c) {
            return Some(c as u32);
        }
    }
    match spec {
        "space" => Some(0x20),
        "semicolon" => Some(';' as u32),
        "Return" => Some(0xff0d),
        "Escape" => Some(0xff1b),
        "Tab" => Some(0xff09),
        "BackSpace" => Some(0xff08),
        _ => {
            if let Some(hex) = spec.strip_prefix("0x") {
                u32::from_str_radix(hex, 16).ok()
            } else {
                spec.parse::<u32>().ok()
            }
        }
    }
}
