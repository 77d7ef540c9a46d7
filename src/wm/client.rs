//! Client registry
//!
//! Ordered collection of managed top-level windows. Insertion order is
//! significant: it defines the master/stack tiling rank, with the most
//! recently adopted window at the end.

use std::fmt;

/// An X11 window id. Handed out across the interpreter boundary as an
/// opaque token; never a reference into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window(pub u32);

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Window geometry, in the X11 coordinate types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub fn new(x: i16, y: i16, width: u16, height: u16) -> Self {
        Self { x, y, width, height }
    }
}

/// A managed top-level window.
#[derive(Debug, Clone)]
pub struct Client {
    pub window: Window,
    pub rect: Rect,
    pub border_width: u16,
}

impl Client {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            rect: Rect::default(),
            border_width: 0,
        }
    }
}

/// Registry of managed windows, at most one record per window id.
///
/// Single-threaded; mutated only from scheduler task invocations. Callers
/// that trigger interpreter callbacks while scanning must defer structural
/// changes to the end of the pass rather than mutate mid-iteration.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<Client>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a managed window.
    pub fn find(&self, window: Window) -> Option<&Client> {
        self.clients.iter().find(|c| c.window == window)
    }

    pub fn find_mut(&mut self, window: Window) -> Option<&mut Client> {
        self.clients.iter_mut().find(|c| c.window == window)
    }

    /// Adopt a window. Returns `None` if the window is already managed;
    /// callers are expected to `find` first.
    pub fn add(&mut self, window: Window) -> Option<&mut Client> {
        if self.find(window).is_some() {
            return None;
        }
        self.clients.push(Client::new(window));
        self.clients.last_mut()
    }

    /// Drop a window's record, returning it if present.
    pub fn remove(&mut self, window: Window) -> Option<Client> {
        let idx = self.clients.iter().position(|c| c.window == window)?;
        Some(self.clients.remove(idx))
    }

    /// All managed windows in insertion (tiling rank) order.
    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Client> {
        self.clients.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// First window in rank order, if any.
    pub fn first(&self) -> Option<&Client> {
        self.clients.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_find() {
        let mut reg = ClientRegistry::new();
        assert!(reg.add(Window(7)).is_some());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.find(Window(7)).unwrap().window, Window(7));
        assert!(reg.find(Window(8)).is_none());
    }

    #[test]
    fn duplicate_add_is_rejected() {
        let mut reg = ClientRegistry::new();
        assert!(reg.add(Window(7)).is_some());
        assert!(reg.add(Window(7)).is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_preserves_order() {
        let mut reg = ClientRegistry::new();
        for id in [1u32, 2, 3, 4] {
            reg.add(Window(id));
        }
        assert!(reg.remove(Window(2)).is_some());
        let order: Vec<u32> = reg.iter().map(|c| c.window.0).collect();
        assert_eq!(order, vec![1, 3, 4]);
    }

    #[test]
    fn remove_unknown_is_none() {
        let mut reg = ClientRegistry::new();
        reg.add(Window(1));
        assert!(reg.remove(Window(99)).is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn insertion_order_is_rank_order() {
        let mut reg = ClientRegistry::new();
        for id in [30u32, 10, 20] {
            reg.add(Window(id));
        }
        let order: Vec<u32> = reg.iter().map(|c| c.window.0).collect();
        assert_eq!(order, vec![30, 10, 20]);
    }
}
