//! slate: a scriptable tiling window manager for X11
//!
//! A single-threaded, cooperatively scheduled window manager: one scheduler
//! rotates between draining protocol events, servicing the command socket,
//! and pointer-follow focus. Commands arriving on the socket (and key
//! bindings) are evaluated at the interpreter boundary and can inspect or
//! mutate the managed-window state while the scheduler keeps running.

pub mod config;
pub mod interp;
pub mod sched;
pub mod server;
pub mod wm;
pub mod x11;
