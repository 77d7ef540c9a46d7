//! Interpreter boundary
//!
//! Commands arriving over the command socket (and key-binding callbacks)
//! are evaluated here. The boundary is a trait so the core never sees
//! interpreter-specific values: clients cross it as opaque window-id tokens,
//! callbacks as [`CallbackRef`]s, and failures as [`EvalError`]; nothing
//! unwinds past an `eval` call.
//!
//! The built-in [`CommandLang`] evaluator implements a fixed command
//! vocabulary (it is deliberately not a general-purpose language): client
//! inspection and manipulation, screen queries, key binding, arrangement,
//! and the stop command.

use anyhow::Result;
use thiserror::Error;
use tracing::debug;

use crate::wm::client::Window;
use crate::wm::keyboard::{parse_keysym, parse_mod_mask};
use crate::wm::layout;
use crate::wm::Wm;
use crate::x11::Display;

/// An invocable reference stored in native structs (key bindings). Resolved
/// and run by the interpreter boundary at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRef(String);

impl CallbackRef {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn source(&self) -> &str {
        &self.0
    }
}

/// Result of a successful evaluation.
///
/// `value` is `Some` for value-producing commands; `output` collects text
/// the command emitted as a side effect. The two are framed differently on
/// the wire (see the command connection).
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub value: Option<String>,
    pub output: String,
}

impl Outcome {
    pub fn value(v: impl Into<String>) -> Self {
        Self {
            value: Some(v.into()),
            output: String::new(),
        }
    }

    pub fn unspecified() -> Self {
        Self::default()
    }
}

/// Evaluation failure, caught at the boundary and reported to the caller as
/// a diagnostic response rather than a crash.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("bad value `{0}`")]
    BadValue(String),
    #[error("no such client {0}")]
    NoSuchClient(u32),
    #[error("no clients")]
    NoClients,
    #[error("{0}")]
    Protocol(String),
}

/// The interpreter boundary. One evaluation consumes one complete command
/// string and may mutate the window manager state it is handed.
pub trait Interpreter {
    fn eval(&mut self, wm: &mut Wm, dpy: &dyn Display, source: &str)
    -> Result<Outcome, EvalError>;
}

/// Built-in command evaluator.
#[derive(Debug, Default)]
pub struct CommandLang;

impl CommandLang {
    pub fn new() -> Self {
        Self
    }
}

fn parse_window(spec: &str) -> Result<Window, EvalError> {
    spec.parse::<u32>()
        .map(Window)
        .map_err(|_| EvalError::BadValue(spec.to_string()))
}

fn parse_i16(spec: &str) -> Result<i16, EvalError> {
    spec.parse::<i16>()
        .map_err(|_| EvalError::BadValue(spec.to_string()))
}

fn parse_u16(spec: &str) -> Result<u16, EvalError> {
    spec.parse::<u16>()
        .map_err(|_| EvalError::BadValue(spec.to_string()))
}

fn protocol(e: anyhow::Error) -> EvalError {
    EvalError::Protocol(e.to_string())
}

/// Look up a managed client or fail the evaluation.
fn require_client<'a>(wm: &'a Wm, window: Window) -> Result<&'a crate::wm::client::Client, EvalError> {
    wm.clients.find(window).ok_or(EvalError::NoSuchClient(window.0))
}

impl Interpreter for CommandLang {
    fn eval(
        &mut self,
        wm: &mut Wm,
        dpy: &dyn Display,
        source: &str,
    ) -> Result<Outcome, EvalError> {
        let tokens: Vec<&str> = source.split_whitespace().collect();
        let (&verb, args) = tokens.split_first().ok_or(EvalError::Empty)?;
        debug!("evaluating command `{}`", verb);

        match verb {
            "stop" => {
                wm.stop = true;
                Ok(Outcome::value("true"))
            }

            "count-clients" => Ok(Outcome::value(wm.clients.len().to_string())),

            "all-clients" => {
                let ids: Vec<String> =
                    wm.clients.iter().map(|c| c.window.to_string()).collect();
                Ok(Outcome::value(ids.join(" ")))
            }

            "first-client" => {
                let client = wm.clients.first().ok_or(EvalError::NoClients)?;
                Ok(Outcome::value(client.window.to_string()))
            }

            "dump-client" => {
                let [spec] = args else {
                    return Err(EvalError::Usage("dump-client <window>"));
                };
                let client = require_client(wm, parse_window(spec)?)?;
                let mut out = Outcome::unspecified();
                out.output = format!(
                    "window: {}\nposition: ({}, {})\nsize: {} x {}\nborder width: {}\n",
                    client.window,
                    client.rect.x,
                    client.rect.y,
                    client.rect.width,
                    client.rect.height,
                    client.border_width
                );
                Ok(out)
            }

            "client-x" | "client-y" | "client-width" | "client-height" => {
                let [spec] = args else {
                    return Err(EvalError::Usage("client-<field> <window>"));
                };
                let client = require_client(wm, parse_window(spec)?)?;
                let value = match verb {
                    "client-x" => client.rect.x.to_string(),
                    "client-y" => client.rect.y.to_string(),
                    "client-width" => client.rect.width.to_string(),
                    _ => client.rect.height.to_string(),
                };
                Ok(Outcome::value(value))
            }

            "move-client" => {
                let [spec, x, y] = args else {
                    return Err(EvalError::Usage("move-client <window> <x> <y>"));
                };
                let window = parse_window(spec)?;
                let (x, y) = (parse_i16(x)?, parse_i16(y)?);
                let client = wm
                    .clients
                    .find_mut(window)
                    .ok_or(EvalError::NoSuchClient(window.0))?;
                client.rect.x = x;
                client.rect.y = y;
                let (rect, bw) = (client.rect, client.border_width);
                dpy.configure(window, rect, bw).map_err(protocol)?;
                dpy.flush().map_err(protocol)?;
                Ok(Outcome::unspecified())
            }

            "resize-client" => {
                let [spec, w, h] = args else {
                    return Err(EvalError::Usage("resize-client <window> <width> <height>"));
                };
                let window = parse_window(spec)?;
                let (w, h) = (parse_u16(w)?, parse_u16(h)?);
                let client = wm
                    .clients
                    .find_mut(window)
                    .ok_or(EvalError::NoSuchClient(window.0))?;
                client.rect.width = w;
                client.rect.height = h;
                let (rect, bw) = (client.rect, client.border_width);
                dpy.configure(window, rect, bw).map_err(protocol)?;
                dpy.flush().map_err(protocol)?;
                Ok(Outcome::unspecified())
            }

            "map-client" => {
                let [spec] = args else {
                    return Err(EvalError::Usage("map-client <window>"));
                };
                let window = require_client(wm, parse_window(spec)?)?.window;
                dpy.map(window).map_err(protocol)?;
                // The map request is only submitted once the connection is
                // flushed.
                dpy.flush().map_err(protocol)?;
                Ok(Outcome::unspecified())
            }

            "close-client" => {
                let [spec] = args else {
                    return Err(EvalError::Usage("close-client <window>"));
                };
                let window = require_client(wm, parse_window(spec)?)?.window;
                dpy.close_window(window).map_err(protocol)?;
                Ok(Outcome::unspecified())
            }

            "screen-width" => Ok(Outcome::value(wm.screen_width.to_string())),
            "screen-height" => Ok(Outcome::value(wm.screen_height.to_string())),

            "arrange" => {
                layout::arrange(wm, dpy).map_err(protocol)?;
                Ok(Outcome::unspecified())
            }

            "bind-key" => {
                let (mods, key, rest) = match args {
                    [mods, key, rest @ ..] if !rest.is_empty() => (mods, key, rest),
                    _ => {
                        return Err(EvalError::Usage(
                            "bind-key <modifiers> <key> <command...>",
                        ));
                    }
                };
                let mod_mask =
                    parse_mod_mask(mods).ok_or_else(|| EvalError::BadValue(mods.to_string()))?;
                let keysym =
                    parse_keysym(key).ok_or_else(|| EvalError::BadValue(key.to_string()))?;
                let callback = CallbackRef::new(rest.join(" "));
                wm.bind_key(dpy, mod_mask, keysym, callback)
                    .map_err(protocol)?;
                Ok(Outcome::unspecified())
            }

            _ => Err(EvalError::UnknownCommand(verb.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::client::Rect;
    use crate::wm::keyboard::Keymap;
    use crate::x11::testing::{Call, RecordingDisplay};

    fn test_wm() -> Wm {
        let keymap = Keymap::new(8, 1, vec![';' as u32, 't' as u32]);
        Wm::new(Window(1), 1920, 1080, keymap)
    }

    #[test]
    fn count_and_screen_queries() {
        let mut wm = test_wm();
        let dpy = RecordingDisplay::new(1920, 1080);
        let mut lang = CommandLang::new();

        assert_eq!(
            lang.eval(&mut wm, &dpy, "count-clients").unwrap(),
            Outcome::value("0")
        );
        wm.clients.add(Window(42));
        assert_eq!(
            lang.eval(&mut wm, &dpy, "count-clients").unwrap(),
            Outcome::value("1")
        );
        assert_eq!(
            lang.eval(&mut wm, &dpy, "screen-width").unwrap(),
            Outcome::value("1920")
        );
        assert_eq!(
            lang.eval(&mut wm, &dpy, "screen-height").unwrap(),
            Outcome::value("1080")
        );
    }

    #[test]
    fn stop_sets_the_flag() {
        let mut wm = test_wm();
        let dpy = RecordingDisplay::new(1920, 1080);
        let mut lang = CommandLang::new();
        assert!(!wm.stop);
        lang.eval(&mut wm, &dpy, "stop").unwrap();
        assert!(wm.stop);
    }

    #[test]
    fn unknown_and_empty_commands_fail() {
        let mut wm = test_wm();
        let dpy = RecordingDisplay::new(1920, 1080);
        let mut lang = CommandLang::new();
        assert!(matches!(
            lang.eval(&mut wm, &dpy, "frobnicate"),
            Err(EvalError::UnknownCommand(_))
        ));
        assert!(matches!(
            lang.eval(&mut wm, &dpy, "   "),
            Err(EvalError::Empty)
        ));
    }

    #[test]
    fn move_client_updates_and_configures() {
        let mut wm = test_wm();
        let dpy = RecordingDisplay::new(1920, 1080);
        let mut lang = CommandLang::new();
        let client = wm.clients.add(Window(42)).unwrap();
        client.rect = Rect::new(0, 0, 400, 300);

        lang.eval(&mut wm, &dpy, "move-client 42 15 25").unwrap();

        assert_eq!(wm.clients.find(Window(42)).unwrap().rect.x, 15);
        assert_eq!(
            dpy.calls(),
            vec![Call::Configure(Window(42), Rect::new(15, 25, 400, 300), 0)]
        );
    }

    #[test]
    fn missing_client_is_an_eval_error() {
        let mut wm = test_wm();
        let dpy = RecordingDisplay::new(1920, 1080);
        let mut lang = CommandLang::new();
        assert!(matches!(
            lang.eval(&mut wm, &dpy, "move-client 99 0 0"),
            Err(EvalError::NoSuchClient(99))
        ));
        assert!(dpy.calls().is_empty());
    }

    #[test]
    fn dump_client_writes_to_output_not_value() {
        let mut wm = test_wm();
        let dpy = RecordingDisplay::new(1920, 1080);
        let mut lang = CommandLang::new();
        let client = wm.clients.add(Window(42)).unwrap();
        client.rect = Rect::new(1, 2, 30, 40);
        client.border_width = 5;

        let out = lang.eval(&mut wm, &dpy, "dump-client 42").unwrap();
        assert_eq!(out.value, None);
        assert_eq!(
            out.output,
            "window: 42\nposition: (1, 2)\nsize: 30 x 40\nborder width: 5\n"
        );
    }

    #[test]
    fn all_clients_lists_ids_in_rank_order() {
        let mut wm = test_wm();
        let dpy = RecordingDisplay::new(1920, 1080);
        let mut lang = CommandLang::new();
        wm.clients.add(Window(3));
        wm.clients.add(Window(1));
        assert_eq!(
            lang.eval(&mut wm, &dpy, "all-clients").unwrap(),
            Outcome::value("3 1")
        );
        assert_eq!(
            lang.eval(&mut wm, &dpy, "first-client").unwrap(),
            Outcome::value("3")
        );
    }

    #[test]
    fn bind_key_registers_binding_and_grabs() {
        let mut wm = test_wm();
        let dpy = RecordingDisplay::new(1920, 1080);
        let mut lang = CommandLang::new();

        lang.eval(&mut wm, &dpy, "bind-key mod4 semicolon stop")
            .unwrap();

        assert_eq!(wm.bindings.len(), 1);
        // keycode 8 maps to `;` in the test keymap
        assert_eq!(dpy.calls(), vec![Call::GrabKey(1 << 6, 8)]);
        let binding = wm.bindings.lookup(1 << 6, ';' as u32).unwrap();
        assert_eq!(binding.callback.source(), "stop");
    }

    #[test]
    fn close_client_negotiates_through_display() {
        let mut wm = test_wm();
        let dpy = RecordingDisplay::new(1920, 1080);
        let mut lang = CommandLang::new();
        wm.clients.add(Window(42));

        lang.eval(&mut wm, &dpy, "close-client 42").unwrap();
        assert_eq!(dpy.calls(), vec![Call::Close(Window(42))]);
    }
}
