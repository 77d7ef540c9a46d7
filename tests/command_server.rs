//! End-to-end exercise of the command socket: a client connects, sends a
//! command, half-closes, and reads the framed reply while the server is
//! stepped the way the scheduler would step it.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use anyhow::Result;

use slate::interp::CommandLang;
use slate::server::CommandServer;
use slate::wm::Wm;
use slate::wm::client::{Rect, Window};
use slate::wm::keyboard::Keymap;
use slate::x11::{Display, WindowAttrs};

/// Display stand-in that accepts every request and answers with fixed
/// geometry. The server path never inspects the replies beyond success.
struct FakeDisplay {
    root: Window,
    screen: (u16, u16),
}

impl FakeDisplay {
    fn new() -> Self {
        Self {
            root: Window(1),
            screen: (1920, 1080),
        }
    }
}

impl Display for FakeDisplay {
    fn root(&self) -> Window {
        self.root
    }

    fn screen_size(&self) -> (u16, u16) {
        self.screen
    }

    fn configure(&self, _window: Window, _rect: Rect, _border_width: u16) -> Result<()> {
        Ok(())
    }

    fn map(&self, _window: Window) -> Result<()> {
        Ok(())
    }

    fn window_attributes(&self, _window: Window) -> Result<WindowAttrs> {
        Ok(WindowAttrs {
            override_redirect: false,
            viewable: true,
        })
    }

    fn query_geometry(&self, _window: Window) -> Result<(Rect, u16)> {
        Ok((Rect::new(0, 0, 640, 480), 1))
    }

    fn grab_key(&self, _mod_mask: u16, _keycode: u8) -> Result<()> {
        Ok(())
    }

    fn set_input_focus(&self, _window: Window) -> Result<()> {
        Ok(())
    }

    fn pointer_window(&self) -> Result<Option<Window>> {
        Ok(None)
    }

    fn close_window(&self, _window: Window) -> Result<()> {
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

fn socket_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("slate-itest-{}-{}.sock", tag, std::process::id()))
}

fn test_wm() -> Wm {
    Wm::new(Window(1), 1920, 1080, Keymap::new(8, 1, vec![0; 248]))
}

/// Step the server until the client sees the NUL terminator or the pass
/// budget runs out.
fn read_reply(
    server: &mut CommandServer,
    wm: &mut Wm,
    dpy: &FakeDisplay,
    interp: &mut CommandLang,
    client: &mut UnixStream,
) -> Vec<u8> {
    client
        .set_read_timeout(Some(std::time::Duration::from_millis(10)))
        .unwrap();
    let mut reply = Vec::new();
    let mut chunk = [0u8; 256];
    for _ in 0..100 {
        server.step(wm, dpy, interp).unwrap();
        match client.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                reply.extend_from_slice(&chunk[..n]);
                if reply.contains(&0) {
                    break;
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => panic!("client read failed: {}", e),
        }
    }
    reply
}

#[test]
fn valued_command_round_trip() {
    let path = socket_path("valued");
    let mut server = CommandServer::bind(&path).unwrap();
    let mut wm = test_wm();
    wm.clients.add(Window(10));
    wm.clients.add(Window(11));
    let dpy = FakeDisplay::new();
    let mut interp = CommandLang::new();

    let mut client = UnixStream::connect(&path).unwrap();
    client.write_all(b"count-clients").unwrap();
    client.shutdown(std::net::Shutdown::Write).unwrap();

    let reply = read_reply(&mut server, &mut wm, &dpy, &mut interp, &mut client);
    assert_eq!(reply, b"2\n\0");
}

#[test]
fn output_only_command_round_trip() {
    let path = socket_path("output");
    let mut server = CommandServer::bind(&path).unwrap();
    let mut wm = test_wm();
    let win = Window(42);
    wm.clients.add(win);
    if let Some(client) = wm.clients.find_mut(win) {
        client.rect = Rect::new(5, 6, 700, 500);
        client.border_width = 2;
    }
    let dpy = FakeDisplay::new();
    let mut interp = CommandLang::new();

    let mut client = UnixStream::connect(&path).unwrap();
    client.write_all(b"dump-client 42").unwrap();
    client.shutdown(std::net::Shutdown::Write).unwrap();

    let reply = read_reply(&mut server, &mut wm, &dpy, &mut interp, &mut client);
    let text = String::from_utf8_lossy(&reply);
    assert!(text.contains("window: 42"), "reply was: {:?}", text);
    assert!(text.contains("position: (5, 6)"), "reply was: {:?}", text);
    assert!(text.contains("size: 700 x 500"), "reply was: {:?}", text);
    // Output-only replies are terminated by NUL without a value line.
    assert_eq!(reply.last(), Some(&0));
}

#[test]
fn unknown_command_reports_an_error() {
    let path = socket_path("unknown");
    let mut server = CommandServer::bind(&path).unwrap();
    let mut wm = test_wm();
    let dpy = FakeDisplay::new();
    let mut interp = CommandLang::new();

    let mut client = UnixStream::connect(&path).unwrap();
    client.write_all(b"no-such-command").unwrap();
    client.shutdown(std::net::Shutdown::Write).unwrap();

    let reply = read_reply(&mut server, &mut wm, &dpy, &mut interp, &mut client);
    let text = String::from_utf8_lossy(&reply);
    assert!(text.contains("no-such-command"), "reply was: {:?}", text);
    assert_eq!(reply.last(), Some(&0));
}

#[test]
fn commands_mutate_the_client_registry() {
    let path = socket_path("mutate");
    let mut server = CommandServer::bind(&path).unwrap();
    let mut wm = test_wm();
    wm.clients.add(Window(30));
    let dpy = FakeDisplay::new();
    let mut interp = CommandLang::new();

    let mut client = UnixStream::connect(&path).unwrap();
    client.write_all(b"move-client 30 100 200").unwrap();
    client.shutdown(std::net::Shutdown::Write).unwrap();

    let reply = read_reply(&mut server, &mut wm, &dpy, &mut interp, &mut client);
    assert_eq!(reply.last(), Some(&0));

    let moved = wm.clients.find(Window(30)).unwrap();
    assert_eq!((moved.rect.x, moved.rect.y), (100, 200));
}
