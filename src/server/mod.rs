//! Command server
//!
//! Accepts command connections on a unix stream socket and services every
//! open connection each scheduler pass. Readiness is multiplexed with a
//! single zero-timeout poll over the listener and all connections, so a
//! step never blocks. Connections that close or fail are removed after the
//! pass completes, never while scanning the set.

pub mod conn;

use std::fs;
use std::os::fd::AsFd;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, info, warn};

use crate::interp::Interpreter;
use crate::server::conn::{CommandConnection, ReadOutcome};
use crate::wm::Wm;
use crate::x11::Display;

pub struct CommandServer {
    listener: UnixListener,
    socket_path: PathBuf,
    conns: Vec<CommandConnection>,
}

impl CommandServer {
    /// Bind and listen on `path`, replacing any stale socket file. Bind or
    /// listen failure at startup is fatal to the caller.
    pub fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            // Stale socket from a previous run.
            let _ = fs::remove_file(path);
        }
        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to bind command socket at {}", path.display()))?;
        listener
            .set_nonblocking(true)
            .context("failed to make command socket non-blocking")?;
        info!("command server listening on {}", path.display());
        Ok(Self {
            listener,
            socket_path: path.to_path_buf(),
            conns: Vec::new(),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    /// One non-blocking pass: accept pending connections, then read,
    /// evaluate, and flush every ready connection.
    pub fn step(
        &mut self,
        wm: &mut Wm,
        dpy: &dyn Display,
        interp: &mut dyn Interpreter,
    ) -> Result<()> {
        let mut listener_ready = false;
        // (readable, writable) per connection, indexed before any accept.
        let mut ready = vec![(false, false); self.conns.len()];
        {
            let mut fds = Vec::with_capacity(1 + self.conns.len());
            fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
            for conn in &self.conns {
                fds.push(PollFd::new(
                    conn.stream().as_fd(),
                    PollFlags::POLLIN | PollFlags::POLLOUT,
                ));
            }
            match poll(&mut fds, PollTimeout::ZERO) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    let readable =
                        PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
                    let revents =
                        |fd: &PollFd<'_>| fd.revents().unwrap_or(PollFlags::empty());
                    listener_ready = revents(&fds[0]).intersects(readable);
                    for (i, fd) in fds[1..].iter().enumerate() {
                        let r = revents(fd);
                        ready[i] = (r.intersects(readable), r.contains(PollFlags::POLLOUT));
                    }
                }
                // Interrupted: try again next pass.
                Err(Errno::EINTR) => return Ok(()),
                Err(e) => return Err(e).context("poll failed"),
            }
        }

        if listener_ready {
            self.accept_step();
        }

        let mut closed = vec![false; ready.len()];
        for (i, &(readable, writable)) in ready.iter().enumerate() {
            let conn = &mut self.conns[i];
            if readable {
                match conn.read_step() {
                    Ok(ReadOutcome::Closed) => {
                        debug!("peer closed command connection");
                        closed[i] = true;
                        continue;
                    }
                    Ok(ReadOutcome::Data(_)) => {
                        conn.evaluate(wm, dpy, interp);
                        if let Err(e) = conn.write_step() {
                            warn!("command connection write failed: {}", e);
                            closed[i] = true;
                            continue;
                        }
                    }
                    Ok(ReadOutcome::Saturated) => {
                        // Signalled once, then the connection is dropped:
                        // its input can never form a complete evaluation.
                        warn!("command connection saturated its read buffer, closing");
                        conn.report_saturation();
                        let _ = conn.write_step();
                        closed[i] = true;
                        continue;
                    }
                    Ok(ReadOutcome::WouldBlock) => {}
                    Err(e) => {
                        warn!("command connection read failed: {}", e);
                        closed[i] = true;
                        continue;
                    }
                }
            }
            if writable && conn.has_pending_output() {
                if let Err(e) = conn.write_step() {
                    warn!("command connection write failed: {}", e);
                    closed[i] = true;
                }
            }
        }

        // Deferred removal, after the scan.
        if closed.iter().any(|&c| c) {
            let mut i = 0;
            self.conns.retain(|_| {
                let keep = i >= closed.len() || !closed[i];
                i += 1;
                keep
            });
        }
        Ok(())
    }

    fn accept_step(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("failed to make accepted connection non-blocking: {}", e);
                        continue;
                    }
                    info!("accepted command connection");
                    self.conns.push(CommandConnection::new(stream));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            }
        }
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.socket_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::CommandLang;
    use crate::wm::client::Window;
    use crate::wm::keyboard::Keymap;
    use crate::x11::testing::RecordingDisplay;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    fn test_wm() -> Wm {
        Wm::new(Window(1), 1920, 1080, Keymap::new(8, 1, vec![0; 248]))
    }

    fn socket_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("slate-test-{}-{}.sock", tag, std::process::id()))
    }

    #[test]
    fn accepts_and_answers_a_command() {
        let path = socket_path("roundtrip");
        let mut server = CommandServer::bind(&path).unwrap();
        let mut wm = test_wm();
        wm.clients.add(Window(7));
        let dpy = RecordingDisplay::new(1920, 1080);
        let mut interp = CommandLang::new();

        let mut client = UnixStream::connect(&path).unwrap();
        client.write_all(b"count-clients").unwrap();

        // A few passes: accept, then read + evaluate + flush.
        for _ in 0..10 {
            server.step(&mut wm, &dpy, &mut interp).unwrap();
        }
        assert_eq!(server.connection_count(), 1);

        let mut reply = [0u8; 3];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"1\n\0");
    }

    #[test]
    fn oversized_command_is_answered_with_a_diagnostic_and_closed() {
        let path = socket_path("saturate");
        let mut server = CommandServer::bind(&path).unwrap();
        let mut wm = test_wm();
        let dpy = RecordingDisplay::new(1920, 1080);
        let mut interp = CommandLang::new();

        let mut client = UnixStream::connect(&path).unwrap();
        client
            .write_all(&vec![b'x'; conn::BUF_SIZE + 100])
            .unwrap();

        for _ in 0..10 {
            server.step(&mut wm, &dpy, &mut interp).unwrap();
        }
        // Never evaluated as a truncated command, and the connection is
        // gone after the diagnostic.
        assert_eq!(server.connection_count(), 0);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, b"error: command too large\n\0");
    }

    #[test]
    fn closed_connections_are_removed_after_the_pass() {
        let path = socket_path("close");
        let mut server = CommandServer::bind(&path).unwrap();
        let mut wm = test_wm();
        let dpy = RecordingDisplay::new(1920, 1080);
        let mut interp = CommandLang::new();

        let client = UnixStream::connect(&path).unwrap();
        for _ in 0..10 {
            server.step(&mut wm, &dpy, &mut interp).unwrap();
        }
        assert_eq!(server.connection_count(), 1);

        drop(client);
        for _ in 0..10 {
            server.step(&mut wm, &dpy, &mut interp).unwrap();
        }
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn socket_file_is_removed_on_drop() {
        let path = socket_path("drop");
        let server = CommandServer::bind(&path).unwrap();
        assert!(path.exists());
        drop(server);
        assert!(!path.exists());
    }

    #[test]
    fn stale_socket_file_is_replaced() {
        let path = socket_path("stale");
        drop(CommandServer::bind(&path).unwrap());
        // Simulate a leftover file.
        std::fs::write(&path, b"").unwrap();
        let server = CommandServer::bind(&path).unwrap();
        assert_eq!(server.connection_count(), 0);
    }
}
