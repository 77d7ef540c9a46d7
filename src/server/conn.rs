//! Command connection
//!
//! One accepted client on the command socket: a non-blocking stream with
//! bounded input/output buffers. All bytes accumulated so far are evaluated
//! as a single command after any successful read (there is no line or
//! length framing on input), and the read buffer is reset after each
//! evaluation cycle.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;

use tracing::{debug, warn};

use crate::interp::{EvalError, Interpreter, Outcome};
use crate::wm::Wm;
use crate::x11::Display;

/// Fixed capacity of each buffer.
pub const BUF_SIZE: usize = 4096;

/// Append-only byte buffer with fixed capacity.
#[derive(Debug)]
pub struct IoBuffer {
    data: Box<[u8; BUF_SIZE]>,
    len: usize,
}

impl IoBuffer {
    pub fn new() -> Self {
        Self {
            data: Box::new([0; BUF_SIZE]),
            len: 0,
        }
    }

    pub fn available(&self) -> usize {
        BUF_SIZE - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Append, refusing rather than truncating when the remaining capacity
    /// is too small.
    pub fn push(&mut self, src: &[u8]) -> bool {
        if self.available() < src.len() {
            return false;
        }
        self.data[self.len..self.len + src.len()].copy_from_slice(src);
        self.len += src.len();
        true
    }

    fn unfilled(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    fn advance(&mut self, n: usize) {
        self.len += n;
    }

    /// Drop `n` consumed bytes from the front (partial flush).
    fn consume(&mut self, n: usize) {
        self.data.copy_within(n..self.len, 0);
        self.len -= n;
    }
}

impl Default for IoBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one non-blocking read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Peer closed the connection.
    Closed,
    /// Nothing to read right now.
    WouldBlock,
    /// The read buffer is at capacity, either before the read or because
    /// the read filled it. The accumulated input cannot be one complete
    /// command, so no evaluation happens; the caller must deal with the
    /// connection.
    Saturated,
    /// Bytes were appended to the read buffer.
    Data(usize),
}

pub struct CommandConnection {
    stream: UnixStream,
    read_buf: IoBuffer,
    write_buf: IoBuffer,
}

impl CommandConnection {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            read_buf: IoBuffer::new(),
            write_buf: IoBuffer::new(),
        }
    }

    pub fn stream(&self) -> &UnixStream {
        &self.stream
    }

    pub fn has_pending_output(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Fill the remaining read-buffer capacity from the socket.
    pub fn read_step(&mut self) -> io::Result<ReadOutcome> {
        if self.read_buf.available() == 0 {
            debug!("read buffer full, not reading");
            return Ok(ReadOutcome::Saturated);
        }
        match self.stream.read(self.read_buf.unfilled()) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => {
                self.read_buf.advance(n);
                debug!("{} bytes read, {} available", n, self.read_buf.available());
                if self.read_buf.available() == 0 {
                    // The command is at least as large as the buffer, which
                    // is the unit of evaluation. Report rather than
                    // evaluating a truncated prefix.
                    return Ok(ReadOutcome::Saturated);
                }
                Ok(ReadOutcome::Data(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }

    /// Evaluate the entire accumulated input as one command, queue the
    /// response, and reset the read buffer.
    pub fn evaluate(&mut self, wm: &mut Wm, dpy: &dyn Display, interp: &mut dyn Interpreter) {
        let source = String::from_utf8_lossy(self.read_buf.as_bytes()).into_owned();
        let result = interp.eval(wm, dpy, &source);
        self.read_buf.reset();
        self.respond(result);
    }

    /// Queue the diagnostic for a saturated read buffer.
    pub fn report_saturation(&mut self) {
        self.respond(Err(EvalError::Protocol("error: command too large".into())));
    }

    /// Serialize an evaluation result into the write buffer.
    ///
    /// Framing is a compatibility quirk, kept deliberately: a command with
    /// no value yields its captured output terminated by a zero byte; a
    /// value (or a caught error, reported as its text) yields the text, a
    /// newline, and the zero byte.
    fn respond(&mut self, result: Result<Outcome, EvalError>) {
        let (value, output) = match result {
            Ok(outcome) => (outcome.value, outcome.output),
            Err(e) => {
                debug!("evaluation failed: {}", e);
                (Some(e.to_string()), String::new())
            }
        };
        let mut frame = Vec::with_capacity(output.len() + 64);
        frame.extend_from_slice(output.as_bytes());
        if let Some(value) = value {
            frame.extend_from_slice(value.as_bytes());
            frame.push(b'\n');
        }
        frame.push(b'\0');
        // All or nothing: a partial frame would leave the peer waiting for
        // a terminator that never arrives.
        if !self.write_buf.push(&frame) {
            warn!("write buffer full, response dropped");
        }
    }

    /// Flush as much buffered output as the socket accepts.
    pub fn write_step(&mut self) -> io::Result<usize> {
        if self.write_buf.is_empty() {
            return Ok(0);
        }
        match self.stream.write(self.write_buf.as_bytes()) {
            Ok(n) => {
                self.write_buf.consume(n);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }
}
