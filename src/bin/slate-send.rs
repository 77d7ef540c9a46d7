//! Send a single command to a running slate instance and print the reply.
//!
//! The command comes from the argument list (joined with spaces) or, when no
//! arguments are given, from stdin. The reply is everything the server sends
//! up to the NUL terminator.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

use anyhow::{Context, Result, bail};

use slate::config::Paths;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = if args.is_empty() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading command from stdin")?;
        buf.trim_end().to_string()
    } else {
        args.join(" ")
    };
    if command.is_empty() {
        bail!("no command given");
    }

    let paths = Paths::discover().context("locating the slate directory")?;
    let mut stream = UnixStream::connect(&paths.socket)
        .with_context(|| format!("connecting to {}", paths.socket.display()))?;

    stream
        .write_all(command.as_bytes())
        .context("sending command")?;
    stream
        .shutdown(std::net::Shutdown::Write)
        .context("closing the write side")?;

    let mut reply = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).context("reading reply")?;
        if n == 0 {
            break;
        }
        reply.extend_from_slice(&chunk[..n]);
        if reply.contains(&0) {
            break;
        }
    }
    if let Some(end) = reply.iter().position(|&b| b == 0) {
        reply.truncate(end);
    }

    let text = String::from_utf8_lossy(&reply);
    print!("{}", text);
    if !text.ends_with('\n') && !text.is_empty() {
        println!();
    }
    Ok(())
}
