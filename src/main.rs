//! slate: a scriptable tiling window manager for X11

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slate::config::{Config, Paths};
use slate::interp::{CommandLang, Interpreter};
use slate::sched::{Scheduler, Task};
use slate::server::CommandServer;
use slate::wm::{events, Wm};
use slate::x11::{Display, XDisplay};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "slate=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting slate");

    let trace_flag = std::env::args().any(|arg| arg == "--trace" || arg == "-t");

    // Config directory problems degrade: no command socket, no rc script.
    let paths = match Paths::discover() {
        Ok(paths) => Some(paths),
        Err(e) => {
            warn!("configuration directory unavailable: {:#}", e);
            None
        }
    };
    let config = match &paths {
        Some(paths) => Config::load(paths).unwrap_or_else(|e| {
            warn!("failed to load configuration: {:#}", e);
            Config::default()
        }),
        None => Config::default(),
    };

    let dpy = XDisplay::open()?;
    // Fatal if another window manager holds the substructure redirect.
    dpy.become_wm()?;
    info!("registered as window manager");

    let keymap = dpy.keymap().context("failed to load keymap")?;
    let (screen_width, screen_height) = dpy.screen_size();
    let mut wm = Wm::new(dpy.root(), screen_width, screen_height, keymap);
    wm.trace = trace_flag || config.trace_events;

    // Adopt windows that predate us.
    let scanned = dpy.scan().context("initial window scan failed")?;
    info!("initial scan found {} windows", scanned.len());
    wm.adopt_scanned(scanned);

    let mut interp = CommandLang::new();

    if let Some(paths) = &paths {
        run_rc_script(&mut wm, &dpy, &mut interp, paths);
    }

    // Socket bind/listen failure at startup is fatal; a missing config
    // directory just means no server.
    let mut server = match &paths {
        Some(paths) => Some(CommandServer::bind(&paths.socket)?),
        None => None,
    };

    let mut sched = Scheduler::new(
        vec![Task::Server, Task::Events, Task::PointerFocus],
        Duration::from_millis(config.time_slice_ms),
    );

    info!("entering scheduler loop");
    loop {
        if wm.stop {
            info!("stop requested, shutting down");
            break;
        }
        let elapsed = sched.run_iteration(|task| match task {
            Task::Server => {
                if let Some(server) = server.as_mut() {
                    if let Err(e) = server.step(&mut wm, &dpy, &mut interp) {
                        warn!("command server step failed: {}", e);
                    }
                }
            }
            Task::Events => pump_events(&mut wm, &dpy, &mut interp),
            Task::PointerFocus => {
                if config.focus_follows_pointer {
                    if let Err(e) = wm.focus_pointer_window(&dpy) {
                        warn!("pointer focus check failed: {}", e);
                    }
                }
            }
        });
        std::thread::sleep(sched.idle_time(elapsed));
    }

    info!("slate exiting");
    Ok(())
}

/// Drain every pending protocol event through the dispatcher. A dead X
/// connection stops the scheduler.
fn pump_events(wm: &mut Wm, dpy: &XDisplay, interp: &mut dyn Interpreter) {
    loop {
        match dpy.poll_event(wm.trace) {
            Ok(Some(event)) => {
                if let Err(e) = events::dispatch(wm, dpy, interp, event) {
                    warn!("event dispatch failed: {}", e);
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("lost X connection: {}", e);
                wm.stop = true;
                break;
            }
        }
    }
    if let Err(e) = dpy.flush() {
        warn!("flush failed: {}", e);
    }
}

/// Evaluate the startup script, one command per line. Blank lines and `#`
/// comments are skipped; failures are logged, not fatal.
fn run_rc_script(wm: &mut Wm, dpy: &XDisplay, interp: &mut dyn Interpreter, paths: &Paths) {
    if !paths.rc.exists() {
        return;
    }
    let content = match std::fs::read_to_string(&paths.rc) {
        Ok(content) => content,
        Err(e) => {
            warn!("failed to read {}: {}", paths.rc.display(), e);
            return;
        }
    };
    info!("running startup script {}", paths.rc.display());
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Err(e) = interp.eval(wm, dpy, line) {
            warn!("rc command `{}` failed: {}", line, e);
        }
    }
}
