//! Arrangement engine
//!
//! Master/stack tiling: windows with rank below the master count share the
//! left half of the screen, the rest stack in the right half. The geometry
//! computation is pure; [`arrange`] applies it by pushing one configure per
//! window through the display.

use anyhow::Result;
use tracing::debug;

use crate::wm::Wm;
use crate::wm::client::Rect;
use crate::x11::Display;

/// Number of master slots. Fixed at one.
pub const MASTER_COUNT: usize = 1;

/// Compute the rectangle for each tiling rank, in rank order.
///
/// With a single window the right half stays unused: the sole master gets
/// the left half only, not the full screen.
pub fn compute(count: usize, screen_width: u16, screen_height: u16) -> Vec<Rect> {
    if count == 0 {
        return Vec::new();
    }

    let half_width = screen_width / 2;
    let masters = count.min(MASTER_COUNT);
    let stacked = count - masters;

    let mut rects = Vec::with_capacity(count);
    let master_height = screen_height / masters as u16;
    for i in 0..masters {
        rects.push(Rect::new(
            0,
            (i as u16 * master_height) as i16,
            half_width,
            master_height,
        ));
    }
    if stacked > 0 {
        let stack_height = screen_height / stacked as u16;
        for i in 0..stacked {
            rects.push(Rect::new(
                half_width as i16,
                (i as u16 * stack_height) as i16,
                half_width,
                stack_height,
            ));
        }
    }
    rects
}

/// Recompute every managed window's geometry and push the updates. Border
/// width is forced to zero while tiling. Idempotent for an unchanged
/// registry.
pub fn arrange(wm: &mut Wm, dpy: &dyn Display) -> Result<()> {
    debug!("arranging {} windows", wm.clients.len());
    let rects = compute(wm.clients.len(), wm.screen_width, wm.screen_height);
    for (client, rect) in wm.clients.iter_mut().zip(rects) {
        client.rect = rect;
        client.border_width = 0;
        dpy.configure(client.window, client.rect, client.border_width)?;
    }
    dpy.flush()?;
    Ok(())
}
