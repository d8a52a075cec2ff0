//! Pointer events via `Input.dispatchMouseEvent`.

use rand::Rng;
use serde_json::json;
use tracing::debug;

use super::pause;
use crate::cdp::Transport;
use crate::config::InputConfig;
use crate::Result;

/// Press/release click count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickCount {
    Single = 1,
    Double = 2,
    Triple = 3,
}

pub struct Mouse<'a> {
    transport: &'a dyn Transport,
    config: &'a InputConfig,
}

impl<'a> Mouse<'a> {
    pub fn new(transport: &'a dyn Transport, config: &'a InputConfig) -> Self {
        Self { transport, config }
    }

    /// Single `mouseMoved` to `(x, y)`.
    pub async fn move_to(&self, x: f64, y: f64) -> Result<()> {
        self.transport
            .call(
                "Input.dispatchMouseEvent",
                json!({ "type": "mouseMoved", "x": x, "y": y, "button": "none" }),
            )
            .await?;
        Ok(())
    }

    /// Move to a random point near the target, then onto it, pausing after each.
    pub async fn approach(&self, x: f64, y: f64) -> Result<()> {
        let (ox, oy) = approach_point(x, y, self.config.approach_offset_px);
        self.move_to(ox, oy).await?;
        pause(self.config.pointer_pause_ms).await;
        self.move_to(x, y).await?;
        pause(self.config.pointer_pause_ms).await;
        Ok(())
    }

    /// Left-button press then release with the given click count.
    pub async fn press_release(&self, x: f64, y: f64, count: ClickCount) -> Result<()> {
        let count = count as u8;
        for kind in ["mousePressed", "mouseReleased"] {
            self.transport
                .call(
                    "Input.dispatchMouseEvent",
                    json!({
                        "type": kind,
                        "x": x,
                        "y": y,
                        "button": "left",
                        "buttons": if kind == "mousePressed" { 1 } else { 0 },
                        "clickCount": count,
                    }),
                )
                .await?;
        }
        debug!(x, y, count, "pointer click");
        Ok(())
    }

    /// Approach then click.
    pub async fn click(&self, x: f64, y: f64, count: ClickCount) -> Result<()> {
        self.approach(x, y).await?;
        self.press_release(x, y, count).await
    }
}

/// Intermediate point for the approach vector, never exactly on the target.
fn approach_point(x: f64, y: f64, max_offset: f64) -> (f64, f64) {
    if max_offset <= 0.0 {
        return (x, y);
    }
    let mut rng = rand::thread_rng();
    let min = (max_offset / 4.0).max(1.0).min(max_offset);
    let dx = rng.gen_range(min..=max_offset) * if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    let dy = rng.gen_range(min..=max_offset) * if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    ((x + dx).max(0.0), (y + dy).max(0.0))
}
