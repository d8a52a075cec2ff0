//! Input sequencer - ordered low-level pointer and keyboard commands.
//!
//! Every sub-command is awaited before the next is issued. Sequences are
//! never pipelined and never retried.

pub mod keyboard;
pub mod keys;
pub mod mouse;

pub use keyboard::Keyboard;
pub use mouse::{ClickCount, Mouse};

use std::time::Duration;

pub(crate) async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
