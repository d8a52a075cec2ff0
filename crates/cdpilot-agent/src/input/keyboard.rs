//! Keyboard events via `Input.dispatchKeyEvent`.

use rand::Rng;
use serde_json::{json, Value};
use tracing::debug;

use super::keys::{parse_keys, KeyDef, KeyPress, KeySegment};
use super::pause;
use crate::cdp::Transport;
use crate::config::InputConfig;
use crate::Result;

pub struct Keyboard<'a> {
    transport: &'a dyn Transport,
    config: &'a InputConfig,
}

impl<'a> Keyboard<'a> {
    pub fn new(transport: &'a dyn Transport, config: &'a InputConfig) -> Self {
        Self { transport, config }
    }

    /// Type a mini-language string into the focused element, then settle.
    pub async fn type_text(&self, input: &str) -> Result<()> {
        for segment in parse_keys(input) {
            match segment {
                KeySegment::Text(text) => {
                    for ch in text.chars() {
                        if ch == '\n' {
                            self.press(&enter()).await?;
                        } else {
                            self.type_char(ch).await?;
                        }
                        pause(self.keystroke_delay()).await;
                    }
                }
                KeySegment::Key(press) => self.press(&press).await?,
            }
        }
        pause(self.config.typing_settle_ms).await;
        Ok(())
    }

    /// Dispatch a full special-key press, bracketed by its modifiers.
    pub async fn press(&self, press: &KeyPress) -> Result<()> {
        let mut held = 0;
        for m in &press.modifiers {
            held |= m.bit();
            self.dispatch(key_event("rawKeyDown", &m.def(), held)).await?;
        }

        let mask = press.modifier_mask();
        let key = &press.key;
        self.dispatch(key_event("rawKeyDown", key, mask)).await?;
        // Ctrl/Alt/Meta combos never produce text
        if let Some(text) = key.text.filter(|_| mask & !8 == 0) {
            let mut ev = key_event("char", key, mask);
            ev["text"] = json!(text);
            ev["unmodifiedText"] = json!(text);
            self.dispatch(ev).await?;
        }
        self.dispatch(key_event("keyUp", key, mask)).await?;

        for m in press.modifiers.iter().rev() {
            held &= !m.bit();
            self.dispatch(key_event("keyUp", &m.def(), held)).await?;
        }
        debug!(key = key.key, modifiers = mask, "key press");
        Ok(())
    }

    /// One printable character: keyDown carrying the text, then keyUp.
    async fn type_char(&self, ch: char) -> Result<()> {
        let text = ch.to_string();
        self.dispatch(json!({
            "type": "keyDown",
            "key": text,
            "text": text,
            "unmodifiedText": text,
        }))
        .await?;
        self.dispatch(json!({ "type": "keyUp", "key": text })).await
    }

    async fn dispatch(&self, params: Value) -> Result<()> {
        self.transport.call("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }

    fn keystroke_delay(&self) -> u64 {
        let (min, max) = (
            self.config.keystroke_delay_min_ms,
            self.config.keystroke_delay_max_ms,
        );
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

fn enter() -> KeyPress {
    // "Enter" is always in the special-key table
    KeyPress::parse("Enter").unwrap_or(KeyPress {
        key: KeyDef {
            key: "Enter",
            code: "Enter",
            key_code: 13,
            text: Some("\r"),
        },
        modifiers: Vec::new(),
    })
}

fn key_event(kind: &str, key: &KeyDef, modifiers: u32) -> Value {
    json!({
        "type": kind,
        "key": key.key,
        "code": key.code,
        "windowsVirtualKeyCode": key.key_code,
        "nativeVirtualKeyCode": key.key_code,
        "modifiers": modifiers,
    })
}
