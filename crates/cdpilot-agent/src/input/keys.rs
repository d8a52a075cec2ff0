//! Key mini-language: literal text with `{Enter}`, `{Tab}`, `{Ctrl+a}` tokens.
//!
//! Unknown or unterminated tokens are kept as literal text.

/// Physical description of a key for `Input.dispatchKeyEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDef {
    pub key: &'static str,
    pub code: &'static str,
    pub key_code: u32,
    /// Text produced by the key, if any.
    pub text: Option<&'static str>,
}

const SPECIAL_KEYS: &[(&str, KeyDef)] = &[
    ("enter", KeyDef { key: "Enter", code: "Enter", key_code: 13, text: Some("\r") }),
    ("tab", KeyDef { key: "Tab", code: "Tab", key_code: 9, text: None }),
    ("backspace", KeyDef { key: "Backspace", code: "Backspace", key_code: 8, text: None }),
    ("delete", KeyDef { key: "Delete", code: "Delete", key_code: 46, text: None }),
    ("escape", KeyDef { key: "Escape", code: "Escape", key_code: 27, text: None }),
    ("esc", KeyDef { key: "Escape", code: "Escape", key_code: 27, text: None }),
    ("space", KeyDef { key: " ", code: "Space", key_code: 32, text: Some(" ") }),
    ("arrowup", KeyDef { key: "ArrowUp", code: "ArrowUp", key_code: 38, text: None }),
    ("arrowdown", KeyDef { key: "ArrowDown", code: "ArrowDown", key_code: 40, text: None }),
    ("arrowleft", KeyDef { key: "ArrowLeft", code: "ArrowLeft", key_code: 37, text: None }),
    ("arrowright", KeyDef { key: "ArrowRight", code: "ArrowRight", key_code: 39, text: None }),
    ("home", KeyDef { key: "Home", code: "Home", key_code: 36, text: None }),
    ("end", KeyDef { key: "End", code: "End", key_code: 35, text: None }),
    ("pageup", KeyDef { key: "PageUp", code: "PageUp", key_code: 33, text: None }),
    ("pagedown", KeyDef { key: "PageDown", code: "PageDown", key_code: 34, text: None }),
];

const LETTER_CODES: [&str; 26] = [
    "KeyA", "KeyB", "KeyC", "KeyD", "KeyE", "KeyF", "KeyG", "KeyH", "KeyI", "KeyJ", "KeyK",
    "KeyL", "KeyM", "KeyN", "KeyO", "KeyP", "KeyQ", "KeyR", "KeyS", "KeyT", "KeyU", "KeyV",
    "KeyW", "KeyX", "KeyY", "KeyZ",
];
const LOWER: [&str; 26] = [
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q", "r",
    "s", "t", "u", "v", "w", "x", "y", "z",
];
const UPPER: [&str; 26] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R",
    "S", "T", "U", "V", "W", "X", "Y", "Z",
];

/// Modifier keys, with their CDP bitmask values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Alt,
    Ctrl,
    Meta,
    Shift,
}

impl Modifier {
    pub fn bit(self) -> u32 {
        match self {
            Modifier::Alt => 1,
            Modifier::Ctrl => 2,
            Modifier::Meta => 4,
            Modifier::Shift => 8,
        }
    }

    pub fn def(self) -> KeyDef {
        match self {
            Modifier::Alt => KeyDef { key: "Alt", code: "AltLeft", key_code: 18, text: None },
            Modifier::Ctrl => KeyDef { key: "Control", code: "ControlLeft", key_code: 17, text: None },
            Modifier::Meta => KeyDef { key: "Meta", code: "MetaLeft", key_code: 91, text: None },
            Modifier::Shift => KeyDef { key: "Shift", code: "ShiftLeft", key_code: 16, text: None },
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ctrl" | "control" => Some(Modifier::Ctrl),
            "alt" | "option" => Some(Modifier::Alt),
            "shift" => Some(Modifier::Shift),
            "meta" | "cmd" | "command" => Some(Modifier::Meta),
            _ => None,
        }
    }
}

/// A special key press, possibly with held modifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    pub key: KeyDef,
    pub modifiers: Vec<Modifier>,
}

impl KeyPress {
    /// Combined CDP modifier bitmask.
    pub fn modifier_mask(&self) -> u32 {
        self.modifiers.iter().fold(0, |mask, m| mask | m.bit())
    }

    /// Parse the inside of a `{...}` token, e.g. `Enter` or `Ctrl+a`.
    pub fn parse(token: &str) -> Option<Self> {
        let parts: Vec<&str> = token.split('+').map(str::trim).collect();
        let (name, mods) = parts.split_last()?;
        let modifiers = mods
            .iter()
            .map(|m| Modifier::parse(m))
            .collect::<Option<Vec<_>>>()?;

        if let Some(key) = special_key(name) {
            return Some(Self { key, modifiers });
        }
        // Bare letters are plain text; only combos name a letter key
        if modifiers.is_empty() {
            return None;
        }
        let shift = modifiers.contains(&Modifier::Shift);
        letter_key(name, shift).map(|key| Self { key, modifiers })
    }
}

fn special_key(name: &str) -> Option<KeyDef> {
    let name = name.to_ascii_lowercase();
    SPECIAL_KEYS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, def)| *def)
}

fn letter_key(name: &str, shift: bool) -> Option<KeyDef> {
    let mut chars = name.chars();
    let c = chars.next()?.to_ascii_lowercase();
    if chars.next().is_some() || !c.is_ascii_lowercase() {
        return None;
    }
    let i = (c as u8 - b'a') as usize;
    let key = if shift { UPPER[i] } else { LOWER[i] };
    Some(KeyDef {
        key,
        code: LETTER_CODES[i],
        key_code: 65 + i as u32,
        text: Some(key),
    })
}

/// One piece of a typing sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySegment {
    /// Typed character by character.
    Text(String),
    /// Dispatched as a full key press.
    Key(KeyPress),
}

/// Split input into literal text and special-key segments.
pub fn parse_keys(input: &str) -> Vec<KeySegment> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = input;

    while let Some(open) = rest.find('{') {
        text.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            text.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let token = &after[..close];
        match KeyPress::parse(token) {
            Some(press) => {
                if !text.is_empty() {
                    segments.push(KeySegment::Text(std::mem::take(&mut text)));
                }
                segments.push(KeySegment::Key(press));
            }
            None => {
                text.push('{');
                text.push_str(token);
                text.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    text.push_str(rest);
    if !text.is_empty() {
        segments.push(KeySegment::Text(text));
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> KeySegment {
        KeySegment::Key(KeyPress::parse(name).unwrap())
    }

    #[test]
    fn test_text_then_enter() {
        let segs = parse_keys("go{Enter}");
        assert_eq!(segs, vec![KeySegment::Text("go".into()), key("Enter")]);
        if let KeySegment::Key(k) = &segs[1] {
            assert_eq!(k.key.key, "Enter");
            assert_eq!(k.key.text, Some("\r"));
            assert_eq!(k.modifier_mask(), 0);
        }
    }

    #[test]
    fn test_names_are_case_insensitive() {
        assert_eq!(parse_keys("{tab}{ARROWDOWN}"), vec![key("Tab"), key("ArrowDown")]);
    }

    #[test]
    fn test_ctrl_combo() {
        let segs = parse_keys("{Ctrl+a}{Backspace}hello");
        assert_eq!(segs.len(), 3);
        let KeySegment::Key(combo) = &segs[0] else {
            panic!("expected key, got {:?}", segs[0]);
        };
        assert_eq!(combo.modifiers, vec![Modifier::Ctrl]);
        assert_eq!(combo.modifier_mask(), 2);
        assert_eq!(combo.key.code, "KeyA");
        assert_eq!(combo.key.key_code, 65);
        assert_eq!(segs[2], KeySegment::Text("hello".into()));
    }

    #[test]
    fn test_control_alias_and_shift() {
        let press = KeyPress::parse("Control+Shift+z").unwrap();
        assert_eq!(press.modifier_mask(), 2 | 8);
        assert_eq!(press.key.key, "Z");
        assert_eq!(press.key.key_code, 90);
    }

    #[test]
    fn test_shift_letter_carries_text() {
        let press = KeyPress::parse("Shift+a").unwrap();
        assert_eq!(press.modifier_mask(), 8);
        assert_eq!(press.key.key, "A");
        assert_eq!(press.key.text, Some("A"));
    }

    #[test]
    fn test_unknown_token_is_literal() {
        assert_eq!(
            parse_keys("a {Banana} b {x}"),
            vec![KeySegment::Text("a {Banana} b {x}".into())]
        );
    }

    #[test]
    fn test_unterminated_brace_is_literal() {
        assert_eq!(
            parse_keys("x{Enter"),
            vec![KeySegment::Text("x{Enter".into())]
        );
    }

    #[test]
    fn test_unknown_modifier_rejected() {
        assert!(KeyPress::parse("Hyper+a").is_none());
        assert!(KeyPress::parse("Ctrl+ab").is_none());
    }

    #[test]
    fn test_text_between_keys() {
        assert_eq!(
            parse_keys("user{Tab}secret{Enter}"),
            vec![
                KeySegment::Text("user".into()),
                key("Tab"),
                KeySegment::Text("secret".into()),
                key("Enter"),
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_keys("").is_empty());
    }
}
