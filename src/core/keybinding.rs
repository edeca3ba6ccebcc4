//! Keybinding resolution
//!
//! Resolves physical key presses to command identifiers so a session can
//! keep keys bound to host commands away from the shell.

use std::collections::{BTreeMap, HashMap};

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use thiserror::Error;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeybindingError {
    #[error("Empty key chord")]
    Empty,
    #[error("Unknown key `{0}` in chord `{1}`")]
    UnknownKey(String, String),
}

/// A key plus modifiers, with letters folded to lower case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyChord {
    pub code: KeyCode,
    pub mods: Modifiers,
}

impl KeyChord {
    pub fn new(code: KeyCode, mods: Modifiers) -> Self {
        let code = match code {
            KeyCode::Char(ch) => KeyCode::Char(ch.to_ascii_lowercase()),
            KeyCode::BackTab => KeyCode::Tab,
            other => other,
        };
        Self { code, mods }
    }

    /// Parse chords like `ctrl+shift+t`, `alt+f4` or `pageup`
    pub fn parse(chord: &str) -> Result<Self, KeybindingError> {
        let mut mods = Modifiers::empty();
        let mut key = None;

        for part in chord.split('+').map(str::trim).filter(|p| !p.is_empty()) {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => mods |= Modifiers::CTRL,
                "shift" => mods |= Modifiers::SHIFT,
                "alt" | "meta" => mods |= Modifiers::ALT,
                name => {
                    let code = parse_key(name)
                        .ok_or_else(|| KeybindingError::UnknownKey(part.to_string(), chord.to_string()))?;
                    key = Some(code);
                }
            }
        }

        key.map(|code| Self::new(code, mods)).ok_or(KeybindingError::Empty)
    }

    pub fn is_tab(&self) -> bool {
        self.code == KeyCode::Tab
    }
}

impl From<&KeyEvent> for KeyChord {
    fn from(event: &KeyEvent) -> Self {
        let code = if event.code == KeyCode::BackTab {
            KeyCode::Tab
        } else {
            event.code
        };
        let mut mods = Modifiers::from(event.modifiers);
        if event.code == KeyCode::BackTab {
            mods |= Modifiers::SHIFT;
        }
        Self::new(code, mods)
    }
}

fn parse_key(name: &str) -> Option<KeyCode> {
    let code = match name {
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "esc" | "escape" => KeyCode::Esc,
        "backspace" => KeyCode::Backspace,
        "delete" | "del" => KeyCode::Delete,
        "insert" | "ins" => KeyCode::Insert,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "pageup" => KeyCode::PageUp,
        "pagedown" => KeyCode::PageDown,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        "space" => KeyCode::Char(' '),
        "plus" => KeyCode::Char('+'),
        _ => {
            let mut chars = name.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => KeyCode::Char(ch),
                (Some('f'), Some(_)) => KeyCode::F(name[1..].parse().ok()?),
                _ => return None,
            }
        }
    };
    Some(code)
}

/// Resolves key chords to command identifiers
pub trait KeybindingResolver {
    fn resolve(&self, chord: &KeyChord) -> Option<String>;
}

/// Keybindings loaded from configuration
#[derive(Debug, Default, Clone)]
pub struct KeybindingTable {
    bindings: HashMap<KeyChord, String>,
}

impl KeybindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `chord -> command` pairs; unparsable chords are reported
    /// and skipped
    pub fn from_config(bindings: &BTreeMap<String, String>) -> (Self, Vec<KeybindingError>) {
        let mut table = Self::new();
        let mut errors = Vec::new();
        for (chord, command) in bindings {
            match KeyChord::parse(chord) {
                Ok(chord) => table.bind(chord, command.clone()),
                Err(e) => errors.push(e),
            }
        }
        (table, errors)
    }

    pub fn bind(&mut self, chord: KeyChord, command: impl Into<String>) {
        self.bindings.insert(chord, command.into());
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl KeybindingResolver for KeybindingTable {
    fn resolve(&self, chord: &KeyChord) -> Option<String> {
        self.bindings.get(chord).cloned()
    }
}
