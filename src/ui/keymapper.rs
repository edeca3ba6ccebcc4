//! Key mapping for shell input
//!
//! Translates key presses the session forwarded into the text a VT-style
//! shell expects on its input.

use crossterm::event::{KeyCode, KeyEvent};

use crate::core::keybinding::Modifiers;

/// Key mapper for converting key events to shell input
pub struct KeyMapper;

impl KeyMapper {
    /// Map a key press to input text.
    ///
    /// `application_cursor` selects `ESC O` arrows (DECCKM set by the shell).
    pub fn map(event: &KeyEvent, application_cursor: bool) -> Option<String> {
        let mods = Modifiers::from(event.modifiers);

        let text = match event.code {
            KeyCode::Char(ch) => Self::map_char(ch, mods),
            KeyCode::Enter => "\r".to_string(),
            KeyCode::Backspace if mods.contains(Modifiers::ALT) => "\x1b\x7f".to_string(),
            KeyCode::Backspace => "\x7f".to_string(),
            KeyCode::BackTab => "\x1b[Z".to_string(),
            KeyCode::Tab if mods.contains(Modifiers::SHIFT) => "\x1b[Z".to_string(),
            KeyCode::Tab => "\t".to_string(),
            KeyCode::Esc => "\x1b".to_string(),

            KeyCode::Up => Self::cursor_key('A', mods, application_cursor),
            KeyCode::Down => Self::cursor_key('B', mods, application_cursor),
            KeyCode::Right => Self::cursor_key('C', mods, application_cursor),
            KeyCode::Left => Self::cursor_key('D', mods, application_cursor),
            KeyCode::Home => Self::cursor_key('H', mods, false),
            KeyCode::End => Self::cursor_key('F', mods, false),

            KeyCode::Insert => Self::tilde_key(2, mods),
            KeyCode::Delete => Self::tilde_key(3, mods),
            KeyCode::PageUp => Self::tilde_key(5, mods),
            KeyCode::PageDown => Self::tilde_key(6, mods),
            KeyCode::F(n) => Self::function_key(n, mods)?,

            _ => return None,
        };
        Some(text)
    }

    fn map_char(ch: char, mods: Modifiers) -> String {
        let ctrl = mods.contains(Modifiers::CTRL);
        let alt = mods.contains(Modifiers::ALT);

        if ctrl {
            if let Some(code) = Self::control_code(ch) {
                let mut out = String::new();
                if alt {
                    out.push('\x1b');
                }
                out.push(code);
                return out;
            }
        }
        if alt {
            return format!("\x1b{}", ch);
        }
        ch.to_string()
    }

    /// Ctrl+key as a C0 control character
    fn control_code(ch: char) -> Option<char> {
        let code = match ch {
            'a'..='z' => ch as u8 - b'a' + 1,
            'A'..='Z' => ch as u8 - b'A' + 1,
            '@' | '`' | ' ' | '2' => 0x00,
            '[' | '3' => 0x1b,
            '\\' | '4' => 0x1c,
            ']' | '5' => 0x1d,
            '^' | '~' | '6' => 0x1e,
            '_' | '?' | '7' => 0x1f,
            _ => return None,
        };
        Some(code as char)
    }

    fn cursor_key(key: char, mods: Modifiers, application: bool) -> String {
        if !mods.is_empty() {
            format!("\x1b[1;{}{}", Self::modifier_param(mods), key)
        } else if application {
            format!("\x1bO{}", key)
        } else {
            format!("\x1b[{}", key)
        }
    }

    fn tilde_key(code: u8, mods: Modifiers) -> String {
        if mods.is_empty() {
            format!("\x1b[{}~", code)
        } else {
            format!("\x1b[{};{}~", code, Self::modifier_param(mods))
        }
    }

    fn function_key(n: u8, mods: Modifiers) -> Option<String> {
        // F1-F4 are SS3 keys, the rest tilde keys with irregular codes
        let tilde = match n {
            1..=4 => {
                let key = (b'P' + n - 1) as char;
                return Some(if mods.is_empty() {
                    format!("\x1bO{}", key)
                } else {
                    format!("\x1b[1;{}{}", Self::modifier_param(mods), key)
                });
            }
            5 => 15,
            6..=10 => n + 11,
            11 | 12 => n + 12,
            _ => return None,
        };
        Some(Self::tilde_key(tilde, mods))
    }

    /// xterm modifier parameter
    fn modifier_param(mods: Modifiers) -> u8 {
        let mut param = 1;
        if mods.contains(Modifiers::SHIFT) {
            param += 1;
        }
        if mods.contains(Modifiers::ALT) {
            param += 2;
        }
        if mods.contains(Modifiers::CTRL) {
            param += 4;
        }
        param
    }
}
