//! Terminal surface collaborator
//!
//! The surface renders shell output and captures user input. Sessions drive
//! it through the `Surface` trait and receive its input as `SurfaceEvent`s;
//! escape sequences are the surface's business, never the session's.

use serde::{Deserialize, Serialize};

/// Pixel box a surface is laid out in
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Container {
    pub width: f64,
    pub height: f64,
    /// Horizontal padding not available to text
    pub padding_left: f64,
}

impl Container {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            padding_left: 0.0,
        }
    }
}

/// Size of one character cell in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FontMetrics {
    pub char_width: f64,
    pub char_height: f64,
}

impl FontMetrics {
    /// Whether both dimensions are usable for layout
    pub fn is_known(&self) -> bool {
        self.char_width > 0.0 && self.char_height > 0.0
    }
}

/// Input and focus events raised by a surface. Raw key presses go through
/// `Session::handle_key` first.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    /// Text the user typed or pasted
    Data(String),
    Focus,
    Blur,
    MouseUp,
    KeyUp,
}

/// A terminal emulation surface
pub trait Surface {
    fn open(&mut self, container: &Container);
    fn write(&mut self, text: &str);
    fn resize(&mut self, cols: u16, rows: u16);
    fn size(&self) -> (u16, u16);
    fn focus(&mut self);
    fn has_focus(&self) -> bool;
    fn destroy(&mut self);

    fn cursor_blink(&self) -> bool;
    fn set_cursor_blink(&mut self, blink: bool);
    fn scrollback(&self) -> usize;
    fn set_scrollback(&mut self, lines: usize);
    /// Repaint rows `start..=end`
    fn refresh(&mut self, start: u16, end: u16);

    /// Scroll the viewport by whole lines (negative is up)
    fn scroll_lines(&mut self, amount: i32);
    /// Scroll the viewport by pages (negative is up)
    fn scroll_pages(&mut self, amount: i32);
    fn scroll_to_top(&mut self);
    fn scroll_to_bottom(&mut self);
    /// Re-sync scroll bookkeeping with the viewport after a resize
    fn sync_scroll(&mut self);
    fn clear(&mut self);

    /// Toggle the presentational "active" state
    fn set_active(&mut self, active: bool);

    fn has_selection(&self) -> bool;
    fn selection_text(&self) -> Option<String>;
    fn clear_selection(&mut self);
}

/// System clipboard access
pub trait Clipboard {
    fn get_text(&mut self) -> Option<String>;
    fn set_text(&mut self, text: &str) -> bool;
}
