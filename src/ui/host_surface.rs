//! Host console surface
//!
//! Presents a session directly on the console ptyhost runs in. Shell output
//! is passed through untouched, so the host terminal does the emulation.
//! Only the active session writes to the screen; the tail of every session's
//! output is kept so switching back can repaint.
//!
//! The alternate screen has no scrollback of its own, so each surface also
//! keeps its output as plain-text lines and draws them when scrolled back.
//! Selection stays with the host terminal and is never reported.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::rc::Rc;

use crossterm::{
    cursor::{MoveTo, SetCursorStyle},
    queue,
    terminal::{Clear, ClearType},
};
use tracing::{debug, warn};

use crate::core::surface::{Container, Surface};

/// Output kept for repainting an inactive session
const REPLAY_LIMIT: usize = 64 * 1024;

/// Scrollback lines until the session applies its configuration
const DEFAULT_SCROLLBACK: usize = 1000;

/// State the event loop shares with a surface after it is handed to a session
#[derive(Debug, Clone, Default)]
pub struct SurfaceHandle {
    focused: Rc<Cell<bool>>,
    application_cursor: Rc<Cell<bool>>,
}

impl SurfaceHandle {
    pub fn set_focused(&self, focused: bool) {
        self.focused.set(focused);
    }

    /// Whether the shell switched cursor keys to application mode
    pub fn application_cursor(&self) -> bool {
        self.application_cursor.get()
    }
}

/// Surface writing to the host console
pub struct HostSurface<W: Write> {
    out: W,
    handle: SurfaceHandle,
    size: (u16, u16),
    active: bool,
    destroyed: bool,
    cursor_blink: bool,
    replay: String,
    lines: LineLog,
    /// Lines scrolled back from the bottom; 0 follows live output
    scroll_offset: usize,
}

impl HostSurface<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> HostSurface<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            handle: SurfaceHandle::default(),
            size: (0, 0),
            active: false,
            destroyed: false,
            cursor_blink: false,
            replay: String::new(),
            lines: LineLog::new(DEFAULT_SCROLLBACK),
            scroll_offset: 0,
        }
    }

    pub fn handle(&self) -> SurfaceHandle {
        self.handle.clone()
    }

    #[cfg(test)]
    fn output(&self) -> &W {
        &self.out
    }

    fn emit(&mut self, f: impl FnOnce(&mut W) -> io::Result<()>) {
        if !self.active || self.destroyed {
            return;
        }
        if let Err(e) = f(&mut self.out).and_then(|_| self.out.flush()) {
            warn!("Console write failed: {}", e);
        }
    }

    fn remember(&mut self, text: &str) {
        self.replay.push_str(text);
        if self.replay.len() > REPLAY_LIMIT {
            let mut cut = self.replay.len() - REPLAY_LIMIT;
            while !self.replay.is_char_boundary(cut) {
                cut += 1;
            }
            self.replay.drain(..cut);
        }
    }

    /// Track DECCKM so the key mapper can pick the right arrow sequences
    fn track_modes(&self, text: &str) {
        let set = text.rfind("\x1b[?1h");
        let reset = text.rfind("\x1b[?1l");
        match (set, reset) {
            (Some(s), Some(r)) => self.handle.application_cursor.set(s > r),
            (Some(_), None) => self.handle.application_cursor.set(true),
            (None, Some(_)) => self.handle.application_cursor.set(false),
            (None, None) => {}
        }
    }

    fn repaint(&mut self) {
        if self.scroll_offset > 0 {
            self.draw_history();
            return;
        }
        let replay = self.replay.clone();
        let blink = self.cursor_blink;
        self.emit(|out| {
            queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;
            queue!(out, cursor_style(blink))?;
            out.write_all(replay.as_bytes())
        });
    }

    fn draw_history(&mut self) {
        let (cols, rows) = self.size;
        let window: Vec<String> = self
            .lines
            .window(self.scroll_offset, usize::from(rows))
            .map(|line| line.chars().take(usize::from(cols)).collect())
            .collect();
        self.emit(|out| {
            queue!(out, Clear(ClearType::All))?;
            for (row, line) in window.iter().enumerate() {
                queue!(out, MoveTo(0, row as u16))?;
                out.write_all(line.as_bytes())?;
            }
            Ok(())
        });
    }

    fn max_offset(&self) -> usize {
        self.lines.len().saturating_sub(usize::from(self.size.1))
    }

    fn scroll_to(&mut self, offset: usize) {
        let offset = offset.min(self.max_offset());
        if offset == self.scroll_offset {
            return;
        }
        self.scroll_offset = offset;
        // Back at the bottom the live screen comes from the replay tail
        self.repaint();
    }

    /// Scroll by `delta` lines, positive towards the bottom
    fn scroll_by(&mut self, delta: i64) {
        let target = (self.scroll_offset as i64).saturating_sub(delta).max(0);
        self.scroll_to(usize::try_from(target).unwrap_or(usize::MAX));
    }
}

fn cursor_style(blink: bool) -> SetCursorStyle {
    if blink {
        SetCursorStyle::BlinkingBlock
    } else {
        SetCursorStyle::SteadyBlock
    }
}

impl<W: Write> Surface for HostSurface<W> {
    fn open(&mut self, container: &Container) {
        debug!("Host surface opened at {}x{}", container.width, container.height);
        self.repaint();
    }

    fn write(&mut self, text: &str) {
        if self.destroyed {
            return;
        }
        self.track_modes(text);
        self.remember(text);
        self.lines.push(text);
        // Scrolled back: the replay tail brings it on screen at the bottom
        if self.scroll_offset == 0 {
            self.emit(|out| out.write_all(text.as_bytes()));
        }
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.size = (cols, rows);
    }

    fn size(&self) -> (u16, u16) {
        self.size
    }

    fn focus(&mut self) {
        self.handle.focused.set(true);
    }

    fn has_focus(&self) -> bool {
        self.handle.focused.get()
    }

    fn destroy(&mut self) {
        self.destroyed = true;
        self.replay.clear();
        self.lines.clear();
        self.handle.focused.set(false);
    }

    fn cursor_blink(&self) -> bool {
        self.cursor_blink
    }

    fn set_cursor_blink(&mut self, blink: bool) {
        self.cursor_blink = blink;
        self.emit(|out| queue!(out, cursor_style(blink)));
    }

    fn scrollback(&self) -> usize {
        self.lines.limit()
    }

    fn set_scrollback(&mut self, lines: usize) {
        self.lines.set_limit(lines);
        self.sync_scroll();
    }

    fn refresh(&mut self, start: u16, end: u16) {
        if self.scroll_offset > 0 {
            self.draw_history();
        } else {
            debug!("Refresh rows {}..={}", start, end);
        }
    }

    fn scroll_lines(&mut self, amount: i32) {
        self.scroll_by(i64::from(amount));
    }

    fn scroll_pages(&mut self, amount: i32) {
        let page = i64::from(self.size.1.max(1));
        self.scroll_by(i64::from(amount) * page);
    }

    fn scroll_to_top(&mut self) {
        self.scroll_to(usize::MAX);
    }

    fn scroll_to_bottom(&mut self) {
        self.scroll_to(0);
    }

    fn sync_scroll(&mut self) {
        if self.scroll_offset > self.max_offset() {
            self.scroll_to(self.max_offset());
        }
    }

    fn clear(&mut self) {
        self.replay.clear();
        self.lines.clear();
        self.scroll_offset = 0;
        self.emit(|out| queue!(out, Clear(ClearType::All), Clear(ClearType::Purge), MoveTo(0, 0)));
    }

    fn set_active(&mut self, active: bool) {
        let was_active = self.active;
        self.active = active;
        if active && !was_active {
            self.repaint();
        }
    }

    fn has_selection(&self) -> bool {
        false
    }

    fn selection_text(&self) -> Option<String> {
        None
    }

    fn clear_selection(&mut self) {}
}

/// Escape sequence being skipped by `LineLog`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Esc,
    Charset,
    Csi,
    Osc,
    OscEsc,
}

/// Shell output reduced to plain-text lines
#[derive(Debug)]
struct LineLog {
    lines: VecDeque<String>,
    current: String,
    /// Carriage return seen; the next printable character starts the line over
    overwrite: bool,
    state: Escape,
    limit: usize,
}

impl LineLog {
    fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            current: String::new(),
            overwrite: false,
            state: Escape::None,
            limit,
        }
    }

    fn push(&mut self, text: &str) {
        for ch in text.chars() {
            self.state = match (self.state, ch) {
                (Escape::None, '\x1b') => Escape::Esc,
                (Escape::None, '\n') => {
                    self.end_line();
                    Escape::None
                }
                (Escape::None, '\r') => {
                    self.overwrite = true;
                    Escape::None
                }
                (Escape::None, '\x08') => {
                    self.current.pop();
                    Escape::None
                }
                (Escape::None, '\t') => {
                    let width = 8 - self.current.chars().count() % 8;
                    for _ in 0..width {
                        self.print(' ');
                    }
                    Escape::None
                }
                (Escape::None, c) if c.is_control() => Escape::None,
                (Escape::None, c) => {
                    self.print(c);
                    Escape::None
                }
                (Escape::Esc, '[') => Escape::Csi,
                (Escape::Esc, ']') => Escape::Osc,
                (Escape::Esc, '(' | ')' | '*' | '+') => Escape::Charset,
                (Escape::Esc | Escape::Charset, _) => Escape::None,
                (Escape::Csi, '\x40'..='\x7e') => Escape::None,
                (Escape::Csi, _) => Escape::Csi,
                (Escape::Osc, '\x07') => Escape::None,
                (Escape::Osc, '\x1b') => Escape::OscEsc,
                (Escape::Osc, _) => Escape::Osc,
                (Escape::OscEsc, '\\') => Escape::None,
                (Escape::OscEsc, _) => Escape::Osc,
            };
        }
    }

    fn print(&mut self, ch: char) {
        if self.overwrite {
            self.current.clear();
            self.overwrite = false;
        }
        self.current.push(ch);
    }

    fn end_line(&mut self) {
        self.overwrite = false;
        self.lines.push_back(std::mem::take(&mut self.current));
        self.trim();
    }

    fn trim(&mut self) {
        while self.lines.len() > self.limit {
            self.lines.pop_front();
        }
    }

    fn limit(&self) -> usize {
        self.limit
    }

    fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        self.trim();
    }

    fn clear(&mut self) {
        self.lines.clear();
        self.current.clear();
        self.overwrite = false;
    }

    /// Finished lines plus the one being written
    fn len(&self) -> usize {
        self.lines.len() + 1
    }

    /// `rows` lines ending `offset` lines above the bottom
    fn window(&self, offset: usize, rows: usize) -> impl Iterator<Item = &str> {
        let end = self.len().saturating_sub(offset);
        let start = end.saturating_sub(rows);
        (start..end).map(move |i| self.lines.get(i).map_or(self.current.as_str(), String::as_str))
    }
}
