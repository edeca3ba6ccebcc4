//! Session management
//!
//! A `Session` pairs one shell process with one terminal surface. It moves
//! bytes between them, forwards resizes to the shell, and tears both down
//! exactly once, whether the shell exits or the owner disposes it.
//!
//! Sessions are driven by their owner's event loop: `poll` runs one turn
//! (pending process messages, then due timers), surface input arrives
//! through `handle_key` and `handle_surface_event`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::env::{build_env, home_dir, resolve_cwd, EnvMap, ShellDescriptor};
use super::event::{ContextKey, Disposable, DisposableStore, Emitter, Subscription};
use super::keybinding::{KeyChord, KeybindingResolver};
use super::notify::{Notifier, Severity};
use super::pty::{self, LaunchConfig, ProcessMessage, ProcessRequest, ProcessSpawner, ShellProcess};
use super::surface::{Clipboard, Container, Surface, SurfaceEvent};
use super::timer::{Clock, TimerQueue};
use crate::config::Config;

/// Unique session identifier
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Line separator of the host platform
pub const EOL: &str = if cfg!(windows) { "\r\n" } else { "\n" };

/// Size of the PTY before the first layout
const INITIAL_SIZE: (u16, u16) = (80, 24);

/// Process messages handled per turn, so one chatty shell cannot starve
/// the rest of the loop
const MAX_MESSAGES_PER_TURN: usize = 256;

/// Exit code reported when the shell could not be spawned at all
const SPAWN_FAILURE_EXIT_CODE: i32 = 1;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("The terminal session has already been attached to a container")]
    AlreadyAttached,
    #[error("The terminal session has been disposed")]
    Disposed,
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Spawned; exits now count as launch failures
    Launching,
    Running,
    /// Torn down because the shell exited
    Exiting,
    /// Torn down by the owner
    Disposed,
}

impl SessionState {
    /// Whether the session has been torn down
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Exiting | SessionState::Disposed)
    }
}

/// What the surface should do with a key press
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Let the surface translate it for the shell
    Forward,
    /// Bound to a host command; keep it from the shell
    Command(String),
    /// Swallowed (Tab while tab focus mode is on)
    Suppress,
}

/// Indicators shared with whoever enables host commands
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// A session surface holds input focus
    pub terminal_focus: ContextKey,
    /// The active terminal has a non-empty selection
    pub text_selected: ContextKey,
    /// The terminal panel is the active panel
    pub panel_active: ContextKey,
    /// Tab moves focus instead of reaching the shell
    pub tab_focus_mode: ContextKey,
}

/// Collaborators a session needs
#[derive(Clone)]
pub struct SessionServices {
    pub spawner: Rc<dyn ProcessSpawner>,
    pub notifier: Rc<dyn Notifier>,
    pub keybindings: Rc<dyn KeybindingResolver>,
    pub clock: Rc<dyn Clock>,
    pub context: SessionContext,
}

/// Per-session launch parameters
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Fixed title; when absent the shell reports one
    pub name: Option<String>,
    /// Shell to run; an empty executable means the configured shell
    pub shell: ShellDescriptor,
    pub workspace_root: Option<PathBuf>,
    pub parent_env: EnvMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionTimer {
    LaunchSettled,
    RefreshSelection,
}

/// Stand-in for a shell that never started: reports one exit, then nothing
struct FailedLaunch {
    exit: Option<i32>,
}

impl ShellProcess for FailedLaunch {
    fn send(&mut self, _request: ProcessRequest) -> pty::Result<()> {
        Err(pty::PtyError::Disconnected)
    }

    fn try_recv(&mut self) -> Option<ProcessMessage> {
        self.exit.take().map(ProcessMessage::Exit)
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn kill(&mut self) {}
}

/// A shell session
pub struct Session {
    id: SessionId,
    state: SessionState,
    title: String,
    /// Title was given by the owner and ignores shell reports
    fixed_title: bool,
    process_id: Option<u32>,
    visible: bool,
    had_focus_on_exit: bool,
    skip_commands: HashSet<String>,
    shell: ShellDescriptor,
    cwd: String,
    config: Config,
    services: SessionServices,
    process: Option<Box<dyn ShellProcess>>,
    surface: Option<Box<dyn Surface>>,
    /// Set on the first attach and never cleared
    attached: bool,
    container: Option<Container>,
    dimensions: Option<(u16, u16)>,
    timers: TimerQueue<SessionTimer>,
    disposables: DisposableStore,
    on_disposed: Emitter<SessionId>,
    on_process_id_ready: Emitter<u32>,
    on_title_changed: Emitter<String>,
}

impl Session {
    /// Create a session and spawn its shell
    pub fn new(services: SessionServices, config: &Config, options: LaunchOptions) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::SeqCst);

        let shell = if options.shell.executable.is_empty() {
            ShellDescriptor {
                ignore_custom_cwd: options.shell.ignore_custom_cwd,
                ..config.shell_descriptor()
            }
        } else {
            options.shell
        };

        let home = home_dir().unwrap_or_else(|| PathBuf::from("/"));
        let cwd = resolve_cwd(
            config.cwd.as_deref(),
            shell.ignore_custom_cwd,
            options.workspace_root.as_deref(),
            &home,
        );
        let locale = config.locale_for(&options.parent_env);
        let env = build_env(&options.parent_env, &shell, &cwd, locale.as_deref());

        let launch = LaunchConfig {
            shell: shell.clone(),
            cwd: cwd.clone(),
            env,
            cols: INITIAL_SIZE.0,
            rows: INITIAL_SIZE.1,
            output_queue_limit: config.output_queue_limit,
        };

        info!("Session {}: launching `{}` in {}", id, shell.display_command(), cwd);
        let process = match services.spawner.spawn(&launch) {
            Ok(process) => process,
            Err(e) => {
                error!("Session {}: {}", id, e);
                Box::new(FailedLaunch {
                    exit: Some(SPAWN_FAILURE_EXIT_CODE),
                })
            }
        };

        let mut timers = TimerQueue::new();
        timers.schedule(
            services.clock.now(),
            config.timing.launch_settle(),
            SessionTimer::LaunchSettled,
        );

        let fixed_title = options.name.is_some();
        Self {
            id,
            state: SessionState::Launching,
            title: options.name.unwrap_or_default(),
            fixed_title,
            process_id: None,
            visible: false,
            had_focus_on_exit: false,
            skip_commands: config.commands_to_skip_shell.iter().cloned().collect(),
            shell,
            cwd,
            config: config.clone(),
            services,
            process: Some(process),
            surface: None,
            attached: false,
            container: None,
            dimensions: None,
            timers,
            disposables: DisposableStore::new(),
            on_disposed: Emitter::new(),
            on_process_id_ready: Emitter::new(),
            on_title_changed: Emitter::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn process_id(&self) -> Option<u32> {
        self.process_id
    }

    pub fn shell(&self) -> &ShellDescriptor {
        &self.shell
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Still inside the launch-settle window
    pub fn is_launching(&self) -> bool {
        self.state == SessionState::Launching
    }

    pub fn is_disposed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Whether the surface had focus when the session was torn down
    pub fn had_focus_on_exit(&self) -> bool {
        self.had_focus_on_exit
    }

    /// Last (cols, rows) computed by `layout`
    pub fn dimensions(&self) -> Option<(u16, u16)> {
        self.dimensions
    }

    pub fn skip_commands(&self) -> &HashSet<String> {
        &self.skip_commands
    }

    /// Earliest pending timer, for the owner's poll timeout
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn on_disposed(&self, listener: impl FnMut(&SessionId) + 'static) -> Subscription {
        self.on_disposed.subscribe(listener)
    }

    pub fn on_process_id_ready(&self, listener: impl FnMut(&u32) + 'static) -> Subscription {
        self.on_process_id_ready.subscribe(listener)
    }

    pub fn on_title_changed(&self, listener: impl FnMut(&String) + 'static) -> Subscription {
        self.on_title_changed.subscribe(listener)
    }

    /// Hand a resource to the session; it is released on teardown
    pub fn add_disposable(&mut self, item: impl Disposable + 'static) {
        self.disposables.add(item);
    }

    /// Attach the session to a surface. Allowed once per session.
    pub fn attach(&mut self, container: Container, mut surface: Box<dyn Surface>) -> Result<(), SessionError> {
        if self.attached {
            return Err(SessionError::AlreadyAttached);
        }
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        self.attached = true;

        surface.open(&container);
        self.surface = Some(surface);
        self.container = Some(container);

        self.layout(container.width, container.height);
        self.set_visible(self.visible);
        self.apply_config();
        debug!("Session {}: attached", self.id);
        Ok(())
    }

    /// Run one turn: pending process messages, then due timers.
    ///
    /// Returns whether anything happened.
    pub fn poll(&mut self) -> bool {
        if self.is_disposed() {
            return false;
        }

        let mut busy = false;
        let mut output = String::new();
        for _ in 0..MAX_MESSAGES_PER_TURN {
            let Some(message) = self.process.as_mut().and_then(|p| p.try_recv()) else {
                break;
            };
            busy = true;
            match message {
                // Coalesce consecutive output into one surface write
                ProcessMessage::Data(text) => output.push_str(&text),
                other => {
                    self.flush_output(&mut output);
                    self.handle_process_message(other);
                }
            }
        }
        self.flush_output(&mut output);

        // Messages already queued happened before any timer now due
        if !self.is_disposed() {
            for timer in self.timers.take_due(self.services.clock.now()) {
                busy = true;
                self.run_timer(timer);
            }
        }
        busy
    }

    fn flush_output(&mut self, output: &mut String) {
        if !output.is_empty() {
            let text = std::mem::take(output);
            self.handle_process_message(ProcessMessage::Data(text));
        }
    }

    fn run_timer(&mut self, timer: SessionTimer) {
        match timer {
            SessionTimer::LaunchSettled => {
                if self.state == SessionState::Launching {
                    self.state = SessionState::Running;
                }
            }
            SessionTimer::RefreshSelection => self.refresh_selection(),
        }
    }

    /// React to one message from the shell side
    pub fn handle_process_message(&mut self, message: ProcessMessage) {
        match message {
            ProcessMessage::Data(text) => {
                // Late output after teardown has nowhere to go
                if let Some(surface) = self.surface.as_mut() {
                    surface.write(&text);
                }
            }
            ProcessMessage::Title(title) => {
                if self.fixed_title || self.is_disposed() {
                    return;
                }
                self.title = title;
                self.on_title_changed.fire(&self.title);
            }
            ProcessMessage::Pid(pid) => {
                if self.process_id.is_some() || self.is_disposed() {
                    return;
                }
                debug!("Session {}: pid {}", self.id, pid);
                self.process_id = Some(pid);
                self.on_process_id_ready.fire(&pid);
            }
            ProcessMessage::Exit(code) => self.handle_exit(code),
        }
    }

    fn handle_exit(&mut self, code: i32) {
        if self.is_disposed() {
            return;
        }
        let launching = self.is_launching();
        info!("Session {}: shell exited with code {}", self.id, code);
        self.teardown(SessionState::Exiting);

        if code != 0 {
            let message = if launching {
                format!(
                    "The terminal process command `{}` failed to launch (exit code: {})",
                    self.shell.display_command(),
                    code
                )
            } else {
                format!("The terminal process terminated with exit code {}", code)
            };
            self.services.notifier.show(Severity::Error, &message);
        }
    }

    /// Tear the session down. Further calls are no-ops.
    pub fn dispose(&mut self) {
        self.teardown(SessionState::Disposed);
    }

    fn teardown(&mut self, target: SessionState) {
        if self.is_disposed() {
            return;
        }
        self.state = target;
        self.timers.clear();

        if let Some(mut surface) = self.surface.take() {
            self.had_focus_on_exit = surface.has_focus();
            surface.destroy();
        }
        if self.had_focus_on_exit {
            self.services.context.terminal_focus.reset();
        }
        if let Some(mut process) = self.process.take() {
            if process.is_connected() {
                process.kill();
            }
        }

        debug!("Session {}: disposed ({:?})", self.id, target);
        self.on_disposed.fire(&self.id);
        self.disposables.dispose_all();
    }

    /// Resolve a key press against host keybindings before the surface sees it
    pub fn handle_key(&self, chord: &KeyChord) -> KeyAction {
        if let Some(command) = self.services.keybindings.resolve(chord) {
            if self.skip_commands.contains(&command) {
                return KeyAction::Command(command);
            }
        }
        if self.services.context.tab_focus_mode.get() && chord.is_tab() {
            return KeyAction::Suppress;
        }
        KeyAction::Forward
    }

    /// React to input and focus changes on the surface
    pub fn handle_surface_event(&mut self, event: SurfaceEvent) {
        if self.is_disposed() {
            return;
        }
        match event {
            SurfaceEvent::Data(data) => self.send_input(sanitize_input(&data)),
            SurfaceEvent::Focus => {
                self.services.context.terminal_focus.set(true);
                self.schedule_selection_refresh();
            }
            SurfaceEvent::Blur => {
                self.services.context.terminal_focus.reset();
                self.schedule_selection_refresh();
            }
            SurfaceEvent::MouseUp | SurfaceEvent::KeyUp => self.schedule_selection_refresh(),
        }
    }

    /// Recompute the selection indicator on a later turn, once the event
    /// that may have changed the selection has been fully handled
    fn schedule_selection_refresh(&mut self) {
        let now = self.services.clock.now();
        let delay = self.config.timing.selection_refresh();
        self.timers.schedule(now, delay, SessionTimer::RefreshSelection);
    }

    fn refresh_selection(&mut self) {
        let context = &self.services.context;
        context.text_selected.set(context.panel_active.get() && self.has_selection());
    }

    fn send_input(&mut self, data: String) {
        if let Some(process) = self.process.as_mut() {
            if let Err(e) = process.send(ProcessRequest::Input(data)) {
                debug!("Session {}: input dropped: {}", self.id, e);
            }
        }
    }

    /// Send text to the shell, optionally making sure it ends with a newline
    pub fn send_text(&mut self, text: &str, add_new_line: bool) {
        if self.is_disposed() {
            return;
        }
        let mut text = text.to_string();
        if add_new_line && !text.ends_with(EOL) {
            text.push_str(EOL);
        }
        self.send_input(text);
    }

    /// Resize to fit `width` x `height` pixels
    pub fn layout(&mut self, width: f64, height: f64) {
        let Some(font) = self.config.font.filter(|f| f.is_known()) else {
            return;
        };
        // Collapsed or minimized
        if height <= 0.0 || self.is_disposed() {
            return;
        }

        let padding = self.container.map_or(0.0, |c| c.padding_left);
        let inner_width = (width - padding).max(0.0);
        let cols = cells(inner_width, font.char_width);
        let rows = cells(height, font.char_height);

        if let Some(surface) = self.surface.as_mut() {
            surface.sync_scroll();
            surface.resize(cols, rows);
        }
        if let Some(process) = self.process.as_mut() {
            if process.is_connected() {
                if let Err(e) = process.send(ProcessRequest::Resize { cols, rows }) {
                    warn!("Session {}: resize to {}x{} failed: {}", self.id, cols, rows, e);
                }
            }
        }
        if self.dimensions != Some((cols, rows)) {
            debug!("Session {}: resized to {}x{}", self.id, cols, rows);
        }
        self.dimensions = Some((cols, rows));
    }

    /// Push configuration changes into the session and its surface
    pub fn update_config(&mut self, config: &Config) {
        self.config = config.clone();
        self.apply_config();
    }

    fn apply_config(&mut self) {
        self.skip_commands = self.config.commands_to_skip_shell.iter().cloned().collect();

        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        if surface.cursor_blink() != self.config.cursor_blink {
            surface.set_cursor_blink(self.config.cursor_blink);
            let (_, rows) = surface.size();
            surface.refresh(0, rows.saturating_sub(1));
        }
        if surface.scrollback() != self.config.scrollback {
            surface.set_scrollback(self.config.scrollback);
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        if let Some(surface) = self.surface.as_mut() {
            surface.set_active(visible);
        }
    }

    /// Focus the surface unless the user is selecting text (or `force`)
    pub fn focus(&mut self, force: bool) {
        if let Some(surface) = self.surface.as_mut() {
            if force || !surface.has_selection() {
                surface.focus();
            }
        }
    }

    /// Paste clipboard text into the shell
    pub fn paste(&mut self, clipboard: &mut dyn Clipboard) {
        if self.is_disposed() {
            return;
        }
        self.focus(false);
        if let Some(text) = clipboard.get_text() {
            self.handle_surface_event(SurfaceEvent::Data(text));
        }
    }

    pub fn has_selection(&self) -> bool {
        self.surface.as_ref().map_or(false, |s| s.has_selection())
    }

    /// Copy the selection; only allowed while the surface has focus
    pub fn copy_selection(&mut self, clipboard: &mut dyn Clipboard) {
        let Some(surface) = self.surface.as_ref().filter(|s| s.has_focus()) else {
            self.services.notifier.show(
                Severity::Warning,
                "Cannot copy terminal selection when terminal does not have focus",
            );
            return;
        };
        if let Some(text) = surface.selection_text() {
            if !clipboard.set_text(&text) {
                warn!("Session {}: clipboard write failed", self.id);
            }
        }
    }

    pub fn clear_selection(&mut self) {
        if let Some(surface) = self.surface.as_mut() {
            surface.clear_selection();
        }
    }

    pub fn scroll_down_line(&mut self) {
        self.with_surface(|s| s.scroll_lines(1));
    }

    pub fn scroll_up_line(&mut self) {
        self.with_surface(|s| s.scroll_lines(-1));
    }

    pub fn scroll_down_page(&mut self) {
        self.with_surface(|s| s.scroll_pages(1));
    }

    pub fn scroll_up_page(&mut self) {
        self.with_surface(|s| s.scroll_pages(-1));
    }

    pub fn scroll_to_top(&mut self) {
        self.with_surface(|s| s.scroll_to_top());
    }

    pub fn scroll_to_bottom(&mut self) {
        self.with_surface(|s| s.scroll_to_bottom());
    }

    pub fn clear(&mut self) {
        self.with_surface(|s| s.clear());
    }

    fn with_surface(&mut self, f: impl FnOnce(&mut dyn Surface)) {
        if let Some(surface) = self.surface.as_mut() {
            f(surface.as_mut());
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Whole character cells fitting in `pixels`, at least one
fn cells(pixels: f64, cell: f64) -> u16 {
    let n = (pixels / cell).floor();
    if n < 1.0 {
        1
    } else if n > f64::from(u16::MAX) {
        u16::MAX
    } else {
        n as u16
    }
}

/// Normalize CR, CRLF and LF to the host line separator
pub fn sanitize_input(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    let mut chars = data.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str(EOL);
            }
            '\n' => out.push_str(EOL),
            other => out.push(other),
        }
    }
    out
}
