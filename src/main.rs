//! ptyhost - shell sessions on pseudo-terminals
//!
//! ptyhost runs one or more shells on PTYs and presents the active one on
//! the console it was started from. Output passes through untouched, so the
//! host terminal does the rendering; ptyhost owns process lifetime, resizing,
//! host keybindings and launch diagnostics.
//!
//! # Quick Start
//!
//! ```text
//! ptyhost                     # Start with the configured or default shell
//! ptyhost -s /bin/zsh -a -l   # Login zsh
//! ptyhost -d ~/src -n build   # Named session in ~/src
//! ```
//!
//! # Keybindings (defaults)
//!
//! | Key | Action |
//! |-----|--------|
//! | Ctrl+Shift+N | New session |
//! | Ctrl+Shift+W | Kill session |
//! | Ctrl+Shift+Right/Left | Next/Previous session |
//! | Ctrl+Shift+V | Paste |
//! | Ctrl+Shift+K | Clear |
//! | Shift+PageUp/PageDown | Scroll back/forward a page |
//! | Ctrl+Shift+Home/End | Scroll to top/bottom |
//! | Ctrl+Shift+Q | Quit |
//!
//! Ctrl+Shift chords need a terminal with the kitty keyboard protocol.

mod config;
mod core;
mod ui;

use std::collections::HashMap;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossterm::cursor::SetCursorStyle;
use crossterm::event::{
    self, DisableBracketedPaste, DisableFocusChange, EnableBracketedPaste, EnableFocusChange, Event, KeyEventKind,
    KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen, SetTitle};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{commands, Config};
use crate::core::env::{current_env, ShellDescriptor};
use crate::core::keybinding::{KeyChord, KeybindingTable};
use crate::core::manager::{ManagerEvent, SessionManager};
use crate::core::notify::{DeferredNotifier, Severity};
use crate::core::pty::PtySpawner;
use crate::core::session::{KeyAction, LaunchOptions, SessionContext, SessionId, SessionServices};
use crate::core::surface::{Container, FontMetrics, SurfaceEvent};
use crate::core::timer::SystemClock;
use crate::ui::{HostSurface, KeyMapper, SurfaceHandle, SystemClipboard};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound on one wait for console events
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Reported modifiers must distinguish Ctrl+Shift+letter from Ctrl+letter
const KEYBOARD_FLAGS: KeyboardEnhancementFlags = KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES;

/// Command line options
#[derive(Debug, Default)]
struct CliArgs {
    shell: Option<String>,
    shell_args: Vec<String>,
    cwd: Option<String>,
    name: Option<String>,
    config_path: Option<PathBuf>,
    init_config: bool,
}

fn print_version() {
    eprintln!("ptyhost {}", VERSION);
}

fn print_help() {
    eprintln!("ptyhost {} - shell sessions on pseudo-terminals", VERSION);
    eprintln!();
    eprintln!("Usage: ptyhost [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -s, --shell <PATH>    Shell executable");
    eprintln!("  -a, --arg <ARG>       Shell argument (repeatable)");
    eprintln!("  -d, --cwd <DIR>       Working directory for new sessions");
    eprintln!("  -n, --name <NAME>     Fixed session title");
    eprintln!("  -c, --config <FILE>   Configuration file");
    eprintln!("      --init-config     Write the effective configuration and exit");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys (Ctrl+Shift chords need the kitty keyboard protocol):");
    eprintln!("  Ctrl+Shift+N / W      New / kill session");
    eprintln!("  Ctrl+Shift+Right/Left Next / previous session");
    eprintln!("  Ctrl+Shift+V / K      Paste / clear");
    eprintln!("  Shift+PageUp/PageDown Scroll back / forward");
    eprintln!("  Ctrl+Shift+Home/End   Scroll to top / bottom");
    eprintln!("  Ctrl+Shift+Q          Quit");
    eprintln!();
    eprintln!("Configuration: ~/.ptyhost/config.toml");
    eprintln!("Log:           ~/.ptyhost/ptyhost.log (level from PTYHOST_LOG)");
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| args.next().ok_or_else(|| format!("Missing value for {}", flag));
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-s" | "--shell" => cli.shell = Some(value(&arg)?),
            "-a" | "--arg" => cli.shell_args.push(value(&arg)?),
            "-d" | "--cwd" => cli.cwd = Some(value(&arg)?),
            "-n" | "--name" => cli.name = Some(value(&arg)?),
            "-c" | "--config" => cli.config_path = Some(PathBuf::from(value(&arg)?)),
            "--init-config" => cli.init_config = true,
            other => return Err(format!("Unknown argument: {}. Use -h for help.", other)),
        }
    }

    Ok(cli)
}

/// Log to `~/.ptyhost/ptyhost.log`; the console belongs to the shells
fn init_logging() {
    let log_path = Config::config_dir()
        .map(|dir| dir.join("ptyhost.log"))
        .unwrap_or_else(|| PathBuf::from("ptyhost.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env("PTYHOST_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn load_config(cli: &CliArgs) -> anyhow::Result<Config> {
    let mut config = match &cli.config_path {
        // --init-config may name a file that does not exist yet
        Some(path) if cli.init_config && !path.exists() => Config::default(),
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    if let Some(shell) = &cli.shell {
        config.shell.executable = Some(shell.clone());
        config.shell.args = cli.shell_args.clone();
    } else if !cli.shell_args.is_empty() {
        config.shell.args = cli.shell_args.clone();
    }
    if let Some(cwd) = &cli.cwd {
        config.cwd = Some(cwd.clone());
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = match parse_args(env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("ptyhost {} starting...", VERSION);

    let config = load_config(&cli)?;

    if cli.init_config {
        match &cli.config_path {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }
        eprintln!("Configuration written");
        return Ok(());
    }

    let notifier = Rc::new(DeferredNotifier::new());
    let result = run(config, cli.name, notifier.clone());

    for (severity, message) in notifier.take() {
        match severity {
            Severity::Error => eprintln!("error: {}", message),
            _ => eprintln!("warning: {}", message),
        }
    }
    info!("ptyhost exiting");
    result
}

/// Console state restored on drop, even when the loop fails
struct ConsoleGuard {
    keyboard_enhanced: bool,
}

impl ConsoleGuard {
    fn enter() -> anyhow::Result<Self> {
        terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        let mut guard = ConsoleGuard { keyboard_enhanced: false };
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableFocusChange, EnableBracketedPaste)?;

        // The legacy encoding sends Ctrl+Shift+letter as Ctrl+letter
        match terminal::supports_keyboard_enhancement() {
            Ok(true) => match execute!(stdout, PushKeyboardEnhancementFlags(KEYBOARD_FLAGS)) {
                Ok(()) => {
                    guard.keyboard_enhanced = true;
                    debug!("Keyboard enhancement enabled: {:?}", KEYBOARD_FLAGS);
                }
                Err(e) => warn!("Failed to enable keyboard enhancement: {}", e),
            },
            Ok(false) => warn!("Terminal cannot report Ctrl+Shift keys; those bindings reach the shell"),
            Err(e) => warn!("Failed to query keyboard enhancement support: {}", e),
        }
        Ok(guard)
    }
}

impl Drop for ConsoleGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        if self.keyboard_enhanced {
            let _ = execute!(stdout, PopKeyboardEnhancementFlags);
        }
        let _ = execute!(
            stdout,
            DisableBracketedPaste,
            DisableFocusChange,
            SetCursorStyle::DefaultUserShape,
            LeaveAlternateScreen
        );
        let _ = terminal::disable_raw_mode();
        let _ = stdout.flush();
    }
}

/// Event loop state
struct App {
    manager: SessionManager,
    handles: HashMap<SessionId, SurfaceHandle>,
    clipboard: SystemClipboard,
    launch: LaunchOptions,
    size: (u16, u16),
}

impl App {
    fn new_session(&mut self) -> anyhow::Result<()> {
        let id = self.manager.create(self.launch.clone());
        let surface = HostSurface::stdout();
        self.handles.insert(id, surface.handle());

        let container = Container::new(f64::from(self.size.0), f64::from(self.size.1));
        self.manager.attach(id, container, Box::new(surface))?;
        self.sync_title();
        Ok(())
    }

    fn active_handle(&self) -> Option<&SurfaceHandle> {
        self.manager.active_id().and_then(|id| self.handles.get(&id))
    }

    fn sync_title(&self) {
        if let Some(session) = self.manager.active() {
            let title = if session.title().is_empty() {
                "ptyhost"
            } else {
                session.title()
            };
            let mut stdout = io::stdout();
            let _ = execute!(stdout, SetTitle(title));
        }
    }

    /// Run a host command; returns false when the host should quit
    fn execute(&mut self, command: &str) -> anyhow::Result<bool> {
        debug!("Command {}", command);
        match command {
            commands::NEW => self.new_session()?,
            commands::KILL => self.manager.kill_active(),
            commands::NEXT => {
                self.manager.next();
                self.sync_title();
            }
            commands::PREV => {
                self.manager.prev();
                self.sync_title();
            }
            commands::QUIT => return Ok(false),
            _ => {
                let Some(session) = self.manager.active_mut() else {
                    return Ok(true);
                };
                match command {
                    commands::COPY => session.copy_selection(&mut self.clipboard),
                    commands::PASTE => session.paste(&mut self.clipboard),
                    commands::CLEAR => session.clear(),
                    commands::SCROLL_UP_PAGE => session.scroll_up_page(),
                    commands::SCROLL_DOWN_PAGE => session.scroll_down_page(),
                    commands::SCROLL_TO_TOP => session.scroll_to_top(),
                    commands::SCROLL_TO_BOTTOM => session.scroll_to_bottom(),
                    other => warn!("Unknown command {}", other),
                }
            }
        }
        Ok(true)
    }

    fn handle_event(&mut self, event: Event) -> anyhow::Result<bool> {
        match event {
            Event::Key(key) => {
                if key.kind == KeyEventKind::Release {
                    return Ok(true);
                }
                let chord = KeyChord::from(&key);
                let application_cursor = self.active_handle().map_or(false, |h| h.application_cursor());
                let Some(session) = self.manager.active_mut() else {
                    return Ok(true);
                };
                match session.handle_key(&chord) {
                    KeyAction::Command(command) => return self.execute(&command),
                    KeyAction::Suppress => {}
                    KeyAction::Forward => {
                        if let Some(text) = KeyMapper::map(&key, application_cursor) {
                            session.handle_surface_event(SurfaceEvent::Data(text));
                        }
                    }
                }
            }
            Event::Paste(text) => {
                if let Some(session) = self.manager.active_mut() {
                    session.handle_surface_event(SurfaceEvent::Data(text));
                }
            }
            Event::FocusGained => self.set_focused(true),
            Event::FocusLost => self.set_focused(false),
            Event::Resize(cols, rows) => {
                self.size = (cols, rows);
                self.manager.layout(f64::from(cols), f64::from(rows));
            }
            Event::Mouse(_) => {}
        }
        Ok(true)
    }

    fn set_focused(&mut self, focused: bool) {
        if let Some(handle) = self.active_handle() {
            handle.set_focused(focused);
        }
        if let Some(session) = self.manager.active_mut() {
            let event = if focused { SurfaceEvent::Focus } else { SurfaceEvent::Blur };
            session.handle_surface_event(event);
        }
    }

    fn handle_manager_events(&mut self) {
        for event in self.manager.drain_events() {
            match event {
                ManagerEvent::Disposed(id) => {
                    self.handles.remove(&id);
                    self.sync_title();
                }
                ManagerEvent::TitleChanged(id, _) => {
                    if self.manager.active_id() == Some(id) {
                        self.sync_title();
                    }
                }
                ManagerEvent::ProcessIdReady(id, pid) => info!("Session {} runs as pid {}", id, pid),
            }
        }
    }

    fn poll_timeout(&self) -> Duration {
        match self.manager.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(MAX_POLL_INTERVAL),
            None => MAX_POLL_INTERVAL,
        }
    }
}

fn run(mut config: Config, name: Option<String>, notifier: Rc<DeferredNotifier>) -> anyhow::Result<()> {
    // Console cells are the layout unit
    if config.font.map_or(true, |f| !f.is_known()) {
        config.font = Some(FontMetrics {
            char_width: 1.0,
            char_height: 1.0,
        });
    }

    let (keybindings, errors) = KeybindingTable::from_config(&config.keybindings);
    for e in errors {
        warn!("Ignoring keybinding: {}", e);
    }
    info!("Loaded {} keybindings", keybindings.len());

    let context = SessionContext::default();
    context.panel_active.set(true);

    let services = SessionServices {
        spawner: Rc::new(PtySpawner),
        notifier,
        keybindings: Rc::new(keybindings),
        clock: Rc::new(SystemClock),
        context,
    };

    let launch = LaunchOptions {
        name,
        shell: ShellDescriptor::default(),
        workspace_root: env::current_dir().ok(),
        parent_env: current_env(),
    };

    let size = terminal::size().context("Failed to read console size")?;
    info!("Console size: {}x{}", size.0, size.1);

    let _console = ConsoleGuard::enter()?;
    let mut app = App {
        manager: SessionManager::new(services, config),
        handles: HashMap::new(),
        clipboard: SystemClipboard::new(),
        launch,
        size,
    };
    app.new_session()?;

    loop {
        if event::poll(app.poll_timeout())? {
            let event = event::read()?;
            match app.handle_event(event) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => error!("{:#}", e),
            }
        }

        app.manager.poll();
        app.handle_manager_events();

        if app.manager.is_empty() {
            info!("All sessions ended");
            break;
        }
    }

    app.manager.dispose_all();
    Ok(())
}
