//! Configuration for ptyhost.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.ptyhost/config.toml`
//! - The shell, working directory and surface options new sessions use
//! - Keybindings for host commands, which never reach the shell
//!
//! # Configuration File
//!
//! ```toml
//! cwd = "~/src"
//! cursor_blink = true
//! scrollback = 5000
//! set_locale_variables = true
//!
//! [shell]
//! executable = "/bin/zsh"
//! args = ["-l"]
//!
//! [font]
//! char_width = 1.0
//! char_height = 1.0
//!
//! [keybindings]
//! "ctrl+shift+n" = "terminal.new"
//!
//! [timing]
//! launch_settle_ms = 500
//! selection_refresh_ms = 0
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::env::{detect_locale, home_dir, EnvMap, ShellDescriptor};
use crate::core::surface::FontMetrics;

/// Command identifiers understood by the host
pub mod commands {
    pub const NEW: &str = "terminal.new";
    pub const KILL: &str = "terminal.kill";
    pub const NEXT: &str = "terminal.next";
    pub const PREV: &str = "terminal.prev";
    pub const COPY: &str = "terminal.copySelection";
    pub const PASTE: &str = "terminal.paste";
    pub const CLEAR: &str = "terminal.clear";
    pub const SCROLL_UP_PAGE: &str = "terminal.scrollUpPage";
    pub const SCROLL_DOWN_PAGE: &str = "terminal.scrollDownPage";
    pub const SCROLL_TO_TOP: &str = "terminal.scrollToTop";
    pub const SCROLL_TO_BOTTOM: &str = "terminal.scrollToBottom";
    pub const QUIT: &str = "host.quit";

    pub const ALL: &[&str] = &[
        NEW,
        KILL,
        NEXT,
        PREV,
        COPY,
        PASTE,
        CLEAR,
        SCROLL_UP_PAGE,
        SCROLL_DOWN_PAGE,
        SCROLL_TO_TOP,
        SCROLL_TO_BOTTOM,
        QUIT,
    ];
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not determine config path")]
    NoHome,
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Working directory for new sessions, absolute or workspace-relative
    pub cwd: Option<String>,
    pub cursor_blink: bool,
    /// Scrollback length in lines
    pub scrollback: usize,
    /// Commands whose keybindings are kept from the shell
    pub commands_to_skip_shell: Vec<String>,
    /// Export `LANG` derived from the locale
    pub set_locale_variables: bool,
    /// Locale tag such as `en-US`; detected from the environment if unset
    pub locale: Option<String>,
    /// Undelivered output chunks buffered per session
    pub output_queue_limit: usize,
    // Tables go last so the file serializes as valid TOML
    /// Shell for new sessions
    pub shell: ShellConfig,
    /// Character cell size used for layout
    pub font: Option<FontMetrics>,
    /// Key chord -> command id
    pub keybindings: BTreeMap<String, String>,
    pub timing: TimingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: ShellConfig::default(),
            cwd: None,
            cursor_blink: false,
            scrollback: 1000,
            commands_to_skip_shell: commands::ALL.iter().map(|c| c.to_string()).collect(),
            set_locale_variables: false,
            locale: None,
            font: None,
            keybindings: default_keybindings(),
            timing: TimingConfig::default(),
            output_queue_limit: 256,
        }
    }
}

/// Shell configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub executable: Option<String>,
    pub args: Vec<String>,
}

/// Session timing constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Exits within this window after spawn count as launch failures
    pub launch_settle_ms: u64,
    /// Delay before recomputing the selection indicator after an event
    pub selection_refresh_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            launch_settle_ms: 500,
            selection_refresh_ms: 0,
        }
    }
}

impl TimingConfig {
    pub fn launch_settle(&self) -> Duration {
        Duration::from_millis(self.launch_settle_ms)
    }

    pub fn selection_refresh(&self) -> Duration {
        Duration::from_millis(self.selection_refresh_ms)
    }
}

fn default_keybindings() -> BTreeMap<String, String> {
    [
        ("ctrl+shift+n", commands::NEW),
        ("ctrl+shift+w", commands::KILL),
        ("ctrl+shift+right", commands::NEXT),
        ("ctrl+shift+left", commands::PREV),
        ("ctrl+shift+v", commands::PASTE),
        ("ctrl+shift+k", commands::CLEAR),
        ("shift+pageup", commands::SCROLL_UP_PAGE),
        ("shift+pagedown", commands::SCROLL_DOWN_PAGE),
        ("ctrl+shift+home", commands::SCROLL_TO_TOP),
        ("ctrl+shift+end", commands::SCROLL_TO_BOTTOM),
        ("ctrl+shift+q", commands::QUIT),
    ]
    .into_iter()
    .map(|(chord, command)| (chord.to_string(), command.to_string()))
    .collect()
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("{}; using default configuration", e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoHome)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Directory holding the config file and the log
    pub fn config_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".ptyhost"))
    }

    /// Get config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// The configured shell, or the platform default
    pub fn shell_descriptor(&self) -> ShellDescriptor {
        match &self.shell.executable {
            Some(executable) if !executable.is_empty() => {
                ShellDescriptor::new(executable.clone(), self.shell.args.clone())
            }
            _ => ShellDescriptor {
                args: self.shell.args.clone(),
                ..ShellDescriptor::platform_default()
            },
        }
    }

    /// Locale to export as `LANG`, if locale variables are enabled
    pub fn locale_for(&self, env: &EnvMap) -> Option<String> {
        if !self.set_locale_variables {
            return None;
        }
        self.locale.clone().or_else(|| detect_locale(env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            cursor_blink = true
            [shell]
            executable = "/bin/zsh"
            [timing]
            launch_settle_ms = 250
            "#,
        )
        .unwrap();

        assert!(config.cursor_blink);
        assert_eq!(config.scrollback, 1000);
        assert_eq!(config.shell_descriptor().executable, "/bin/zsh");
        assert_eq!(config.timing.launch_settle(), Duration::from_millis(250));
        assert_eq!(config.timing.selection_refresh(), Duration::ZERO);
        assert_eq!(config.keybindings.get("ctrl+shift+q").map(String::as_str), Some(commands::QUIT));
    }

    #[test]
    fn test_copy_is_not_bound_by_default() {
        // The console surface reports no selection, so Ctrl+Shift+C stays with the shell
        let config = Config::default();
        assert!(!config.keybindings.values().any(|c| c == commands::COPY));
        assert!(!config.keybindings.contains_key("ctrl+shift+c"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.font = Some(FontMetrics { char_width: 7.0, char_height: 14.0 });
        config.cwd = Some("src".to_string());
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load_from(&missing), Err(ConfigError::Read { .. })));

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "scrollback = \"lots\"").unwrap();
        assert!(matches!(Config::load_from(&broken), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_locale_for() {
        let mut env = EnvMap::new();
        env.insert("LANG".to_string(), "fr_FR.UTF-8".to_string());

        let mut config = Config::default();
        assert_eq!(config.locale_for(&env), None);

        config.set_locale_variables = true;
        assert_eq!(config.locale_for(&env).as_deref(), Some("fr-FR"));

        config.locale = Some("en-us".to_string());
        assert_eq!(config.locale_for(&env).as_deref(), Some("en-us"));
    }
}
