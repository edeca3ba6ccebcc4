//! Child process environment construction
//!
//! Derives the environment a shell is launched with from the parent
//! environment, the shell descriptor, the working directory and the locale.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Environment variable map handed to a spawned shell
pub type EnvMap = HashMap<String, String>;

/// Process id of the controlling host
pub const ENV_PTY_PID: &str = "PTYPID";
/// Shell executable path
pub const ENV_PTY_SHELL: &str = "PTYSHELL";
/// Prefix of the positional shell argument variables (`PTYSHELLARG0`, ...)
pub const ENV_PTY_SHELL_ARG: &str = "PTYSHELLARG";
/// Working directory the shell starts in
pub const ENV_PTY_CWD: &str = "PTYCWD";
/// Locale-derived language variable
pub const ENV_LANG: &str = "LANG";

/// The shell to launch inside a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellDescriptor {
    /// Executable path; empty means "use the configured shell"
    pub executable: String,
    /// Arguments in order
    pub args: Vec<String>,
    /// Skip the configured custom working directory
    pub ignore_custom_cwd: bool,
}

impl ShellDescriptor {
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
            ignore_custom_cwd: false,
        }
    }

    /// The platform default shell
    pub fn platform_default() -> Self {
        Self::new(default_shell(), Vec::new())
    }

    /// Command line as shown to the user: arguments containing a space are
    /// wrapped in single quotes
    pub fn display_command(&self) -> String {
        let mut line = self.executable.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Path convention used when sanitizing a working directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    Windows,
    Posix,
}

impl PathStyle {
    pub fn host() -> Self {
        if cfg!(windows) {
            PathStyle::Windows
        } else {
            PathStyle::Posix
        }
    }
}

/// Build the environment for a shell.
///
/// The parent map is only read; the result is an independent copy with the
/// `PTY*` control variables and, when a locale is given, `LANG` overlaid.
pub fn build_env(parent: &EnvMap, shell: &ShellDescriptor, cwd: &str, locale: Option<&str>) -> EnvMap {
    let mut env = parent.clone();
    env.insert(ENV_PTY_PID.to_string(), std::process::id().to_string());
    env.insert(ENV_PTY_SHELL.to_string(), shell.executable.clone());
    for (i, arg) in shell.args.iter().enumerate() {
        env.insert(format!("{}{}", ENV_PTY_SHELL_ARG, i), arg.clone());
    }
    env.insert(ENV_PTY_CWD.to_string(), cwd.to_string());
    if let Some(locale) = locale {
        env.insert(ENV_LANG.to_string(), lang_env_variable(locale));
    }
    env
}

/// Convert a locale tag into a `LANG` value: `en-us` becomes `en_US.UTF-8`,
/// a single segment such as `fr` becomes `fr.UTF-8`.
pub fn lang_env_variable(locale: &str) -> String {
    let mut parts: Vec<String> = locale.split('-').map(str::to_string).collect();
    let n = parts.len();
    if n > 1 {
        parts[n - 1] = parts[n - 1].to_uppercase();
    }
    format!("{}.UTF-8", parts.join("_"))
}

/// Upper-case the drive letter of a Windows path; identity elsewhere.
pub fn sanitize_cwd(cwd: &str, style: PathStyle) -> String {
    let mut chars = cwd.chars();
    match (style, chars.next(), chars.next()) {
        (PathStyle::Windows, Some(drive), Some(':')) => {
            let mut out = drive.to_uppercase().collect::<String>();
            out.push_str(&cwd[drive.len_utf8()..]);
            out
        }
        _ => cwd.to_string(),
    }
}

/// Pick the working directory for a new shell.
///
/// A leading `~` in the custom cwd stands for `home`. A custom cwd wins when
/// it is absolute, or relative and a workspace root is available to anchor
/// it. Otherwise the workspace root, then `home`.
pub fn resolve_cwd(
    custom_cwd: Option<&str>,
    ignore_custom_cwd: bool,
    workspace_root: Option<&Path>,
    home: &Path,
) -> String {
    let custom = if ignore_custom_cwd {
        None
    } else {
        custom_cwd.filter(|c| !c.is_empty()).and_then(|custom| {
            if let Some(expanded) = expand_home(custom, home) {
                return Some(normalize(&expanded));
            }
            let path = Path::new(custom);
            if path.is_absolute() {
                Some(path.to_path_buf())
            } else {
                workspace_root.map(|root| normalize(&root.join(path)))
            }
        })
    };

    let cwd = custom
        .or_else(|| workspace_root.map(Path::to_path_buf))
        .unwrap_or_else(|| home.to_path_buf());

    sanitize_cwd(&cwd.to_string_lossy(), PathStyle::host())
}

/// `~` or `~/rest` against `home`; `None` for anything else (`~user` too)
fn expand_home(path: &str, home: &Path) -> Option<PathBuf> {
    let rest = path.strip_prefix('~')?;
    if rest.is_empty() {
        return Some(home.to_path_buf());
    }
    let rest = rest.strip_prefix('/').or_else(|| rest.strip_prefix('\\'))?;
    Some(home.join(rest))
}

/// Lexically normalize a path (resolve `.` and `..` without touching disk)
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Snapshot of the current process environment
pub fn current_env() -> EnvMap {
    std::env::vars().collect()
}

/// The platform default shell executable
pub fn default_shell() -> String {
    if cfg!(windows) {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    } else {
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

/// Derive a locale tag (`en-US`) from `LC_ALL` / `LANG` in `env`
pub fn detect_locale(env: &EnvMap) -> Option<String> {
    let raw = env
        .get("LC_ALL")
        .filter(|v| !v.is_empty())
        .or_else(|| env.get(ENV_LANG))?;
    let tag = raw.split('.').next().unwrap_or_default();
    if tag.is_empty() || tag == "C" || tag == "POSIX" {
        return None;
    }
    Some(tag.replace('_', "-"))
}

/// Home directory of the current user
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> ShellDescriptor {
        ShellDescriptor::new("/bin/bash", vec!["-l".to_string(), "--rcfile x".to_string()])
    }

    #[test]
    fn test_build_env_leaves_parent_untouched() {
        let mut parent = EnvMap::new();
        parent.insert("PATH".to_string(), "/usr/bin".to_string());
        let before = parent.clone();

        let mut env = build_env(&parent, &shell(), "/tmp", Some("en-us"));
        env.insert("PATH".to_string(), "changed".to_string());

        assert_eq!(parent, before);
        assert!(!parent.contains_key(ENV_PTY_SHELL));
    }

    #[test]
    fn test_build_env_control_variables() {
        let env = build_env(&EnvMap::new(), &shell(), "/work", None);

        assert_eq!(env[ENV_PTY_PID], std::process::id().to_string());
        assert_eq!(env[ENV_PTY_SHELL], "/bin/bash");
        assert_eq!(env["PTYSHELLARG0"], "-l");
        assert_eq!(env["PTYSHELLARG1"], "--rcfile x");
        assert_eq!(env[ENV_PTY_CWD], "/work");
        assert!(!env.contains_key(ENV_LANG));
    }

    #[test]
    fn test_lang_variable() {
        assert_eq!(lang_env_variable("en-us"), "en_US.UTF-8");
        assert_eq!(lang_env_variable("fr"), "fr.UTF-8");
        assert_eq!(lang_env_variable("zh-hans-cn"), "zh_hans_CN.UTF-8");

        let env = build_env(&EnvMap::new(), &shell(), "/", Some("de-de"));
        assert_eq!(env[ENV_LANG], "de_DE.UTF-8");
    }

    #[test]
    fn test_sanitize_cwd() {
        assert_eq!(sanitize_cwd("c:\\Users\\me", PathStyle::Windows), "C:\\Users\\me");
        assert_eq!(sanitize_cwd("c:\\Users\\me", PathStyle::Posix), "c:\\Users\\me");
        assert_eq!(sanitize_cwd("/home/me", PathStyle::Windows), "/home/me");
        assert_eq!(sanitize_cwd("", PathStyle::Windows), "");
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_cwd() {
        let home = Path::new("/home/me");
        let ws = Path::new("/ws/project");

        assert_eq!(resolve_cwd(Some("/opt"), false, Some(ws), home), "/opt");
        assert_eq!(resolve_cwd(Some("../other/./src"), false, Some(ws), home), "/ws/other/src");
        assert_eq!(resolve_cwd(Some("sub"), false, None, home), "/home/me");
        assert_eq!(resolve_cwd(Some("/opt"), true, Some(ws), home), "/ws/project");
        assert_eq!(resolve_cwd(None, false, None, home), "/home/me");
        assert_eq!(resolve_cwd(Some(""), false, Some(ws), home), "/ws/project");
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_cwd_expands_home() {
        let home = Path::new("/home/me");
        let ws = Path::new("/ws");
        assert_eq!(resolve_cwd(Some("~/src"), false, Some(ws), home), "/home/me/src");
        assert_eq!(resolve_cwd(Some("~"), false, None, home), "/home/me");
        assert_eq!(resolve_cwd(Some("~/a/../b"), false, None, home), "/home/me/b");
        // Only the current user's home is expanded
        assert_eq!(resolve_cwd(Some("~other"), false, Some(ws), home), "/ws/~other");
    }

    #[test]
    fn test_display_command_quotes_spaced_args() {
        assert_eq!(shell().display_command(), "/bin/bash -l '--rcfile x'");
        assert_eq!(ShellDescriptor::new("sh", Vec::new()).display_command(), "sh");
    }

    #[test]
    fn test_detect_locale() {
        let mut env = EnvMap::new();
        assert_eq!(detect_locale(&env), None);
        env.insert("LANG".to_string(), "en_US.UTF-8".to_string());
        assert_eq!(detect_locale(&env).as_deref(), Some("en-US"));
        env.insert("LC_ALL".to_string(), "C".to_string());
        assert_eq!(detect_locale(&env), None);
    }
}
