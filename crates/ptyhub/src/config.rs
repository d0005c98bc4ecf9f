//! Server configuration: TOML file + CLI overrides.

use crate::session::manager::{default_shell, DEFAULT_MAX_SESSIONS, DEFAULT_TERM};
use crate::session::SessionOptions;
use ptyhub_core::{PtyHubError, PtyHubResult, DEFAULT_COLS, DEFAULT_MAX_HISTORY_LINES, DEFAULT_ROWS};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub terminal: TerminalSection,
    #[serde(default)]
    pub sessions: SessionsSection,
}

/// `[terminal]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalSection {
    /// Shell to spawn; falls back to `$SHELL`, then `/bin/sh`.
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default = "default_term")]
    pub term: String,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_max_history_lines")]
    pub max_history_lines: usize,
}

impl Default for TerminalSection {
    fn default() -> Self {
        Self {
            shell: None,
            term: default_term(),
            rows: default_rows(),
            cols: default_cols(),
            max_history_lines: default_max_history_lines(),
        }
    }
}

/// `[sessions]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsSection {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Seconds without activity before a session is collected; 0 disables.
    #[serde(default)]
    pub idle_timeout: u64,
    #[serde(default = "default_gc_interval")]
    pub gc_interval: u64,
}

impl Default for SessionsSection {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            idle_timeout: 0,
            gc_interval: default_gc_interval(),
        }
    }
}

fn default_term() -> String {
    DEFAULT_TERM.to_string()
}
fn default_rows() -> u16 {
    DEFAULT_ROWS
}
fn default_cols() -> u16 {
    DEFAULT_COLS
}
fn default_max_history_lines() -> usize {
    DEFAULT_MAX_HISTORY_LINES
}
fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}
fn default_gc_interval() -> u64 {
    60
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub shell: Option<String>,
    pub max_history_lines: Option<usize>,
    pub max_sessions: Option<usize>,
    pub idle_timeout: Option<u64>,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub shell: String,
    pub term: String,
    pub rows: u16,
    pub cols: u16,
    pub max_history_lines: usize,
    pub max_sessions: usize,
    pub idle_timeout: u64,
    pub gc_interval: u64,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides. A missing file
    /// yields defaults.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> PtyHubResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Ok(Self::merge(file_config, cli))
    }

    fn merge(file: ConfigFile, cli: &CliOverrides) -> Self {
        let shell = cli
            .shell
            .clone()
            .or(file.terminal.shell)
            .unwrap_or_else(default_shell);

        Self {
            shell,
            term: file.terminal.term,
            rows: file.terminal.rows,
            cols: file.terminal.cols,
            max_history_lines: cli
                .max_history_lines
                .unwrap_or(file.terminal.max_history_lines),
            max_sessions: cli.max_sessions.unwrap_or(file.sessions.max_sessions),
            idle_timeout: cli.idle_timeout.unwrap_or(file.sessions.idle_timeout),
            gc_interval: file.sessions.gc_interval.max(1),
        }
    }

    /// Options handed to the session manager.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            shell: self.shell.clone(),
            term: self.term.clone(),
            rows: self.rows,
            cols: self.cols,
            max_history_lines: self.max_history_lines,
            max_sessions: self.max_sessions,
        }
    }

    /// Idle timeout, if idle collection is enabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }
}

fn parse(content: &str) -> PtyHubResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| PtyHubError::Config(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let cfg = ServerConfig::load(None, &CliOverrides::default()).unwrap();
        assert_eq!(cfg.rows, 24);
        assert_eq!(cfg.cols, 80);
        assert_eq!(cfg.max_history_lines, 1000);
        assert_eq!(cfg.max_sessions, 100);
        assert_eq!(cfg.term, "xterm-256color");
        assert!(!cfg.shell.is_empty());
        assert!(cfg.idle_timeout().is_none());
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[terminal]
shell = "/bin/zsh"
term = "vt100"
rows = 30
cols = 120
max_history_lines = 50

[sessions]
max_sessions = 4
idle_timeout = 600
gc_interval = 15
"#;
        let cfg = ServerConfig::merge(parse(toml_str).unwrap(), &CliOverrides::default());
        assert_eq!(cfg.shell, "/bin/zsh");
        assert_eq!(cfg.term, "vt100");
        assert_eq!((cfg.rows, cfg.cols), (30, 120));
        assert_eq!(cfg.max_history_lines, 50);
        assert_eq!(cfg.max_sessions, 4);
        assert_eq!(cfg.idle_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(cfg.gc_interval, 15);
    }

    #[test]
    fn parse_partial_toml_config() {
        let toml_str = r#"
[terminal]
max_history_lines = 200
"#;
        let file = parse(toml_str).unwrap();
        assert_eq!(file.terminal.max_history_lines, 200);
        assert_eq!(file.terminal.rows, 24); // default
        assert_eq!(file.sessions.max_sessions, 100); // default
        assert!(file.terminal.shell.is_none());
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let err = parse("[terminal]\nrows = \"lots\"").unwrap_err();
        assert!(matches!(err, PtyHubError::Config(_)));
    }

    #[test]
    fn cli_overrides_file() {
        let file = parse("[terminal]\nshell = \"/bin/zsh\"\nmax_history_lines = 5").unwrap();
        let cli = CliOverrides {
            shell: Some("/bin/sh".into()),
            max_history_lines: Some(7),
            max_sessions: Some(2),
            idle_timeout: Some(30),
        };
        let cfg = ServerConfig::merge(file, &cli);
        assert_eq!(cfg.shell, "/bin/sh");
        assert_eq!(cfg.max_history_lines, 7);
        assert_eq!(cfg.max_sessions, 2);
        assert_eq!(cfg.idle_timeout, 30);
    }

    #[test]
    fn session_options_carry_geometry() {
        let file = parse("[terminal]\nrows = 30\ncols = 120\n").unwrap();
        let opts = ServerConfig::merge(file, &CliOverrides::default()).session_options();
        assert_eq!((opts.rows, opts.cols), (30, 120));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sessions]\nmax_sessions = 3").unwrap();
        let cfg = ServerConfig::load(Some(file.path()), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.max_sessions, 3);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let cfg = ServerConfig::load(Some(&path), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.max_history_lines, 1000);
    }

    #[test]
    fn tilde_expands_to_home() {
        let expanded = expand_tilde_str("~/.ptyhub/config.toml");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join(".ptyhub/config.toml"));
        }
        assert_eq!(expand_tilde_str("/etc/ptyhub.toml"), PathBuf::from("/etc/ptyhub.toml"));
    }
}
