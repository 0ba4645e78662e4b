//! Bridge configuration
//!
//! Everything the core needs is passed in explicitly as a [`BridgeConfig`] value.
//! Missing fields in a config file fall back to the defaults below.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{BridgeError, BridgeResult};
use crate::origin::DEFAULT_ALLOWED_HOSTS;
use crate::pty::TerminalSize;

pub const DEFAULT_PORT_RANGE_START: u16 = 62400;
pub const DEFAULT_PORT_RANGE_END: u16 = 62499;

/// A single environment variable applied on top of the inherited environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl FromStr for EnvVar {
    type Err = BridgeError;

    /// Parses `NAME=VALUE`. The value may itself contain `=`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok(Self {
                name: name.to_string(),
                value: value.to_string(),
            }),
            _ => Err(BridgeError::Config(format!(
                "expected NAME=VALUE, got {:?}",
                s
            ))),
        }
    }
}

/// Shell command launched inside the PTY
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Executable to run
    pub path: String,
    /// Arguments passed to the executable
    pub args: Vec<String>,
    /// Variables overlaid on the caller's environment
    pub env: Vec<EnvVar>,
    /// Working directory (default: $HOME)
    pub working_dir: Option<PathBuf>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        let (path, args) = default_shell();
        Self {
            path,
            args,
            env: vec![
                EnvVar {
                    name: "TERM".to_string(),
                    value: "xterm-256color".to_string(),
                },
                EnvVar {
                    name: "LC_CTYPE".to_string(),
                    value: "UTF-8".to_string(),
                },
            ],
            working_dir: None,
        }
    }
}

impl ShellConfig {
    /// Resolve the directory the shell starts in.
    pub fn resolve_working_dir(&self) -> PathBuf {
        if let Some(dir) = &self.working_dir {
            return dir.clone();
        }
        std::env::var_os("HOME")
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"))
    }

    /// Set or replace an overlay variable, keeping the original order.
    pub fn set_env(&mut self, var: EnvVar) {
        match self.env.iter_mut().find(|existing| existing.name == var.name) {
            Some(existing) => existing.value = var.value,
            None => self.env.push(var),
        }
    }
}

#[cfg(target_os = "macos")]
fn default_shell() -> (String, Vec<String>) {
    (
        "/usr/bin/env".to_string(),
        vec!["/bin/zsh".to_string(), "--login".to_string()],
    )
}

#[cfg(not(target_os = "macos"))]
fn default_shell() -> (String, Vec<String>) {
    for candidate in ["/bin/bash", "/usr/bin/bash"] {
        if Path::new(candidate).exists() {
            return (candidate.to_string(), Vec::new());
        }
    }
    ("/bin/sh".to_string(), Vec::new())
}

/// Inclusive range of loopback ports to try, in ascending order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> BridgeResult<Self> {
        if start == 0 || start > end {
            return Err(BridgeError::Config(format!(
                "invalid port range {}-{}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: DEFAULT_PORT_RANGE_START,
            end: DEFAULT_PORT_RANGE_END,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for PortRange {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BridgeError::Config(format!("expected START-END, got {:?}", s));
        let (start, end) = s.split_once('-').ok_or_else(invalid)?;
        let start = start.trim().parse::<u16>().map_err(|_| invalid())?;
        let end = end.trim().parse::<u16>().map_err(|_| invalid())?;
        Self::new(start, end)
    }
}

/// Full configuration for one bridge session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub shell: ShellConfig,
    pub port_range: PortRange,
    pub initial_size: TerminalSize,
    /// Hosts accepted in the WebSocket handshake `Origin` header
    pub allowed_origins: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            shell: ShellConfig::default(),
            port_range: PortRange::default(),
            initial_size: TerminalSize::default(),
            allowed_origins: DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

impl BridgeConfig {
    /// Load a JSON config file; absent fields keep their defaults.
    pub fn from_json_file(path: &Path) -> BridgeResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("reading {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            BridgeError::Config(format!("parsing {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        PortRange::new(self.port_range.start, self.port_range.end)?;
        if self.shell.path.is_empty() {
            return Err(BridgeError::Config("shell path is empty".to_string()));
        }
        if self.allowed_origins.is_empty() {
            return Err(BridgeError::Config(
                "at least one allowed origin host is required".to_string(),
            ));
        }
        Ok(())
    }
}
