//! Chat relay configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/chatrelay/chatrelay.toml`
//! - Windows: `%APPDATA%/chatrelay/chatrelay.toml`
//!
//! Command-line flags override every field.

use std::path::{Path, PathBuf};

use chatrelay_protocol::constants::{DEFAULT_BUFFER_SIZE, DEFAULT_PORT};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Display name used by `chatrelay client` (hostname by default).
    #[serde(default = "default_name")]
    pub name: String,

    /// Server address the client dials.
    #[serde(default = "default_address")]
    pub address: String,

    /// Server port, for both subcommands.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-connection read buffer size.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

/// Hostname reduced to the characters a display name may contain.
fn default_name() -> String {
    let name: String = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect();
    if name.trim().is_empty() {
        "Guest".into()
    } else {
        name
    }
}

fn default_address() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            address: default_address(),
            port: default_port(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Config {
    /// Loads the per-user configuration, creating it with defaults if missing.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads configuration from `path`, creating it with defaults if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Writes the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("chatrelay")
            .join("chatrelay.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("chatrelay").join("chatrelay.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/chatrelay/chatrelay.toml"))
    }
}
