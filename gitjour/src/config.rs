use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{DEFAULT_BROWSE_PORT, DEFAULT_GIT_PORT, DEFAULT_WEB_PORT};
use crate::registry::MembershipPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub serve: ServeConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub browse: BrowseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// How long lookups and listings wait for announcements
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Restrict mDNS to one interface; all interfaces when unset
    #[serde(default)]
    pub interface: Option<String>,
    /// How long `serve` and `web` browse for a taken name before announcing
    #[serde(default = "default_conflict_check_ms")]
    pub conflict_check_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServeConfig {
    /// Takes precedence over `git config gitjour.prefix` and `$USER`
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_git_port")]
    pub git_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_port")]
    pub port: u16,
    #[serde(default = "default_httpd")]
    pub httpd: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowseConfig {
    #[serde(default = "default_browse_port")]
    pub port: u16,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub membership: MembershipPolicy,
}

fn default_timeout() -> u64 {
    5
}

fn default_conflict_check_ms() -> u64 {
    1000
}

fn default_git_port() -> u16 {
    DEFAULT_GIT_PORT
}

fn default_web_port() -> u16 {
    DEFAULT_WEB_PORT
}

fn default_httpd() -> String {
    "webrick".to_string()
}

fn default_browse_port() -> u16 {
    DEFAULT_BROWSE_PORT
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            interface: None,
            conflict_check_ms: default_conflict_check_ms(),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            git_port: default_git_port(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_web_port(),
            httpd: default_httpd(),
        }
    }
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            port: default_browse_port(),
            browser: None,
            membership: MembershipPolicy::default(),
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn conflict_check(&self) -> Duration {
        Duration::from_millis(self.conflict_check_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `path` if given, else the default location if it exists, else defaults.
    /// An explicitly named file must exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// `$XDG_CONFIG_HOME/gitjour/config.toml`, falling back to `~/.config`
pub fn default_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;

    Some(base.join("gitjour").join("config.toml"))
}
