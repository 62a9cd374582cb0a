//! Bot configuration loading.
//!
//! The configuration is a JSON file (by default `config.json` in the units
//! root). [`ConfigSource`] re-reads it whenever its modification time
//! changes so that operators can add networks or adjust settings without a
//! restart. A default file is written on first run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default contents written when no config file exists.
const DEFAULT_CONFIG: &str = r##"{
  "connections": {
    "local irc": {
      "server": "localhost",
      "nick": "plugster",
      "channels": ["#test"]
    }
  },
  "prefix": ".",
  "disabled_plugins": [],
  "disabled_commands": [],
  "api_keys": {},
  "censored_strings": [
    "DCC SEND",
    "\\0",
    "\\x01"
  ]
}
"##;

/// Settings for a single network connection.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server host name.
    #[serde(default)]
    pub server: String,
    /// Nickname the bot uses on this network.
    #[serde(default)]
    pub nick: String,
    /// Channels to join.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Whether to use TLS.
    #[serde(default)]
    pub ssl: bool,
    /// Strings replaced with `[censored]` in outgoing text. Inherits the
    /// global list when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub censored_strings: Option<Vec<String>>,
}

/// Top-level bot configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    /// Configured connections by name.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    /// Command prefix characters (any one of them triggers a command).
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Plugin units (logical names) whose behaviors are not dispatched.
    #[serde(default)]
    pub disabled_plugins: Vec<String>,
    /// Command names that are not dispatched.
    #[serde(default)]
    pub disabled_commands: Vec<String>,
    /// API keys by name, handed to plugins that ask for them.
    #[serde(default)]
    pub api_keys: BTreeMap<String, serde_json::Value>,
    /// Global censor list.
    #[serde(default)]
    pub censored_strings: Vec<String>,
}

fn default_prefix() -> String {
    ".".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connections: BTreeMap::new(),
            prefix: default_prefix(),
            disabled_plugins: Vec::new(),
            disabled_commands: Vec::new(),
            api_keys: BTreeMap::new(),
            censored_strings: Vec::new(),
        }
    }
}

impl Config {
    /// Parse a config document and apply inherited defaults.
    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(content).context("malformed config")?;
        config.apply_inheritance();
        Ok(config)
    }

    /// Give every connection without its own censor list the global one.
    fn apply_inheritance(&mut self) {
        for conn in self.connections.values_mut() {
            if conn.censored_strings.is_none() {
                conn.censored_strings = Some(self.censored_strings.clone());
            }
        }
    }

    /// Whether a plugin unit is disabled.
    #[must_use]
    pub fn is_plugin_disabled(&self, unit_name: &str) -> bool {
        self.disabled_plugins.iter().any(|p| p == unit_name)
    }

    /// Whether a command is disabled (case-insensitive).
    #[must_use]
    pub fn is_command_disabled(&self, name: &str) -> bool {
        self.disabled_commands
            .iter()
            .any(|c| c.eq_ignore_ascii_case(name))
    }
}

/// A config file on disk, re-read when it changes.
#[derive(Debug)]
pub struct ConfigSource {
    path: PathBuf,
    mtime: Option<SystemTime>,
}

impl ConfigSource {
    /// Track the config file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mtime: None,
        }
    }

    /// Resolve the config path inside `root`.
    ///
    /// Prefers a legacy extension-less `config` file when present.
    pub fn find(root: &Path) -> PathBuf {
        let legacy = root.join("config");
        if legacy.is_file() {
            return legacy;
        }
        root.join("config.json")
    }

    /// Path of the tracked file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the new config if the file changed since the last call.
    ///
    /// Writes the default config when the file does not exist. A malformed
    /// file is an error and is retried on the next change; the mtime is only
    /// recorded after a successful parse.
    pub fn load_if_changed(&mut self) -> Result<Option<Config>> {
        if !self.path.exists() {
            fs::write(&self.path, DEFAULT_CONFIG).with_context(|| {
                format!("Failed to write default config: {}", self.path.display())
            })?;
            log::info!("Wrote default config to {}", self.path.display());
        }

        let mtime = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat config: {}", self.path.display()))?;

        if self.mtime == Some(mtime) {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config: {}", self.path.display()))?;
        let config = Config::from_json(&content)
            .with_context(|| format!("Failed to parse config: {}", self.path.display()))?;

        self.mtime = Some(mtime);
        Ok(Some(config))
    }
}
