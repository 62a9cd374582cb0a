//! Host definition and reload policy, both read from core units.
//!
//! `core/bot.lua` returns a [`HostDefinition`]; `core/reload.lua` returns a
//! [`ReloadPolicy`]. Missing fields take the defaults below, and a missing
//! unit means all defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::reply::ReplyShape;

/// Logical name of the core unit that defines the host.
pub const HOST_UNIT: &str = "bot";

/// Logical name of the core unit that defines the reload policy.
pub const POLICY_UNIT: &str = "reload";

/// Directory under the root that holds core units.
pub const CORE_DIR: &str = "core";

/// How the bot recognises commands and shapes replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostDefinition {
    /// Accept `nick: command` as well as the prefix.
    pub nick_addressing: bool,
    /// Run a command given a unique prefix of its name.
    pub prefix_matching: bool,
    /// Reply length cap in characters (0 = unlimited).
    pub max_reply_length: usize,
    /// Prefix channel replies with the sender's nick.
    pub reply_with_nick: bool,
}

impl Default for HostDefinition {
    fn default() -> Self {
        Self {
            nick_addressing: true,
            prefix_matching: true,
            max_reply_length: 400,
            reply_with_nick: true,
        }
    }
}

impl HostDefinition {
    /// Reply shape for a connection with the given censor list.
    #[must_use]
    pub fn reply_shape(&self, censored: &[String]) -> ReplyShape {
        ReplyShape {
            reply_with_nick: self.reply_with_nick,
            max_len: self.max_reply_length,
            censored: censored.to_vec(),
        }
    }
}

/// Where plugins live and how the reload pass reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadPolicy {
    /// Plugin directory, relative to the root.
    pub plugin_dir: String,
    /// Plugin file extension, without the dot.
    pub extension: String,
    /// Log the plugin listing after bootstrap.
    pub listing: bool,
}

impl Default for ReloadPolicy {
    fn default() -> Self {
        Self {
            plugin_dir: "plugins".to_string(),
            extension: "lua".to_string(),
            listing: true,
        }
    }
}

impl ReloadPolicy {
    /// Absolute plugin directory under `root`.
    #[must_use]
    pub fn plugin_path(&self, root: &Path) -> PathBuf {
        root.join(&self.plugin_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_definition_uses_defaults() {
        let def: HostDefinition =
            serde_json::from_str(r#"{"max_reply_length": 120}"#).expect("should parse");
        assert_eq!(def.max_reply_length, 120);
        assert!(def.nick_addressing);
        assert!(def.reply_with_nick);
    }

    #[test]
    fn test_reply_shape_follows_definition() {
        let def = HostDefinition {
            reply_with_nick: false,
            max_reply_length: 10,
            ..HostDefinition::default()
        };
        let shape = def.reply_shape(&["secret".to_string()]);
        assert!(!shape.reply_with_nick);
        assert_eq!(shape.max_len, 10);
        assert_eq!(shape.censored, vec!["secret".to_string()]);
    }

    #[test]
    fn test_policy_plugin_path() {
        let policy = ReloadPolicy {
            plugin_dir: "extra".to_string(),
            ..ReloadPolicy::default()
        };
        assert_eq!(policy.plugin_path(Path::new("/bot")), PathBuf::from("/bot/extra"));
    }
}
