//! Turning handler output into outbound responses.

use crate::connection::Response;
use crate::plugin::Input;

/// Replacement for censored substrings.
pub const CENSORED: &str = "[censored]";

/// How handler output is shaped before it is queued.
///
/// Cloned into every job handed to a worker thread, so a config change
/// only affects jobs dispatched after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyShape {
    /// Prefix channel replies with `nick: `.
    pub reply_with_nick: bool,
    /// Maximum reply length in characters (0 = unlimited).
    pub max_len: usize,
    /// Substrings replaced with [`CENSORED`].
    pub censored: Vec<String>,
}

impl Default for ReplyShape {
    fn default() -> Self {
        Self {
            reply_with_nick: true,
            max_len: 400,
            censored: Vec::new(),
        }
    }
}

impl ReplyShape {
    /// Build the response for `text` produced in reaction to `input`.
    ///
    /// Returns `None` when nothing is left to say.
    #[must_use]
    pub fn shape(&self, input: &Input, text: &str) -> Option<Response> {
        let mut text = text.replace(['\r', '\n'], " ").trim().to_string();
        if text.is_empty() || input.chan.is_empty() {
            return None;
        }

        for needle in self.censored.iter().filter(|s| !s.is_empty()) {
            text = text.replace(needle.as_str(), CENSORED);
        }

        if self.reply_with_nick && input.is_channel() && !input.nick.is_empty() {
            text = format!("{}: {}", input.nick, text);
        }

        if self.max_len > 0 && text.chars().count() > self.max_len {
            text = text.chars().take(self.max_len).collect();
        }

        Some(Response {
            target: input.chan.clone(),
            text,
        })
    }
}
