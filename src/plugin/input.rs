//! The argument handed to every plugin handler.

use serde::Serialize;

use crate::connection::Event;

/// Everything a handler may want to know about the event that triggered it.
///
/// Serialized into a Lua table for script handlers.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Input {
    /// Connection name.
    pub conn: String,
    /// Bot's own nick on this connection.
    pub me: String,
    /// Sender nick (empty for server events).
    pub nick: String,
    /// Sender user.
    pub user: String,
    /// Sender host.
    pub host: String,
    /// Protocol verb.
    pub command: String,
    /// Raw parameters.
    pub params: Vec<String>,
    /// Where replies go: the channel, or the sender for private messages.
    pub chan: String,
    /// Message text (last parameter).
    pub msg: String,
    /// Command arguments, or the full text for pattern handlers.
    pub inp: String,
    /// Command name or pattern that fired.
    pub trigger: String,
    /// Pattern capture groups (index 0 is the whole match).
    pub groups: Vec<Option<String>>,
    /// Configured API key, when the behavior asked for one.
    pub api_key: Option<serde_json::Value>,
}

impl Input {
    /// Build the base input for `event` on connection `conn`.
    pub fn from_event(conn: &str, me: &str, event: &Event) -> Self {
        let prefix = event.prefix.clone().unwrap_or_default();
        let msg = event.params.last().cloned().unwrap_or_default();
        let target = event.params.first().cloned().unwrap_or_default();

        // Replies to a private message go back to the sender.
        let chan = if !me.is_empty() && target.eq_ignore_ascii_case(me) {
            prefix.nick.clone()
        } else {
            target
        };

        Self {
            conn: conn.to_string(),
            me: me.to_string(),
            nick: prefix.nick,
            user: prefix.user,
            host: prefix.host,
            command: event.command.clone(),
            params: event.params.clone(),
            chan,
            inp: msg.clone(),
            msg,
            ..Self::default()
        }
    }

    /// Whether replies go to a channel rather than a single user.
    #[must_use]
    pub fn is_channel(&self) -> bool {
        self.chan.starts_with(['#', '&', '!', '+'])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_message_replies_to_channel() {
        let event = Event::privmsg("alice", "#rust", ".ping");
        let input = Input::from_event("net", "bot", &event);
        assert_eq!(input.chan, "#rust");
        assert_eq!(input.msg, ".ping");
        assert!(input.is_channel());
    }

    #[test]
    fn test_private_message_replies_to_sender() {
        let event = Event::privmsg("alice", "Bot", "ping");
        let input = Input::from_event("net", "bot", &event);
        assert_eq!(input.chan, "alice");
        assert!(!input.is_channel());
    }
}
