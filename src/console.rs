//! Stdin/stdout adapter for running the bot from a terminal.
//!
//! The first connection created through [`ConsoleProvider`] is bound to
//! standard input: each line is parsed as a protocol line
//! (`:nick!user@host PRIVMSG #chan :text`) or, failing that, treated as a
//! message from `console` to the connection's first channel. Responses are
//! printed by the main loop.

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionProvider, Event, EventQueue};

/// Nick used for plain lines typed at the console.
pub const CONSOLE_NICK: &str = "console";

/// Channel used when the connection has none configured.
const FALLBACK_CHANNEL: &str = "#console";

/// Provider that feeds standard input into one connection.
#[derive(Debug, Default)]
pub struct ConsoleProvider {
    claimed: AtomicBool,
}

impl ConsoleProvider {
    /// Create a provider whose stdin is still unclaimed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConnectionProvider for ConsoleProvider {
    fn connect(&self, name: &str, conf: &ConnectionConfig) -> Result<Connection> {
        let conn = Connection::new(name, conf.clone());

        if !self.claimed.swap(true, Ordering::SeqCst) {
            let inbound = Arc::clone(conn.inbound());
            let channel = conf
                .channels
                .first()
                .cloned()
                .unwrap_or_else(|| FALLBACK_CHANNEL.to_string());

            thread::Builder::new()
                .name("console-stdin".to_string())
                .spawn(move || read_stdin(&inbound, &channel))
                .context("Failed to spawn console reader")?;
            log::info!("Console attached to connection `{name}`");
        }

        Ok(conn)
    }
}

/// Turn one console line into an event.
///
/// Returns `None` for blank lines.
#[must_use]
pub fn line_to_event(line: &str, channel: &str) -> Option<Event> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    if line.starts_with(':') {
        if let Some(event) = Event::parse_line(line) {
            return Some(event);
        }
    }
    Some(Event::privmsg(CONSOLE_NICK, channel, line))
}

fn read_stdin(inbound: &EventQueue, channel: &str) {
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::warn!("Console input error: {e}");
                break;
            }
        };
        if let Some(event) = line_to_event(&line, channel) {
            if let Ok(mut queue) = inbound.lock() {
                queue.push_back(event);
            }
        }
    }
    log::debug!("Console input closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line_becomes_privmsg() {
        let event = line_to_event(".ping\n", "#test").expect("event");
        assert_eq!(event.command, "PRIVMSG");
        assert_eq!(event.params, vec!["#test", ".ping"]);
        assert_eq!(event.prefix.expect("prefix").nick, CONSOLE_NICK);
    }

    #[test]
    fn test_protocol_line_is_parsed() {
        let event = line_to_event(":bob!b@h JOIN #rust", "#test").expect("event");
        assert_eq!(event.command, "JOIN");
        assert_eq!(event.prefix.expect("prefix").nick, "bob");
    }

    #[test]
    fn test_blank_line_ignored() {
        assert!(line_to_event("   \n", "#test").is_none());
    }
}
