//! Connections and their event/response queues.
//!
//! The wire protocol lives outside this crate. A [`ConnectionProvider`]
//! builds a [`Connection`] for each configured network; the protocol side
//! fills the inbound queue with parsed [`Event`]s and drains the outbound
//! queue of [`Response`]s. The control thread and plugin workers only ever
//! touch the queues.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::config::ConnectionConfig;

/// Source of an event (`nick!user@host`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefix {
    /// Nickname.
    pub nick: String,
    /// Username.
    pub user: String,
    /// Hostname.
    pub host: String,
}

/// One inbound event from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Sender, absent for server-originated events.
    pub prefix: Option<Prefix>,
    /// Protocol verb (`PRIVMSG`, `JOIN`, `004`, ...), upper-cased.
    pub command: String,
    /// Parameters; the trailing parameter is last.
    pub params: Vec<String>,
}

impl Event {
    /// Convenience constructor for a channel or private message.
    pub fn privmsg(nick: &str, target: &str, text: &str) -> Self {
        Self {
            prefix: Some(Prefix {
                nick: nick.to_string(),
                user: nick.to_string(),
                host: "localhost".to_string(),
            }),
            command: "PRIVMSG".to_string(),
            params: vec![target.to_string(), text.to_string()],
        }
    }

    /// Parse an IRC-style line (`:nick!user@host VERB a b :trailing`).
    ///
    /// Returns `None` for empty lines. This is the minimal parser used by
    /// the console adapter; real protocol handling belongs to the provider.
    pub fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut rest = line.trim_start();
        if rest.is_empty() {
            return None;
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (raw, tail) = stripped.split_once(' ').unwrap_or((stripped, ""));
            rest = tail.trim_start();
            Some(Self::parse_prefix(raw))
        } else {
            None
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };

        let mut words = head.split_whitespace();
        let command = words.next()?.to_ascii_uppercase();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self { prefix, command, params })
    }

    fn parse_prefix(raw: &str) -> Prefix {
        let (nick, rest) = raw.split_once('!').unwrap_or((raw, ""));
        let (user, host) = rest.split_once('@').unwrap_or((rest, ""));
        Prefix {
            nick: nick.to_string(),
            user: user.to_string(),
            host: host.to_string(),
        }
    }
}

/// One outbound message produced by a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Channel or nick to deliver to.
    pub target: String,
    /// Message text, already shaped (censored, truncated, single line).
    pub text: String,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PRIVMSG {} :{}", self.target, self.text)
    }
}

/// Thread-safe queue of inbound events (filled by the protocol side).
pub type EventQueue = Arc<Mutex<VecDeque<Event>>>;

/// Thread-safe unbounded queue of outbound responses.
///
/// The only structure written by both plugin workers and the control thread.
pub type OutboundQueue = Arc<Mutex<VecDeque<Response>>>;

/// Create an empty inbound queue.
#[must_use]
pub fn new_event_queue() -> EventQueue {
    Arc::new(Mutex::new(VecDeque::new()))
}

/// Create an empty outbound queue.
#[must_use]
pub fn new_outbound_queue() -> OutboundQueue {
    Arc::new(Mutex::new(VecDeque::new()))
}

/// Push a response, tolerating a poisoned lock.
///
/// A worker that panicked mid-push must not take the queue down for
/// everyone else.
pub fn push_response(queue: &OutboundQueue, response: Response) {
    let mut guard = queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    guard.push_back(response);
}

/// A live connection as seen by the host.
pub struct Connection {
    name: String,
    conf: ConnectionConfig,
    inbound: EventQueue,
    outbound: OutboundQueue,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inbound = self.inbound.lock().map(|q| q.len()).unwrap_or(0);
        let outbound = self.outbound.lock().map(|q| q.len()).unwrap_or(0);
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("server", &self.conf.server)
            .field("nick", &self.conf.nick)
            .field("inbound_len", &inbound)
            .field("outbound_len", &outbound)
            .finish()
    }
}

impl Connection {
    /// Create a connection with fresh queues.
    pub fn new(name: impl Into<String>, conf: ConnectionConfig) -> Self {
        Self::with_queues(name, conf, new_event_queue(), new_outbound_queue())
    }

    /// Create a connection around queues owned by a protocol adapter.
    pub fn with_queues(
        name: impl Into<String>,
        conf: ConnectionConfig,
        inbound: EventQueue,
        outbound: OutboundQueue,
    ) -> Self {
        Self {
            name: name.into(),
            conf,
            inbound,
            outbound,
        }
    }

    /// Configured name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current configuration.
    #[must_use]
    pub fn conf(&self) -> &ConnectionConfig {
        &self.conf
    }

    /// Replace the configuration after a config reload.
    pub fn set_conf(&mut self, conf: ConnectionConfig) {
        self.conf = conf;
    }

    /// Handle to the inbound queue.
    #[must_use]
    pub fn inbound(&self) -> &EventQueue {
        &self.inbound
    }

    /// Handle to the outbound queue.
    #[must_use]
    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    /// Pop one pending event without blocking.
    pub fn try_next_event(&self) -> Option<Event> {
        self.inbound.lock().ok().and_then(|mut q| q.pop_front())
    }

    /// Whether the inbound queue holds work.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.inbound.lock().map(|q| !q.is_empty()).unwrap_or(false)
    }

    /// Queue an inbound event (used by adapters and tests).
    pub fn push_event(&self, event: Event) {
        if let Ok(mut q) = self.inbound.lock() {
            q.push_back(event);
        }
    }

    /// Drain every queued response.
    pub fn drain_responses(&self) -> Vec<Response> {
        self.outbound
            .lock()
            .map(|mut q| q.drain(..).collect())
            .unwrap_or_default()
    }
}

/// Builds connections for configured networks.
pub trait ConnectionProvider: Send + Sync {
    /// Open (or prepare) the connection called `name`.
    fn connect(&self, name: &str, conf: &ConnectionConfig) -> Result<Connection>;
}

/// Provider that only creates queues; the embedding program wires I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueueProvider;

impl ConnectionProvider for QueueProvider {
    fn connect(&self, name: &str, conf: &ConnectionConfig) -> Result<Connection> {
        Ok(Connection::new(name, conf.clone()))
    }
}
