//! Plugin records: one declared behavior each.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use regex::Regex;

use super::input::Input;
use crate::unit::Unit;

/// Process-unique identity of a handler.
///
/// Aliases declared in one `hook.command` call share a handler and
/// therefore an id; every load of a unit mints fresh ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Allocate the next id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Something a record can call.
pub trait Invoke: Send + Sync {
    /// Run the handler. `Ok(None)` means "nothing to say".
    fn invoke(&self, input: &Input) -> Result<Option<String>>;
}

impl<F> Invoke for F
where
    F: Fn(&Input) -> Result<Option<String>> + Send + Sync,
{
    fn invoke(&self, input: &Input) -> Result<Option<String>> {
        self(input)
    }
}

/// An invocable capability plus the metadata used to describe it.
pub struct Handler {
    id: HandlerId,
    signature: String,
    help: Option<String>,
    inner: Box<dyn Invoke>,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl Handler {
    /// Wrap `inner` with a fresh id.
    pub fn new(
        signature: impl Into<String>,
        help: Option<String>,
        inner: impl Invoke + 'static,
    ) -> Self {
        Self {
            id: HandlerId::next(),
            signature: signature.into(),
            help,
            inner: Box::new(inner),
        }
    }

    /// Wrap a closure with a fresh id.
    pub fn from_fn<F>(signature: impl Into<String>, help: Option<String>, f: F) -> Self
    where
        F: Fn(&Input) -> Result<Option<String>> + Send + Sync + 'static,
    {
        Self::new(signature, help, f)
    }

    /// Identity of this handler.
    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// `file:label:ordinal`, used in listings and diagnostics.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Help text shown by autohelp.
    #[must_use]
    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }

    /// Call the handler.
    pub fn invoke(&self, input: &Input) -> Result<Option<String>> {
        self.inner.invoke(input)
    }
}

/// The kind of a behavior, used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginKind {
    /// Triggered by a prefixed command.
    Command,
    /// Triggered by protocol events.
    Event,
    /// Triggered by a regex match on message text.
    Pattern,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Event => write!(f, "event"),
            Self::Pattern => write!(f, "pattern"),
        }
    }
}

/// Kind-specific metadata.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// A named command.
    Command {
        /// Name as declared (validated and lower-cased on rebuild).
        name: String,
        /// Reply with help text when invoked without arguments.
        autohelp: bool,
    },
    /// Listener for protocol events (`*` matches every event).
    Event {
        /// Event names.
        events: Vec<String>,
    },
    /// Regex matched against message text.
    Pattern {
        /// Compiled pattern.
        regex: Regex,
    },
}

impl Behavior {
    /// The registry key for this behavior.
    #[must_use]
    pub fn kind(&self) -> PluginKind {
        match self {
            Self::Command { .. } => PluginKind::Command,
            Self::Event { .. } => PluginKind::Event,
            Self::Pattern { .. } => PluginKind::Pattern,
        }
    }

    /// Short description for listings: name, event list or pattern.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Command { name, .. } => name.clone(),
            Self::Event { events } => events.join(", "),
            Self::Pattern { regex } => regex.as_str().to_string(),
        }
    }
}

/// One declared behavior bound to the unit that declared it.
///
/// Immutable: reloading a unit produces new records.
#[derive(Debug, Clone)]
pub struct PluginRecord {
    /// Shared handler (aliases point at the same one).
    pub handler: Arc<Handler>,
    /// What triggers it.
    pub behavior: Behavior,
    /// Defining unit (back-reference only).
    pub unit: Unit,
    /// Whether the handler runs on a dedicated worker thread.
    pub threaded: bool,
    /// Name of the configured API key passed to the handler.
    pub api_key: Option<String>,
}

impl PluginRecord {
    /// Registry key.
    #[must_use]
    pub fn kind(&self) -> PluginKind {
        self.behavior.kind()
    }

    /// Whether two records denote the same behavior source.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        self.handler.id() == other.handler.id() && self.unit.path == other.unit.path
    }

    /// Signature of the handler.
    #[must_use]
    pub fn signature(&self) -> &str {
        self.handler.signature()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitKind;

    fn record(name: &str) -> PluginRecord {
        PluginRecord {
            handler: Arc::new(Handler::from_fn(format!("a.lua:{name}:1"), None, |_| {
                Ok(Some("pong".to_string()))
            })),
            behavior: Behavior::Command {
                name: name.to_string(),
                autohelp: true,
            },
            unit: Unit::new("/plugins/a.lua", UnitKind::Plugin),
            threaded: false,
            api_key: None,
        }
    }

    #[test]
    fn test_handler_ids_are_unique() {
        assert_ne!(HandlerId::next(), HandlerId::next());
    }

    #[test]
    fn test_closure_handler_invokes() {
        let rec = record("ping");
        let out = rec.handler.invoke(&Input::default()).expect("invoke");
        assert_eq!(out.as_deref(), Some("pong"));
        assert_eq!(rec.kind(), PluginKind::Command);
    }

    #[test]
    fn test_identity_is_handler_and_unit() {
        let a = record("ping");
        let alias = PluginRecord {
            behavior: Behavior::Command {
                name: "p".to_string(),
                autohelp: true,
            },
            ..a.clone()
        };
        let other = record("ping");
        assert!(a.same_identity(&alias));
        assert!(!a.same_identity(&other));
    }

    #[test]
    fn test_describe_pattern() {
        let behavior = Behavior::Pattern {
            regex: Regex::new(r"id=(\d+)").expect("regex"),
        };
        assert_eq!(behavior.describe(), r"id=(\d+)");
        assert_eq!(behavior.kind().to_string(), "pattern");
    }
}
