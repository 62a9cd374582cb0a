//! Dispatch tables derived from the registry.
//!
//! Tables are built in full by [`Registry::rebuild`](super::Registry::rebuild)
//! and published behind an `Arc`; nothing mutates a table after it is built.

use std::collections::{BTreeMap, HashMap};

use super::record::PluginRecord;
use crate::error::ValidationError;

/// Read-only routing indices.
#[derive(Debug, Default, Clone)]
pub struct DispatchTables {
    pub(super) commands: BTreeMap<String, PluginRecord>,
    pub(super) events: HashMap<String, Vec<PluginRecord>>,
    pub(super) patterns: Vec<PluginRecord>,
    pub(super) diagnostics: Vec<ValidationError>,
}

impl DispatchTables {
    /// Look up a command by name (case-insensitive).
    #[must_use]
    pub fn command(&self, name: &str) -> Option<&PluginRecord> {
        self.commands.get(&name.to_lowercase())
    }

    /// All commands, sorted by name.
    pub fn commands(&self) -> impl Iterator<Item = (&str, &PluginRecord)> {
        self.commands.iter().map(|(name, record)| (name.as_str(), record))
    }

    /// Number of commands.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Command names starting with `prefix` (lower-cased), sorted.
    #[must_use]
    pub fn commands_with_prefix(&self, prefix: &str) -> Vec<&str> {
        let prefix = prefix.to_lowercase();
        self.commands
            .range(prefix.clone()..)
            .take_while(|(name, _)| name.starts_with(&prefix))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Listeners for `event`, in registration order. Empty when none.
    #[must_use]
    pub fn listeners(&self, event: &str) -> &[PluginRecord] {
        self.events.get(event).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Event names with at least one listener.
    #[must_use]
    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.events.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Pattern records in registration order.
    #[must_use]
    pub fn patterns(&self) -> &[PluginRecord] {
        &self.patterns
    }

    /// Problems found while building these tables.
    #[must_use]
    pub fn diagnostics(&self) -> &[ValidationError] {
        &self.diagnostics
    }
}
