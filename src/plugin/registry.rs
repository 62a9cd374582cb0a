//! The live catalog of plugin records.
//!
//! Owned by the control thread and mutated only by reload passes, so no
//! locking is needed. Every mutation that removes a record also stops the
//! worker bound to its handler.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::record::{Behavior, HandlerId, PluginKind, PluginRecord};
use super::tables::DispatchTables;
use crate::error::ValidationError;
use crate::unit::Unit;
use crate::worker::WorkerSupervisor;

/// Valid command names.
static COMMAND_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w+$").expect("command name pattern is valid"));

/// Records grouped by kind, each group in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    plugs: BTreeMap<PluginKind, Vec<PluginRecord>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything `unit` declared with `records`.
    ///
    /// Existing records of the unit are removed first (stopping their
    /// workers), so a unit that dropped or renamed behaviors leaves nothing
    /// stale behind. Workers are started for new threaded handlers.
    /// Records that claim a different unit are skipped.
    pub fn register_unit(
        &mut self,
        unit: &Unit,
        records: Vec<PluginRecord>,
        workers: &mut WorkerSupervisor,
    ) -> usize {
        self.unregister_unit(&unit.path, workers);

        let mut added = 0;
        for record in records {
            if record.unit.path != unit.path {
                log::warn!(
                    "Skipping record {} claimed by {} while registering {}",
                    record.signature(),
                    record.unit.path.display(),
                    unit
                );
                continue;
            }

            if let Err(e) = workers.start(&record) {
                log::error!("{e}");
            }
            self.plugs.entry(record.kind()).or_default().push(record);
            added += 1;
        }

        log::debug!("Registered {} record(s) from {}", added, unit);
        added
    }

    /// Remove every record declared by the unit at `path`.
    ///
    /// Returns the number of records removed.
    pub fn unregister_unit(&mut self, path: &Path, workers: &mut WorkerSupervisor) -> usize {
        self.remove_where(|record| record.unit.path == path, workers)
    }

    /// Remove records whose unit is no longer in `current`.
    ///
    /// Catches deleted and renamed files, which change detection cannot
    /// report because they are no longer scanned.
    pub fn prune_missing(
        &mut self,
        current: &BTreeSet<PathBuf>,
        workers: &mut WorkerSupervisor,
    ) -> usize {
        let removed = self.remove_where(|record| !current.contains(&record.unit.path), workers);
        if removed > 0 {
            log::info!("Pruned {} record(s) from removed plugin files", removed);
        }
        removed
    }

    fn remove_where<F>(&mut self, mut doomed: F, workers: &mut WorkerSupervisor) -> usize
    where
        F: FnMut(&PluginRecord) -> bool,
    {
        let mut stopped: BTreeSet<HandlerId> = BTreeSet::new();
        let mut removed = 0;

        for records in self.plugs.values_mut() {
            records.retain(|record| {
                if doomed(record) {
                    if record.threaded {
                        stopped.insert(record.handler.id());
                    }
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.plugs.retain(|_, records| !records.is_empty());

        for id in stopped {
            workers.stop_logged(id);
        }
        removed
    }

    /// Derive fresh dispatch tables.
    ///
    /// Command names are lower-cased; invalid and duplicate names are
    /// dropped and reported in [`DispatchTables::diagnostics`]. The first
    /// registration of a name wins.
    #[must_use]
    pub fn rebuild(&self) -> DispatchTables {
        let mut tables = DispatchTables::default();

        for record in self.records(PluginKind::Command) {
            let Behavior::Command { name, .. } = &record.behavior else {
                continue;
            };
            let name = name.to_lowercase();

            if !COMMAND_NAME.is_match(&name) {
                tables.diagnostics.push(ValidationError::InvalidCommandName {
                    name,
                    signature: record.signature().to_string(),
                });
                continue;
            }

            if let Some(existing) = tables.commands.get(&name) {
                tables.diagnostics.push(ValidationError::DuplicateCommand {
                    existing: existing.signature().to_string(),
                    rejected: record.signature().to_string(),
                    name,
                });
                continue;
            }

            tables.commands.insert(name, record.clone());
        }

        let mut events: HashMap<String, Vec<PluginRecord>> = HashMap::new();
        for record in self.records(PluginKind::Event) {
            if let Behavior::Event { events: names } = &record.behavior {
                for name in names {
                    events.entry(name.clone()).or_default().push(record.clone());
                }
            }
        }
        tables.events = events;

        tables.patterns = self.records(PluginKind::Pattern).to_vec();
        tables
    }

    /// Records of one kind, in registration order.
    #[must_use]
    pub fn records(&self, kind: PluginKind) -> &[PluginRecord] {
        self.plugs.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Kinds that currently have records, in a stable order.
    pub fn kinds(&self) -> impl Iterator<Item = PluginKind> + '_ {
        self.plugs.keys().copied()
    }

    /// Every record, grouped by kind.
    pub fn iter(&self) -> impl Iterator<Item = &PluginRecord> {
        self.plugs.values().flatten()
    }

    /// Records declared by the unit at `path`.
    #[must_use]
    pub fn records_for_unit(&self, path: &Path) -> Vec<&PluginRecord> {
        self.iter().filter(|r| r.unit.path == path).collect()
    }

    /// Paths of units that currently have records.
    #[must_use]
    pub fn unit_paths(&self) -> BTreeSet<PathBuf> {
        self.iter().map(|r| r.unit.path.clone()).collect()
    }

    /// Total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugs.values().map(Vec::len).sum()
    }

    /// Whether the registry holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugs.is_empty()
    }
}
