//! Operator-facing plugin listing printed after bootstrap.

use std::collections::BTreeMap;

use super::record::PluginKind;
use super::registry::Registry;
use super::tables::DispatchTables;

/// Column where names, events or patterns start.
const COLUMN: usize = 50;

/// Render the listing as lines.
///
/// Commands are grouped by handler so aliases share a line, longest alias
/// first. Event and pattern handlers follow, one line per record.
#[must_use]
pub fn render(registry: &Registry, tables: &DispatchTables) -> Vec<String> {
    let mut lines = vec!["  plugin listing:".to_string()];

    if tables.command_count() > 0 {
        lines.push("    command:".to_string());

        let mut grouped: BTreeMap<(&str, _), Vec<&str>> = BTreeMap::new();
        for (name, record) in tables.commands() {
            grouped
                .entry((record.signature(), record.handler.id()))
                .or_default()
                .push(name);
        }

        for ((signature, _), mut names) in grouped {
            names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
            lines.push(format!(
                "{:<width$}{}",
                format!("      {signature}"),
                names.join(", "),
                width = COLUMN
            ));
        }
    }

    for kind in registry.kinds().filter(|k| *k != PluginKind::Command) {
        lines.push(format!("    {kind}:"));
        for record in registry.records(kind) {
            lines.push(format!(
                "{:<width$}{}",
                format!("      {}", record.signature()),
                record.behavior.describe(),
                width = COLUMN
            ));
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Behavior, Handler, PluginRecord};
    use crate::unit::{Unit, UnitKind};
    use crate::worker::WorkerSupervisor;
    use regex::Regex;
    use std::sync::Arc;

    #[test]
    fn test_aliases_sorted_longest_first() {
        let unit = Unit::new("/plugins/weather.lua", UnitKind::Plugin);
        let handler = Arc::new(Handler::from_fn("weather.lua:weather:1", None, |_| Ok(None)));
        let records: Vec<_> = ["w", "weather", "we", "wx"]
            .iter()
            .map(|name| PluginRecord {
                handler: Arc::clone(&handler),
                behavior: Behavior::Command {
                    name: (*name).to_string(),
                    autohelp: false,
                },
                unit: unit.clone(),
                threaded: false,
                api_key: None,
            })
            .collect();

        let mut registry = Registry::new();
        let mut workers = WorkerSupervisor::default();
        registry.register_unit(&unit, records, &mut workers);
        let lines = render(&registry, &registry.rebuild());

        assert_eq!(lines[0], "  plugin listing:");
        assert_eq!(lines[1], "    command:");
        assert!(lines[2].starts_with("      weather.lua:weather:1"));
        assert!(lines[2].ends_with("weather, we, wx, w"));
        assert_eq!(lines[2].find("weather, we").expect("names"), COLUMN);
    }

    #[test]
    fn test_event_and_pattern_sections() {
        let unit = Unit::new("/plugins/hn.lua", UnitKind::Plugin);
        let records = vec![
            PluginRecord {
                handler: Arc::new(Handler::from_fn("hn.lua:on_join:1", None, |_| Ok(None))),
                behavior: Behavior::Event {
                    events: vec!["JOIN".to_string(), "PART".to_string()],
                },
                unit: unit.clone(),
                threaded: false,
                api_key: None,
            },
            PluginRecord {
                handler: Arc::new(Handler::from_fn("hn.lua:hackernews:2", None, |_| Ok(None))),
                behavior: Behavior::Pattern {
                    regex: Regex::new(r"id=(\d+)").expect("regex"),
                },
                unit: unit.clone(),
                threaded: false,
                api_key: None,
            },
        ];

        let mut registry = Registry::new();
        let mut workers = WorkerSupervisor::default();
        registry.register_unit(&unit, records, &mut workers);
        let lines = render(&registry, &registry.rebuild());

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "    event:");
        assert!(lines[2].ends_with("JOIN, PART"));
        assert_eq!(lines[3], "    pattern:");
        assert!(lines[4].ends_with(r"id=(\d+)"));
    }
}
