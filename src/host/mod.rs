//! The live bot and the reload pass that keeps it current.
//!
//! # Architecture
//!
//! ```text
//! main loop
//!  ├── ReloadCoordinator::reload(bot) ──▶ Bot (same, or rebuilt from new host definition)
//!  ├── Bot::configure()                  (config file diff → connections)
//!  ├── Bot::dispatch_once()              (one event per connection)
//!  └── Bot::wait_for_drain(idle)         (bounded wait for more input)
//! ```
//!
//! A [`Bot`] owns everything that must survive a host reload: connections,
//! the registry, the worker supervisor, the published tables, the config
//! and the connection provider. [`Bot::rebuild_from`] moves all of it into
//! a new instance built from a fresh [`HostDefinition`].

pub mod definition;
pub mod dispatch;
pub mod reload;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

pub use definition::{HostDefinition, ReloadPolicy};
pub use dispatch::CommandMatcher;
pub use reload::ReloadCoordinator;

use crate::config::{Config, ConfigSource};
use crate::connection::{Connection, ConnectionProvider, Response};
use crate::plugin::{listing, DispatchTables, PluginRecord, Registry};
use crate::unit::Unit;
use crate::worker::WorkerSupervisor;
use dispatch::Dispatcher;

/// How often `wait_for_drain` re-checks the inbound queues.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// The running bot.
pub struct Bot {
    definition: HostDefinition,
    conns: BTreeMap<String, Connection>,
    plugs: Registry,
    threads: WorkerSupervisor,
    tables: Arc<DispatchTables>,
    config: Config,
    config_source: Option<ConfigSource>,
    provider: Arc<dyn ConnectionProvider>,
    matchers: HashMap<String, CommandMatcher>,
}

impl fmt::Debug for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bot")
            .field("definition", &self.definition)
            .field("connections", &self.conns.keys().collect::<Vec<_>>())
            .field("records", &self.plugs.len())
            .field("commands", &self.tables.command_count())
            .field("workers", &self.threads.len())
            .finish_non_exhaustive()
    }
}

impl Bot {
    /// Create a bot with the default host definition and no config file.
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            definition: HostDefinition::default(),
            conns: BTreeMap::new(),
            plugs: Registry::new(),
            threads: WorkerSupervisor::default(),
            tables: Arc::new(DispatchTables::default()),
            config: Config::default(),
            config_source: None,
            provider,
            matchers: HashMap::new(),
        }
    }

    /// Read configuration from `source` on every [`Bot::configure`] call.
    #[must_use]
    pub fn with_config_source(mut self, source: ConfigSource) -> Self {
        self.config_source = Some(source);
        self
    }

    /// Use `threads` as the worker supervisor (e.g. for a custom stop
    /// deadline). Must be called before any plugin is registered.
    #[must_use]
    pub fn with_workers(mut self, threads: WorkerSupervisor) -> Self {
        self.threads = threads;
        self
    }

    /// Build a new bot from `definition`, moving every piece of live state
    /// out of `old`.
    ///
    /// Connections keep their queues, workers keep running, and the
    /// registry and published tables are the same objects as before.
    #[must_use]
    pub fn rebuild_from(old: Bot, definition: HostDefinition) -> Self {
        log::info!(
            "Rebuilding bot: {} connection(s), {} record(s), {} worker(s) carried over",
            old.conns.len(),
            old.plugs.len(),
            old.threads.len()
        );

        let mut bot = Self {
            definition,
            conns: old.conns,
            plugs: old.plugs,
            threads: old.threads,
            tables: old.tables,
            config: old.config,
            config_source: old.config_source,
            provider: old.provider,
            matchers: HashMap::new(),
        };
        bot.refresh_matchers();
        bot
    }

    /// Re-read the config file if it changed and apply it.
    ///
    /// Returns whether a new config was applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written, read or parsed. The
    /// previous config stays in effect.
    pub fn configure(&mut self) -> Result<bool> {
        let Some(source) = self.config_source.as_mut() else {
            return Ok(false);
        };
        match source.load_if_changed()? {
            Some(config) => {
                log::info!("Loaded config from {}", source.path().display());
                self.apply_config(config);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply `config`: add, update and remove connections to match it.
    ///
    /// Registry state is left alone.
    pub fn apply_config(&mut self, config: Config) {
        let stale: Vec<String> = self
            .conns
            .keys()
            .filter(|name| !config.connections.contains_key(*name))
            .cloned()
            .collect();
        for name in stale {
            log::info!("Removing connection `{name}`");
            self.conns.remove(&name);
        }

        for (name, conf) in &config.connections {
            if let Some(conn) = self.conns.get_mut(name) {
                if conn.conf() != conf {
                    log::info!("Updating connection `{name}`");
                    conn.set_conf(conf.clone());
                }
                continue;
            }

            match self.provider.connect(name, conf) {
                Ok(conn) => {
                    log::info!("Added connection `{}` ({})", name, conf.server);
                    self.conns.insert(name.clone(), conn);
                }
                Err(e) => log::error!("Failed to connect `{}`: {:#}", name, e),
            }
        }

        self.config = config;
        self.refresh_matchers();
    }

    fn refresh_matchers(&mut self) {
        self.matchers.clear();
        for (name, conn) in &self.conns {
            match CommandMatcher::new(
                &self.config.prefix,
                &conn.conf().nick,
                self.definition.nick_addressing,
            ) {
                Ok(matcher) => {
                    self.matchers.insert(name.clone(), matcher);
                }
                Err(e) => log::error!("Bad command prefix for `{}`: {}", name, e),
            }
        }
    }

    /// Take at most one pending event from each connection and dispatch it.
    ///
    /// Returns the number of handlers run or queued.
    pub fn dispatch_once(&self) -> usize {
        let tables = Arc::clone(&self.tables);
        let mut fired = 0;

        for (name, conn) in &self.conns {
            let Some(event) = conn.try_next_event() else {
                continue;
            };
            let dispatcher = Dispatcher {
                tables: &tables,
                definition: &self.definition,
                config: &self.config,
                workers: &self.threads,
                matcher: self.matchers.get(name),
            };
            fired += dispatcher.dispatch(conn, &event);
        }

        fired
    }

    /// Wait until some connection has inbound work or `max` elapses.
    ///
    /// Returns whether work is pending.
    pub fn wait_for_drain(&self, max: Duration) -> bool {
        let deadline = Instant::now() + max;
        loop {
            if self.conns.values().any(Connection::has_pending) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(DRAIN_POLL.min(deadline - now));
        }
    }

    /// Drain queued responses from every connection.
    pub fn drain_outbound(&self) -> Vec<(String, Response)> {
        self.conns
            .iter()
            .flat_map(|(name, conn)| {
                conn.drain_responses()
                    .into_iter()
                    .map(move |r| (name.clone(), r))
            })
            .collect()
    }

    /// Replace everything `unit` declared with `records`.
    pub fn install_unit(&mut self, unit: &Unit, records: Vec<PluginRecord>) -> usize {
        self.plugs.register_unit(unit, records, &mut self.threads)
    }

    /// Remove every record of the unit at `path`.
    pub fn uninstall_unit(&mut self, path: &Path) -> usize {
        self.plugs.unregister_unit(path, &mut self.threads)
    }

    /// Remove records whose unit is not in `current`.
    pub fn prune_units(&mut self, current: &BTreeSet<PathBuf>) -> usize {
        self.plugs.prune_missing(current, &mut self.threads)
    }

    /// Rebuild the dispatch tables from the registry, log diagnostics and
    /// publish the result.
    pub fn publish_tables(&mut self) -> Arc<DispatchTables> {
        let tables = self.plugs.rebuild();
        for diagnostic in tables.diagnostics() {
            log::error!("{diagnostic}");
        }
        log::debug!(
            "Published tables: {} command(s), {} event(s), {} pattern(s)",
            tables.command_count(),
            tables.event_names().len(),
            tables.patterns().len()
        );
        self.tables = Arc::new(tables);
        Arc::clone(&self.tables)
    }

    /// Log the plugin listing.
    pub fn log_listing(&self) {
        for line in listing::render(&self.plugs, &self.tables) {
            log::info!("{line}");
        }
    }

    /// Stop every worker.
    pub fn shutdown(&mut self) {
        log::info!("Stopping {} worker(s)", self.threads.len());
        self.threads.stop_all();
    }

    /// Current host definition.
    #[must_use]
    pub fn definition(&self) -> &HostDefinition {
        &self.definition
    }

    /// Current config.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Published dispatch tables.
    #[must_use]
    pub fn tables(&self) -> Arc<DispatchTables> {
        Arc::clone(&self.tables)
    }

    /// The plugin registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.plugs
    }

    /// The worker supervisor.
    #[must_use]
    pub fn workers(&self) -> &WorkerSupervisor {
        &self.threads
    }

    /// Connection by name.
    #[must_use]
    pub fn connection(&self, name: &str) -> Option<&Connection> {
        self.conns.get(name)
    }

    /// Connection names.
    pub fn connection_names(&self) -> impl Iterator<Item = &str> {
        self.conns.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::connection::{Event, QueueProvider};
    use crate::plugin::{Behavior, Handler, Input};
    use crate::unit::UnitKind;
    use regex::Regex;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.connections.insert(
            "net".to_string(),
            ConnectionConfig {
                server: "irc.example.org".to_string(),
                nick: "bot".to_string(),
                channels: vec!["#rust".to_string()],
                ..ConnectionConfig::default()
            },
        );
        config.censored_strings = vec!["hunter2".to_string()];
        config
    }

    fn bot() -> Bot {
        let mut bot = Bot::new(Arc::new(QueueProvider));
        bot.apply_config(test_config());
        bot
    }

    fn command(
        unit: &Unit,
        names: &[&str],
        help: Option<&str>,
        reply: &'static str,
    ) -> Vec<PluginRecord> {
        let handler = Arc::new(Handler::from_fn(
            format!("{}:{}:1", unit.file_name(), names[0]),
            help.map(str::to_string),
            move |input: &Input| Ok(Some(format!("{reply}{}", input.inp))),
        ));
        names
            .iter()
            .map(|name| PluginRecord {
                handler: Arc::clone(&handler),
                behavior: Behavior::Command {
                    name: (*name).to_string(),
                    autohelp: true,
                },
                unit: unit.clone(),
                threaded: false,
                api_key: None,
            })
            .collect()
    }

    fn say(bot: &Bot, text: &str) -> Vec<String> {
        let conn = bot.connection("net").expect("connection");
        conn.push_event(Event::privmsg("alice", "#rust", text));
        bot.dispatch_once();
        conn.drain_responses().into_iter().map(|r| r.text).collect()
    }

    #[test]
    fn test_command_dispatch_and_aliases() {
        let mut bot = bot();
        let unit = Unit::new("/plugins/ping.lua", UnitKind::Plugin);
        bot.install_unit(&unit, command(&unit, &["ping", "p"], None, "pong"));
        bot.publish_tables();

        assert_eq!(say(&bot, ".ping"), vec!["alice: pong"]);
        assert_eq!(say(&bot, ".p x"), vec!["alice: pongx"]);
        assert_eq!(say(&bot, "bot: ping"), vec!["alice: pong"]);
        assert!(say(&bot, "ping").is_empty());
    }

    #[test]
    fn test_trigger_is_the_matched_table_key() {
        let mut bot = bot();
        let unit = Unit::new("/plugins/loud.lua", UnitKind::Plugin);
        let handler = Arc::new(Handler::from_fn("loud.lua:PING:1", None, |input: &Input| {
            Ok(Some(input.trigger.clone()))
        }));
        bot.install_unit(
            &unit,
            vec![PluginRecord {
                handler,
                behavior: Behavior::Command {
                    name: "PING".to_string(),
                    autohelp: false,
                },
                unit: unit.clone(),
                threaded: false,
                api_key: None,
            }],
        );
        bot.publish_tables();

        assert_eq!(say(&bot, ".PING"), vec!["alice: ping"]);
        assert_eq!(say(&bot, ".ping"), vec!["alice: ping"]);
        assert_eq!(say(&bot, ".Pi"), vec!["alice: ping"]);

        let mut config = test_config();
        config.disabled_commands = vec!["ping".to_string()];
        bot.apply_config(config);
        assert!(say(&bot, ".PING").is_empty());
    }

    #[test]
    fn test_autohelp_replies_with_help() {
        let mut bot = bot();
        let unit = Unit::new("/plugins/weather.lua", UnitKind::Plugin);
        bot.install_unit(&unit, command(&unit, &["weather"], Some("weather <place>"), "sunny in "));
        bot.publish_tables();

        assert_eq!(say(&bot, ".weather"), vec!["alice: weather <place>"]);
        assert_eq!(say(&bot, ".weather oslo"), vec!["alice: sunny in oslo"]);
    }

    #[test]
    fn test_unique_prefix_and_ambiguity() {
        let mut bot = bot();
        let a = Unit::new("/plugins/weather.lua", UnitKind::Plugin);
        let b = Unit::new("/plugins/wiki.lua", UnitKind::Plugin);
        bot.install_unit(&a, command(&a, &["weather"], None, "sunny"));
        bot.install_unit(&b, command(&b, &["wiki"], None, "article"));
        bot.publish_tables();

        assert_eq!(say(&bot, ".wea"), vec!["alice: sunny"]);
        assert_eq!(say(&bot, ".w"), vec!["alice: did you mean weather or wiki?"]);
        assert!(say(&bot, ".zzz").is_empty());
    }

    #[test]
    fn test_disabled_command_and_censoring() {
        let mut bot = bot();
        let unit = Unit::new("/plugins/echo.lua", UnitKind::Plugin);
        bot.install_unit(&unit, command(&unit, &["echo", "say"], None, ""));
        bot.publish_tables();

        assert_eq!(say(&bot, ".echo my hunter2"), vec!["alice: my [censored]"]);

        let mut config = test_config();
        config.disabled_commands = vec!["say".to_string()];
        bot.apply_config(config);
        assert!(say(&bot, ".say hi").is_empty());
        assert_eq!(say(&bot, ".echo hi"), vec!["alice: hi"]);
    }

    #[test]
    fn test_pattern_and_event_handlers() {
        let mut bot = bot();
        let unit = Unit::new("/plugins/hn.lua", UnitKind::Plugin);
        let records = vec![
            PluginRecord {
                handler: Arc::new(Handler::from_fn("hn.lua:regex:1", None, |input: &Input| {
                    Ok(input.groups.get(1).cloned().flatten())
                })),
                behavior: Behavior::Pattern {
                    regex: Regex::new(r"id=(\d+)").expect("regex"),
                },
                unit: unit.clone(),
                threaded: false,
                api_key: None,
            },
            PluginRecord {
                handler: Arc::new(Handler::from_fn("hn.lua:on_privmsg:2", None, |input: &Input| {
                    Ok(Some(format!("saw {}", input.trigger)))
                })),
                behavior: Behavior::Event {
                    events: vec!["*".to_string()],
                },
                unit: unit.clone(),
                threaded: false,
                api_key: None,
            },
        ];
        bot.install_unit(&unit, records);
        bot.publish_tables();

        assert_eq!(
            say(&bot, "look at item?id=42"),
            vec!["alice: saw PRIVMSG", "alice: 42"]
        );
    }

    #[test]
    fn test_threaded_command_runs_on_worker() {
        let mut bot = bot();
        let unit = Unit::new("/plugins/slow.lua", UnitKind::Plugin);
        let mut records = command(&unit, &["slow"], None, "done");
        records[0].threaded = true;
        bot.install_unit(&unit, records);
        bot.publish_tables();
        assert_eq!(bot.workers().len(), 1);

        let conn = bot.connection("net").expect("connection");
        conn.push_event(Event::privmsg("alice", "#rust", ".slow"));
        assert_eq!(bot.dispatch_once(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut replies = Vec::new();
        while replies.is_empty() && Instant::now() < deadline {
            replies = conn.drain_responses();
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(replies[0].text, "alice: done");

        bot.shutdown();
        assert!(bot.workers().is_empty());
    }

    #[test]
    fn test_rebuild_preserves_live_state() {
        let mut bot = bot();
        let unit = Unit::new("/plugins/slow.lua", UnitKind::Plugin);
        let mut records = command(&unit, &["slow"], None, "done");
        records[0].threaded = true;
        bot.install_unit(&unit, records);
        let tables = bot.publish_tables();

        let inbound = Arc::clone(bot.connection("net").expect("conn").inbound());
        let ids: Vec<_> = bot.registry().iter().map(|r| r.handler.id()).collect();

        let definition = HostDefinition {
            reply_with_nick: false,
            ..HostDefinition::default()
        };
        let mut bot = Bot::rebuild_from(bot, definition.clone());

        assert_eq!(bot.definition(), &definition);
        assert!(Arc::ptr_eq(
            &inbound,
            bot.connection("net").expect("conn").inbound()
        ));
        assert!(Arc::ptr_eq(&tables, &bot.tables()));
        assert_eq!(
            bot.registry().iter().map(|r| r.handler.id()).collect::<Vec<_>>(),
            ids
        );
        assert_eq!(bot.workers().len(), 1);
        bot.shutdown();
    }

    #[test]
    fn test_apply_config_diffs_connections() {
        let mut bot = bot();
        let inbound = Arc::clone(bot.connection("net").expect("conn").inbound());

        let mut config = test_config();
        config.connections.get_mut("net").expect("net").nick = "bot2".to_string();
        config.connections.insert("other".to_string(), ConnectionConfig::default());
        bot.apply_config(config);

        let conn = bot.connection("net").expect("conn");
        assert_eq!(conn.conf().nick, "bot2");
        assert!(Arc::ptr_eq(&inbound, conn.inbound()));
        assert_eq!(bot.connection_names().collect::<Vec<_>>(), vec!["net", "other"]);

        bot.apply_config(Config::default());
        assert_eq!(bot.connection_names().count(), 0);
    }

    #[test]
    fn test_wait_for_drain_reports_pending_work() {
        let bot = bot();
        assert!(!bot.wait_for_drain(Duration::from_millis(20)));
        bot.connection("net")
            .expect("conn")
            .push_event(Event::privmsg("alice", "#rust", "hi"));
        assert!(bot.wait_for_drain(Duration::from_millis(20)));
    }
}
