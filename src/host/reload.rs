//! The reload pass.
//!
//! One call to [`ReloadCoordinator::reload`] scans the core units, reloads
//! the changed ones, scans the plugin directory, reloads the changed
//! plugins, prunes records of vanished files and republishes the dispatch
//! tables if anything moved.
//!
//! Core units come in three flavours:
//!
//! - `bot`: the host definition. A successful reload rebuilds the [`Bot`]
//!   around the new definition, carrying all live state over.
//! - `reload`: the reload policy. A change replaces the policy and runs the
//!   pass once more so the new plugin directory is picked up at once.
//! - anything else: a library exposed to plugins as a global. Installing or
//!   withdrawing a library reloads every plugin so they all see it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::definition::{HostDefinition, ReloadPolicy, CORE_DIR, HOST_UNIT, POLICY_UNIT};
use super::Bot;
use crate::change_watcher::ChangeWatcher;
use crate::error::{LoadError, ReloadError};
use crate::lua::UnitLoader;
use crate::unit::{self, Unit, UnitKind};

/// Extension of core unit files.
const CORE_EXTENSION: &str = "lua";

/// Drives reload passes for one unit root.
#[derive(Debug)]
pub struct ReloadCoordinator {
    root: PathBuf,
    watcher: ChangeWatcher,
    loader: UnitLoader,
    policy: ReloadPolicy,
}

/// What one core scan changed.
#[derive(Debug, Default)]
struct CoreOutcome {
    policy_changed: bool,
    libraries_changed: bool,
}

impl ReloadCoordinator {
    /// Create a coordinator for the unit tree at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            watcher: ChangeWatcher::new(),
            loader: UnitLoader::new(),
            policy: ReloadPolicy::default(),
        }
    }

    /// Unit root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Policy in effect.
    #[must_use]
    pub fn policy(&self) -> &ReloadPolicy {
        &self.policy
    }

    /// The unit loader (generations and libraries).
    #[must_use]
    pub fn loader(&self) -> &UnitLoader {
        &self.loader
    }

    /// Current plugin directory.
    #[must_use]
    pub fn plugin_dir(&self) -> PathBuf {
        self.policy.plugin_path(&self.root)
    }

    /// Run one reload pass and return the bot to use from now on.
    ///
    /// With `initial` set, a core unit that fails to load is fatal and the
    /// plugin listing is logged at the end. Otherwise every failure is
    /// logged and the previously loaded version keeps running.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError::BootstrapFatal`] only when `initial` is set.
    pub fn reload(&mut self, bot: Bot, initial: bool) -> Result<Bot, ReloadError> {
        let mut bot = bot;
        let mut changed = false;
        let mut core_files = BTreeSet::new();

        // A policy change reruns the core scan once; the second scan only
        // sees files that changed in between.
        for attempt in 0..2 {
            core_files = unit::discover(&self.root.join(CORE_DIR), CORE_EXTENSION);
            let (next, outcome) = self.reload_core(bot, &core_files, initial)?;
            bot = next;

            if outcome.libraries_changed {
                let plugins = unit::discover(&self.plugin_dir(), &self.policy.extension);
                self.watcher.forget(&plugins);
            }
            if !(outcome.policy_changed && attempt == 0) {
                break;
            }
            log::info!("Reload policy changed, restarting pass");
        }

        let plugin_files = unit::discover(&self.plugin_dir(), &self.policy.extension);
        let changed_plugins = self.watcher.scan(&plugin_files);

        for path in changed_plugins.intersection(&plugin_files) {
            let unit = Unit::new(path.clone(), UnitKind::Plugin);
            if self.register_plugin_unit(&mut bot, &unit).is_ok() {
                changed = true;
            }
        }

        if bot.prune_units(&plugin_files) > 0 {
            changed = true;
        }

        if changed {
            bot.publish_tables();
        }

        if initial && self.policy.listing {
            bot.log_listing();
        }

        self.watcher
            .retain(|path| core_files.contains(path) || plugin_files.contains(path));

        Ok(bot)
    }

    /// Load one plugin unit and replace its records in `bot`.
    ///
    /// Tables are not republished; the caller decides when. Returns the
    /// number of records registered.
    ///
    /// # Errors
    ///
    /// Returns the [`LoadError`] (after logging it) when the unit fails to
    /// load; its previous records stay registered.
    pub fn register_plugin_unit(&mut self, bot: &mut Bot, unit: &Unit) -> Result<usize, LoadError> {
        match self.loader.load(unit) {
            Ok(handle) => {
                let records = handle.into_records();
                let count = bot.install_unit(unit, records);
                log::info!("Loaded {} ({} record(s))", unit, count);
                Ok(count)
            }
            Err(e) => {
                log::error!("{e}");
                Err(e)
            }
        }
    }

    /// Remove every record of the unit at `path` from `bot` and stop its
    /// workers.
    ///
    /// The file's current mtime is recorded, so the unit stays out until the
    /// file changes again.
    pub fn unregister_unit(&mut self, bot: &mut Bot, path: &Path) -> usize {
        let removed = bot.uninstall_unit(path);
        self.watcher.scan([&path.to_path_buf()]);
        if removed > 0 {
            log::info!("Unregistered {} record(s) from {}", removed, path.display());
        }
        removed
    }

    fn reload_core(
        &mut self,
        mut bot: Bot,
        core_files: &BTreeSet<PathBuf>,
        initial: bool,
    ) -> Result<(Bot, CoreOutcome), ReloadError> {
        let mut outcome = CoreOutcome::default();

        if !self.loader.withdraw_missing_libraries(core_files).is_empty() {
            outcome.libraries_changed = true;
        }

        for path in self.watcher.scan(core_files) {
            let unit = Unit::new(path, UnitKind::Core);

            match unit.name.as_str() {
                HOST_UNIT => {
                    let loaded = self
                        .loader
                        .load(&unit)
                        .and_then(|handle| handle.definition::<HostDefinition>());
                    match loaded {
                        Ok(definition) => {
                            log::info!("Reloaded host definition from {}", unit.path.display());
                            bot = Bot::rebuild_from(bot, definition);
                        }
                        Err(e) => Self::core_failed(e, initial)?,
                    }
                }
                POLICY_UNIT => {
                    let loaded = self
                        .loader
                        .load(&unit)
                        .and_then(|handle| handle.definition::<ReloadPolicy>());
                    match loaded {
                        Ok(policy) => {
                            if policy != self.policy {
                                log::info!(
                                    "Reload policy: plugins in `{}` (*.{})",
                                    policy.plugin_dir,
                                    policy.extension
                                );
                                self.policy = policy;
                                outcome.policy_changed = true;
                            }
                        }
                        Err(e) => Self::core_failed(e, initial)?,
                    }
                }
                _ => match self.loader.load(&unit) {
                    Ok(handle) => {
                        self.loader.install_library(&handle);
                        outcome.libraries_changed = true;
                    }
                    Err(e) => Self::core_failed(e, initial)?,
                },
            }
        }

        Ok((bot, outcome))
    }

    fn core_failed(e: LoadError, initial: bool) -> Result<(), ReloadError> {
        if initial {
            return Err(ReloadError::BootstrapFatal(e));
        }
        log::error!("{e}; keeping the loaded version");
        Ok(())
    }
}
