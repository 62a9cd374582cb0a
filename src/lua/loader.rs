//! Unit loading.
//!
//! Every load gets its own fresh Lua state: a unit that fails to compile or
//! raises while executing leaves no partial state behind, and the handlers of
//! the previously loaded version keep working. A successful load bumps the
//! unit's generation, which turns every handler from earlier loads of the
//! same logical name into a stale binding that refuses to run.
//!
//! Handlers of one unit share the state they were loaded into, except
//! threaded handlers: the unit is executed again for each of them and the
//! handler is bound to that copy, so a worker never holds the lock of a state
//! the control thread calls into.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};

use anyhow::{anyhow, bail, Result};
use mlua::{Function, Lua, LuaSerdeExt, SerializeOptions, Value};
use serde::de::DeserializeOwned;

use super::primitives::{self, Declaration, DeclaredKind};
use crate::error::LoadError;
use crate::plugin::{Behavior, Handler, Input, Invoke, PluginRecord};
use crate::unit::{Unit, UnitKind};

/// Source of a core library, re-executed in every plugin state.
#[derive(Debug, Clone)]
struct Library {
    path: PathBuf,
    source: String,
}

/// Loads units into fresh Lua states and tracks their generations.
#[derive(Debug, Default)]
pub struct UnitLoader {
    generations: HashMap<(UnitKind, String), Arc<AtomicU64>>,
    libraries: BTreeMap<String, Library>,
}

impl UnitLoader {
    /// Create a loader with no libraries and no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `unit` from disk.
    ///
    /// Plugin units see every installed library as a global. On success the
    /// unit's generation is bumped.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if the file cannot be read, the primitives
    /// cannot be installed, a library fails in the new state, or the chunk
    /// fails to compile or execute. The current generation is unchanged.
    pub fn load(&mut self, unit: &Unit) -> Result<ModuleHandle, LoadError> {
        let source = fs::read_to_string(&unit.path).map_err(|source| LoadError::Read {
            name: unit.name.clone(),
            path: unit.path.clone(),
            source,
        })?;

        let (lua, exports, declarations) = self.execute(unit, &source)?;

        if unit.kind == UnitKind::Core && !declarations.is_empty() {
            log::warn!(
                "{} declared {} hook(s); core units cannot declare plugins, ignoring",
                unit,
                declarations.len()
            );
        }

        let mut bound = Vec::new();
        if unit.kind == UnitKind::Plugin {
            for (index, decl) in declarations.into_iter().enumerate() {
                if decl.threaded {
                    bound.push(self.isolate(unit, &source, index, decl)?);
                } else {
                    bound.push(BoundDeclaration {
                        decl,
                        lua: lua.clone(),
                    });
                }
            }
        }

        let current = Arc::clone(
            self.generations
                .entry((unit.kind, unit.name.clone()))
                .or_default(),
        );
        let generation = current.fetch_add(1, Ordering::SeqCst) + 1;

        log::debug!("Loaded {} (generation {})", unit, generation);

        Ok(ModuleHandle {
            unit: unit.clone(),
            generation,
            current,
            source,
            declarations: bound,
            exports,
            lua,
        })
    }

    /// Current generation of the unit with this kind and logical name
    /// (0 if it never loaded).
    #[must_use]
    pub fn generation(&self, kind: UnitKind, name: &str) -> u64 {
        self.generations
            .get(&(kind, name.to_string()))
            .map_or(0, |g| g.load(Ordering::SeqCst))
    }

    /// Make a loaded core unit available to plugins as a global named after it.
    pub fn install_library(&mut self, handle: &ModuleHandle) {
        log::info!("Installed core library `{}`", handle.unit.name);
        self.libraries.insert(
            handle.unit.name.clone(),
            Library {
                path: handle.unit.path.clone(),
                source: handle.source.clone(),
            },
        );
    }

    /// Withdraw a library. Plugins loaded afterwards no longer see it.
    pub fn remove_library(&mut self, name: &str) -> bool {
        let removed = self.libraries.remove(name).is_some();
        if removed {
            log::info!("Withdrew core library `{name}`");
        }
        removed
    }

    /// Withdraw every library whose file is not in `current`.
    ///
    /// Returns the names withdrawn.
    pub fn withdraw_missing_libraries(&mut self, current: &BTreeSet<PathBuf>) -> Vec<String> {
        let missing: Vec<String> = self
            .libraries
            .iter()
            .filter(|(_, library)| !current.contains(&library.path))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &missing {
            self.remove_library(name);
        }
        missing
    }

    /// Names of the installed libraries.
    pub fn library_names(&self) -> impl Iterator<Item = &str> {
        self.libraries.keys().map(String::as_str)
    }

    /// Run `source` in a fresh state with the primitives (and, for plugins,
    /// the libraries) installed.
    fn execute(
        &self,
        unit: &Unit,
        source: &str,
    ) -> Result<(Lua, Value, Vec<Declaration>), LoadError> {
        let lua = Lua::new();
        let declared = primitives::new_declarations();
        primitives::register_all(&lua, &unit.name, &declared).map_err(|e| {
            LoadError::Runtime {
                name: unit.name.clone(),
                message: format!("{e:#}"),
            }
        })?;

        if unit.kind == UnitKind::Plugin {
            self.install_libraries(&lua, unit)?;
        }

        let exports = lua
            .load(source)
            .set_name(format!("@{}", unit.path.display()))
            .eval::<Value>()
            .map_err(|e| LoadError::Script {
                name: unit.name.clone(),
                path: unit.path.clone(),
                message: e.to_string(),
            })?;

        let declarations =
            std::mem::take(&mut *declared.lock().unwrap_or_else(PoisonError::into_inner));
        Ok((lua, exports, declarations))
    }

    /// Bind the threaded declaration at `index` to a state of its own.
    fn isolate(
        &self,
        unit: &Unit,
        source: &str,
        index: usize,
        decl: Declaration,
    ) -> Result<BoundDeclaration, LoadError> {
        let (lua, _, mut declarations) = self.execute(unit, source)?;

        let same = declarations
            .get(index)
            .is_some_and(|d| d.threaded && d.label == decl.label);
        if !same {
            return Err(LoadError::Runtime {
                name: unit.name.clone(),
                message: format!(
                    "threaded handler `{}` was not declared again on re-execution",
                    decl.label
                ),
            });
        }

        let func = declarations.swap_remove(index).func;
        Ok(BoundDeclaration {
            decl: Declaration { func, ..decl },
            lua,
        })
    }

    fn install_libraries(&self, lua: &Lua, unit: &Unit) -> Result<(), LoadError> {
        let runtime_error = |message: String| LoadError::Runtime {
            name: unit.name.clone(),
            message,
        };

        for (name, library) in &self.libraries {
            let value = lua
                .load(library.source.as_str())
                .set_name(format!("@{}", library.path.display()))
                .eval::<Value>()
                .map_err(|e| runtime_error(format!("library `{name}` failed: {e}")))?;
            lua.globals()
                .set(name.as_str(), value)
                .map_err(|e| runtime_error(format!("library `{name}` not installed: {e}")))?;
        }
        Ok(())
    }
}

/// A declaration and the state its function lives in.
struct BoundDeclaration {
    decl: Declaration,
    lua: Lua,
}

/// A successfully loaded unit: its Lua state, exports and declarations.
pub struct ModuleHandle {
    unit: Unit,
    generation: u64,
    current: Arc<AtomicU64>,
    source: String,
    declarations: Vec<BoundDeclaration>,
    exports: Value,
    lua: Lua,
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("unit", &self.unit)
            .field("generation", &self.generation)
            .field("declarations", &self.declarations.len())
            .finish_non_exhaustive()
    }
}

impl ModuleHandle {
    /// The unit this handle was loaded from.
    #[must_use]
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Generation assigned by this load.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether no newer load of the same unit has succeeded.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    /// Number of `hook.*` declarations the unit made.
    #[must_use]
    pub fn declaration_count(&self) -> usize {
        self.declarations.len()
    }

    /// Deserialize the chunk's return value. A unit that returns nothing
    /// yields `T::default()`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Definition`] if the value does not fit `T`.
    pub fn definition<T: DeserializeOwned + Default>(&self) -> Result<T, LoadError> {
        if self.exports.is_nil() {
            return Ok(T::default());
        }
        self.lua
            .from_value(self.exports.clone())
            .map_err(|e| LoadError::Definition {
                name: self.unit.name.clone(),
                message: e.to_string(),
            })
    }

    /// Turn the declarations into plugin records.
    ///
    /// One handler per declaration; every alias of a command gets its own
    /// record sharing that handler. Signatures read `file.lua:label:ordinal`.
    #[must_use]
    pub fn into_records(self) -> Vec<PluginRecord> {
        let file_name = self.unit.file_name();
        let mut records = Vec::new();

        for BoundDeclaration { decl, lua } in self.declarations {
            let handler = Arc::new(Handler::new(
                format!("{}:{}:{}", file_name, decl.label, decl.ordinal),
                decl.help,
                LuaHandler {
                    func: decl.func,
                    lua,
                    unit: self.unit.name.clone(),
                    generation: self.generation,
                    current: Arc::clone(&self.current),
                },
            ));

            let behaviors = match decl.kind {
                DeclaredKind::Command { names, autohelp } => names
                    .into_iter()
                    .map(|name| Behavior::Command { name, autohelp })
                    .collect(),
                DeclaredKind::Event { events } => vec![Behavior::Event {
                    events: events.iter().map(|e| e.to_uppercase()).collect(),
                }],
                DeclaredKind::Pattern { regex } => vec![Behavior::Pattern { regex }],
            };

            for behavior in behaviors {
                records.push(PluginRecord {
                    handler: Arc::clone(&handler),
                    behavior,
                    unit: self.unit.clone(),
                    threaded: decl.threaded,
                    api_key: decl.api_key.clone(),
                });
            }
        }

        records
    }
}

/// A Lua function bound to the generation of the unit that defined it.
struct LuaHandler {
    func: Function,
    lua: Lua,
    unit: String,
    generation: u64,
    current: Arc<AtomicU64>,
}

impl Invoke for LuaHandler {
    fn invoke(&self, input: &Input) -> Result<Option<String>> {
        let current = self.current.load(Ordering::SeqCst);
        if current != self.generation {
            bail!(
                "stale handler: unit `{}` is at generation {}, handler belongs to {}",
                self.unit,
                current,
                self.generation
            );
        }

        let options = SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false);
        let arg = self
            .lua
            .to_value_with(input, options)
            .map_err(|e| anyhow!("Failed to convert input for Lua: {e}"))?;

        self.func
            .call::<Option<String>>(arg)
            .map_err(|e| anyhow!("{e}"))
    }
}
