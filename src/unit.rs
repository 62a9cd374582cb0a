//! Source units and unit discovery.
//!
//! A unit is one `.lua` file that can be loaded on its own. Core units live
//! in `<root>/core/` and shape the host itself; plugin units live in the
//! configured plugin directory and declare bot behaviors.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Which side of the host a unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitKind {
    /// Defines host behavior (host definition, reload policy, libraries).
    Core,
    /// Defines bot behaviors (commands, events, patterns).
    Plugin,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core => write!(f, "core"),
            Self::Plugin => write!(f, "plugin"),
        }
    }
}

/// A named, independently reloadable source file.
///
/// Identity is the path: two units with the same path are the same unit
/// regardless of how they were discovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Unit {
    /// Canonical path of the source file.
    pub path: PathBuf,
    /// Logical name (file stem), e.g. `weather` for `plugins/weather.lua`.
    pub name: String,
    /// Core or plugin.
    pub kind: UnitKind,
}

impl Unit {
    /// Build a unit for `path`, deriving the logical name from the file stem.
    pub fn new(path: impl Into<PathBuf>, kind: UnitKind) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, name, kind }
    }

    /// File name used in signatures and listings (`weather.lua`).
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unit `{}` ({})", self.kind, self.name, self.path.display())
    }
}

/// List the files in `dir` with the given extension, canonicalized.
///
/// A missing directory yields an empty set: a host with no plugins is valid.
/// Entries that vanish between listing and canonicalization are skipped.
pub fn discover(dir: &Path, extension: &str) -> BTreeSet<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        log::debug!("Unit directory not readable, treating as empty: {}", dir.display());
        return BTreeSet::new();
    };

    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == extension))
        .filter_map(|path| fs::canonicalize(&path).ok())
        .collect()
}
