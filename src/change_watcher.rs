//! Modification-time change detection for unit files.
//!
//! [`ChangeWatcher`] is a plain value owned by the reload coordinator. It
//! remembers the last mtime seen for every scanned path and reports which
//! paths differ on the next scan. There is no OS-level watch: the main loop
//! polls once per iteration, which keeps reload passes deterministic and
//! easy to drive from tests.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Tracks the last-known modification time of each watched path.
#[derive(Debug, Default)]
pub struct ChangeWatcher {
    mtimes: HashMap<PathBuf, SystemTime>,
}

impl ChangeWatcher {
    /// Create a watcher that has seen nothing yet.
    ///
    /// The first scan of any path reports it as changed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the subset of `paths` whose mtime differs from the last scan.
    ///
    /// Every scanned path that can be stat'ed has its recorded mtime
    /// updated. A known path that can no longer be stat'ed counts as
    /// changed and is dropped; an unknown one is silently skipped.
    pub fn scan<'a, I>(&mut self, paths: I) -> BTreeSet<PathBuf>
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        let mut changed = BTreeSet::new();

        for path in paths {
            match Self::mtime(path) {
                Some(mtime) => {
                    if self.mtimes.insert(path.clone(), mtime) != Some(mtime) {
                        changed.insert(path.clone());
                    }
                }
                None => {
                    if self.mtimes.remove(path).is_some() {
                        log::debug!("Watched file disappeared: {}", path.display());
                        changed.insert(path.clone());
                    }
                }
            }
        }

        changed
    }

    /// Drop the recorded mtime for each of `paths`.
    pub fn forget<'a, I>(&mut self, paths: I)
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        for path in paths {
            self.mtimes.remove(path);
        }
    }

    /// Forget every path for which `keep` returns false.
    ///
    /// Called at the end of each reload pass so that deleted or unwatched
    /// files do not accumulate.
    pub fn retain(&mut self, mut keep: impl FnMut(&Path) -> bool) {
        self.mtimes.retain(|path, _| keep(path));
    }

    /// Whether `path` has a recorded mtime.
    #[must_use]
    pub fn is_known(&self, path: &Path) -> bool {
        self.mtimes.contains_key(path)
    }

    /// Number of tracked paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mtimes.len()
    }

    /// Whether no paths are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mtimes.is_empty()
    }

    fn mtime(path: &Path) -> Option<SystemTime> {
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }
}
