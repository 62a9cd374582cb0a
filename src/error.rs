//! Error taxonomy for the reload runtime.
//!
//! Every error here is contained to the unit, record or worker it names.
//! Only [`ReloadError::BootstrapFatal`] is allowed to end the process, and
//! only during the initial reload pass.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A unit failed to read, compile, execute or produce a usable definition.
///
/// The previously loaded version of the unit (if any) keeps running.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The unit's source could not be read from disk.
    #[error("failed to read unit `{name}` ({}): {source}", path.display())]
    Read {
        /// Logical unit name.
        name: String,
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The Lua chunk failed to compile or raised an error while executing.
    #[error("failed to load unit `{name}` ({}): {message}", path.display())]
    Script {
        /// Logical unit name.
        name: String,
        /// Path of the unit.
        path: PathBuf,
        /// Rendered Lua error, including traceback when available.
        message: String,
    },

    /// A core unit loaded but its returned table is not a valid definition.
    #[error("core unit `{name}` returned an unusable definition: {message}")]
    Definition {
        /// Logical unit name.
        name: String,
        /// Why the definition was rejected.
        message: String,
    },

    /// The host primitives could not be installed into a fresh Lua state.
    #[error("failed to prepare Lua state for unit `{name}`: {message}")]
    Runtime {
        /// Logical unit name.
        name: String,
        /// Rendered Lua error.
        message: String,
    },
}

/// A declared command was rejected while building the dispatch tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The command name does not match `^\w+$`.
    #[error("invalid command name \"{name}\" ({signature})")]
    InvalidCommandName {
        /// Offending name, lower-cased.
        name: String,
        /// Signature of the handler that declared it.
        signature: String,
    },

    /// Another record already owns this name (compared case-insensitively).
    #[error("command '{name}' already registered ({existing}, {rejected})")]
    DuplicateCommand {
        /// Conflicting name, lower-cased.
        name: String,
        /// Signature of the record that kept the name.
        existing: String,
        /// Signature of the record that was dropped.
        rejected: String,
    },
}

/// Worker lifecycle failures.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker did not acknowledge shutdown in time and was detached.
    #[error("worker for {signature} did not stop within {timeout:?}; detached")]
    StopTimeout {
        /// Signature of the handler the worker was bound to.
        signature: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker for {signature}: {source}")]
    Spawn {
        /// Signature of the handler.
        signature: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors that escape a reload pass.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// A core unit failed to load during the initial pass.
    #[error("core unit failed to load during bootstrap")]
    BootstrapFatal(#[source] LoadError),
}
