//! Plugster - chat bot host with hot-reloadable Lua plugins.
//!
//! This crate loads small units of bot behavior from a directory of Lua
//! files, routes inbound chat events to them, and swaps in new versions when
//! their files change, without restarting the process or dropping live
//! connections.
//!
//! # Architecture
//!
//! - **ChangeWatcher** - mtime-based change detection per unit file
//! - **UnitLoader** - loads one unit into a fresh Lua state, tracks generations
//! - **Registry** - live catalog of plugin records (commands, events, patterns)
//! - **DispatchTables** - read-only routing indices rebuilt from the registry
//! - **WorkerSupervisor** - one worker thread per threaded handler
//! - **ReloadCoordinator** - runs one reload pass and rebuilds the [`Bot`]
//!   when the host definition changes
//!
//! # Modules
//!
//! - [`host`] - the live bot, dispatch and the reload pass
//! - [`lua`] - unit loading and the primitives units see
//! - [`plugin`] - records, registry, tables and listings
//! - [`config`] - configuration loading

// Library modules
pub mod change_watcher;
pub mod config;
pub mod connection;
pub mod console;
pub mod error;
pub mod host;
pub mod lua;
pub mod plugin;
pub mod reply;
pub mod unit;
pub mod worker;

// Re-export commonly used types
pub use config::{Config, ConfigSource, ConnectionConfig};
pub use connection::{Connection, ConnectionProvider, Event, QueueProvider, Response};
pub use error::{LoadError, ReloadError, ValidationError, WorkerError};
pub use host::{Bot, HostDefinition, ReloadCoordinator, ReloadPolicy};
pub use plugin::{DispatchTables, PluginRecord, Registry};
pub use unit::{Unit, UnitKind};
pub use worker::WorkerSupervisor;
