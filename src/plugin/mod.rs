//! Plugin records, the registry and the tables derived from it.
//!
//! # Data flow
//!
//! ```text
//! UnitLoader ──records──▶ Registry ──rebuild()──▶ DispatchTables ──▶ dispatch
//!                            │
//!                            └── start/stop ──▶ WorkerSupervisor
//! ```

pub mod input;
pub mod listing;
pub mod record;
pub mod registry;
pub mod tables;

pub use input::Input;
pub use record::{Behavior, Handler, HandlerId, Invoke, PluginKind, PluginRecord};
pub use registry::Registry;
pub use tables::DispatchTables;
