//! Lua unit loading for the plugin host.
//!
//! # Architecture
//!
//! ```text
//! UnitLoader
//!  ├── generations (per unit, bumped on every successful load)
//!  ├── libraries   (core units shared with plugins as globals)
//!  └── load(unit) ──▶ fresh Lua state
//!                       ├── log   (info, warn, error, debug)
//!                       ├── hook  (command, event, regex)
//!                       └── <library globals>
//! ```
//!
//! A [`ModuleHandle`] holds one loaded state. Core handles are read with
//! [`ModuleHandle::definition`]; plugin handles become records with
//! [`ModuleHandle::into_records`].

pub mod loader;
pub mod primitives;

pub use loader::{ModuleHandle, UnitLoader};
