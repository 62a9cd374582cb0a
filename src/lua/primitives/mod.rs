//! Lua primitive functions exposed to units.
//!
//! Primitives are installed into every fresh Lua state before a unit runs.
//!
//! # Available Primitives
//!
//! - `log` - Logging functions (info, warn, error, debug)
//! - `hook` - Behavior declarations (command, event, regex)
//!
//! # Adding New Primitives
//!
//! 1. Create a new module (e.g., `foo.rs`)
//! 2. Implement a `register(lua: &Lua, ...) -> Result<()>` function
//! 3. Add `pub mod foo;` here
//! 4. Call it from `register_all`

pub mod hook;
pub mod log;

pub use hook::{new_declarations, Declaration, DeclaredKind, Declarations};

use anyhow::Result;
use mlua::Lua;

/// Register every primitive for the unit named `unit_name`.
///
/// # Errors
///
/// Returns an error if any table or function cannot be created.
pub fn register_all(lua: &Lua, unit_name: &str, declared: &Declarations) -> Result<()> {
    log::register(lua, unit_name)?;
    hook::register(lua, declared)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all_installs_globals() {
        let lua = Lua::new();
        let declared = new_declarations();
        register_all(&lua, "test", &declared).expect("Should register primitives");

        let globals = lua.globals();
        assert!(globals.contains_key("log").expect("lookup"));
        assert!(globals.contains_key("hook").expect("lookup"));
    }
}
