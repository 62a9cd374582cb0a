//! Logging primitive for unit scripts.
//!
//! Exposes a global `log` table routed through Rust's `log` crate under the
//! `lua` target, tagged with the unit that emitted the message.
//!
//! # Usage in Lua
//!
//! ```lua
//! log.info("weather cache warmed")
//! log.warn("api key missing, falling back")
//! ```

use anyhow::{anyhow, Result};
use mlua::Lua;

/// Register the `log` table for the unit called `unit_name`.
///
/// Creates `log.error`, `log.warn`, `log.info` and `log.debug`.
pub fn register(lua: &Lua, unit_name: &str) -> Result<()> {
    let table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create log table: {e}"))?;

    let levels = [
        ("error", log::Level::Error),
        ("warn", log::Level::Warn),
        ("info", log::Level::Info),
        ("debug", log::Level::Debug),
    ];

    for (name, level) in levels {
        let unit = unit_name.to_string();
        let func = lua
            .create_function(move |_, msg: String| {
                log::log!(target: "lua", level, "[{}] {}", unit, msg);
                Ok(())
            })
            .map_err(|e| anyhow!("Failed to create log.{name} function: {e}"))?;
        table
            .set(name, func)
            .map_err(|e| anyhow!("Failed to set log.{name}: {e}"))?;
    }

    lua.globals()
        .set("log", table)
        .map_err(|e| anyhow!("Failed to register log table globally: {e}"))?;

    Ok(())
}
