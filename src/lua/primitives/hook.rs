//! The `hook` table: how plugin units declare behaviors.
//!
//! Declarations are collected into a Rust-side list while the unit runs;
//! after execution the loader takes exactly that list. Nothing else a unit
//! defines is treated as a plugin.
//!
//! # Usage in Lua
//!
//! ```lua
//! hook.command("ping", function(inp) return "pong" end)
//! hook.command({"weather", "w"}, weather, { thread = true, api_key = "wunderground" })
//! hook.event({"JOIN", "PART"}, function(inp) log.info(inp.nick .. " moved") end)
//! hook.regex([[(?i)news\.ycombinator\.com\S*id=(\d+)]], hackernews)
//! ```
//!
//! Options (all optional): `thread` (run on a worker thread, default
//! false), `autohelp` (commands only, default true), `help` (text shown by
//! autohelp), `api_key` (name of a configured key passed as
//! `inp.api_key`), `name` (label used in listings).

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Result};
use mlua::{Function, Lua, Table, Value};
use regex::Regex;

/// What a declaration asked for.
#[derive(Debug, Clone)]
pub enum DeclaredKind {
    /// `hook.command`: one or more names sharing a handler.
    Command {
        /// Names (first one is the primary).
        names: Vec<String>,
        /// Reply with help on empty input.
        autohelp: bool,
    },
    /// `hook.event`.
    Event {
        /// Event names.
        events: Vec<String>,
    },
    /// `hook.regex`.
    Pattern {
        /// Compiled pattern.
        regex: Regex,
    },
}

/// One `hook.*` call.
#[derive(Debug, Clone)]
pub struct Declaration {
    /// 1-based position among the unit's declarations.
    pub ordinal: usize,
    /// Label for signatures.
    pub label: String,
    /// Kind and metadata.
    pub kind: DeclaredKind,
    /// The handler function.
    pub func: Function,
    /// Run on a worker thread.
    pub threaded: bool,
    /// Help text.
    pub help: Option<String>,
    /// Requested API key name.
    pub api_key: Option<String>,
}

/// Declarations collected from one unit execution.
pub type Declarations = Arc<Mutex<Vec<Declaration>>>;

/// Create an empty declaration list.
#[must_use]
pub fn new_declarations() -> Declarations {
    Arc::new(Mutex::new(Vec::new()))
}

/// Common options accepted by every `hook.*` function.
struct HookOptions {
    threaded: bool,
    autohelp: bool,
    help: Option<String>,
    api_key: Option<String>,
    name: Option<String>,
}

impl HookOptions {
    fn from_table(opts: Option<&Table>) -> mlua::Result<Self> {
        let Some(t) = opts else {
            return Ok(Self {
                threaded: false,
                autohelp: true,
                help: None,
                api_key: None,
                name: None,
            });
        };
        Ok(Self {
            threaded: t.get::<Option<bool>>("thread")?.unwrap_or(false),
            autohelp: t.get::<Option<bool>>("autohelp")?.unwrap_or(true),
            help: t.get::<Option<String>>("help")?,
            api_key: t.get::<Option<String>>("api_key")?,
            name: t.get::<Option<String>>("name")?,
        })
    }
}

/// Accept either a single string or a list of strings.
fn string_list(value: Value, what: &str) -> mlua::Result<Vec<String>> {
    let list = match value {
        Value::String(s) => vec![s.to_str()?.to_string()],
        Value::Table(t) => t.sequence_values::<String>().collect::<mlua::Result<Vec<_>>>()?,
        other => {
            return Err(mlua::Error::runtime(format!(
                "expected {what} (string or list of strings), got {}",
                other.type_name()
            )))
        }
    };
    if list.is_empty() {
        return Err(mlua::Error::runtime(format!("at least one {what} is required")));
    }
    Ok(list)
}

fn push(
    declared: &Declarations,
    kind: DeclaredKind,
    func: Function,
    opts: HookOptions,
    default_label: String,
) {
    let mut list = declared.lock().unwrap_or_else(PoisonError::into_inner);
    let ordinal = list.len() + 1;
    list.push(Declaration {
        ordinal,
        label: opts.name.unwrap_or(default_label),
        kind,
        func,
        threaded: opts.threaded,
        help: opts.help,
        api_key: opts.api_key,
    });
}

/// Register the global `hook` table, collecting into `declared`.
pub fn register(lua: &Lua, declared: &Declarations) -> Result<()> {
    let hook = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create hook table: {e}"))?;

    // hook.command(name_or_names, fn, opts?)
    let list = Arc::clone(declared);
    let command_fn = lua
        .create_function(move |_, (names, func, opts): (Value, Function, Option<Table>)| {
            let names = string_list(names, "command name")?;
            let opts = HookOptions::from_table(opts.as_ref())?;
            let kind = DeclaredKind::Command {
                autohelp: opts.autohelp,
                names: names.clone(),
            };
            push(&list, kind, func, opts, names[0].clone());
            Ok(())
        })
        .map_err(|e| anyhow!("Failed to create hook.command function: {e}"))?;
    hook.set("command", command_fn)
        .map_err(|e| anyhow!("Failed to set hook.command: {e}"))?;

    // hook.event(event_or_events, fn, opts?)
    let list = Arc::clone(declared);
    let event_fn = lua
        .create_function(move |_, (events, func, opts): (Value, Function, Option<Table>)| {
            let events = string_list(events, "event name")?;
            let opts = HookOptions::from_table(opts.as_ref())?;
            let label = format!("on_{}", events[0].to_lowercase());
            push(&list, DeclaredKind::Event { events }, func, opts, label);
            Ok(())
        })
        .map_err(|e| anyhow!("Failed to create hook.event function: {e}"))?;
    hook.set("event", event_fn)
        .map_err(|e| anyhow!("Failed to set hook.event: {e}"))?;

    // hook.regex(pattern, fn, opts?)
    let list = Arc::clone(declared);
    let regex_fn = lua
        .create_function(move |_, (pattern, func, opts): (String, Function, Option<Table>)| {
            let regex = Regex::new(&pattern).map_err(mlua::Error::external)?;
            let opts = HookOptions::from_table(opts.as_ref())?;
            push(&list, DeclaredKind::Pattern { regex }, func, opts, "regex".to_string());
            Ok(())
        })
        .map_err(|e| anyhow!("Failed to create hook.regex function: {e}"))?;
    hook.set("regex", regex_fn)
        .map_err(|e| anyhow!("Failed to set hook.regex: {e}"))?;

    lua.globals()
        .set("hook", hook)
        .map_err(|e| anyhow!("Failed to register hook table globally: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> mlua::Result<Vec<Declaration>> {
        let lua = Lua::new();
        let declared = new_declarations();
        register(&lua, &declared).expect("register hook");
        lua.load(source).exec()?;
        let list = std::mem::take(&mut *declared.lock().expect("lock"));
        Ok(list)
    }

    #[test]
    fn test_command_with_aliases_and_options() {
        let declared = run(
            r#"
            hook.command({"weather", "w"}, function(inp) return "sunny" end,
                { thread = true, help = "weather <place>", api_key = "wx" })
            "#,
        )
        .expect("should run");

        assert_eq!(declared.len(), 1);
        let decl = &declared[0];
        assert_eq!(decl.ordinal, 1);
        assert_eq!(decl.label, "weather");
        assert!(decl.threaded);
        assert_eq!(decl.help.as_deref(), Some("weather <place>"));
        assert_eq!(decl.api_key.as_deref(), Some("wx"));
        match &decl.kind {
            DeclaredKind::Command { names, autohelp } => {
                assert_eq!(names, &vec!["weather".to_string(), "w".to_string()]);
                assert!(*autohelp);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_event_and_regex_declarations() {
        let declared = run(
            r#"
            hook.event("JOIN", function(inp) end)
            hook.regex([[id=(\d+)]], function(inp) end, { name = "ids" })
            "#,
        )
        .expect("should run");

        assert_eq!(declared.len(), 2);
        assert_eq!(declared[0].label, "on_join");
        assert_eq!(declared[1].label, "ids");
        assert_eq!(declared[1].ordinal, 2);
        assert!(matches!(declared[1].kind, DeclaredKind::Pattern { .. }));
    }

    #[test]
    fn test_invalid_regex_fails_the_chunk() {
        let result = run(r#"hook.regex("(unclosed", function() end)"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_name_list_rejected() {
        let result = run(r#"hook.command({}, function() end)"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_non_function_handler_rejected() {
        let result = run(r#"hook.command("ping", "not a function")"#);
        assert!(result.is_err());
    }
}
