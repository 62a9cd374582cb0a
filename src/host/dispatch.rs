//! Routing one inbound event to the plugins that want it.
//!
//! For every event, listeners for its verb run first, then `*` listeners.
//! A `PRIVMSG` is also checked for a command (prefix or nick addressing,
//! with unique-prefix matching) and run against every pattern.

use std::sync::Arc;

use regex::Regex;

use super::definition::HostDefinition;
use crate::config::Config;
use crate::connection::{push_response, Connection, Event, Response};
use crate::plugin::{Behavior, DispatchTables, Input, PluginRecord};
use crate::reply::ReplyShape;
use crate::worker::{Job, WorkerSupervisor};

/// Command recognisers for one connection.
#[derive(Debug, Clone)]
pub struct CommandMatcher {
    channel: Regex,
    private: Regex,
}

impl CommandMatcher {
    /// Build recognisers for the command `prefix` characters and the bot's
    /// `nick`.
    ///
    /// In channels a command needs the prefix (or `nick:` addressing when
    /// enabled); in private messages the prefix is optional.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting pattern does not compile.
    pub fn new(prefix: &str, nick: &str, nick_addressing: bool) -> Result<Self, regex::Error> {
        let class = if prefix.is_empty() {
            None
        } else {
            let escaped: String = prefix.chars().map(|c| regex::escape(&c.to_string())).collect();
            Some(format!("[{escaped}]"))
        };
        let addressed = (nick_addressing && !nick.is_empty())
            .then(|| format!(r"{}[,;:]+\s+", regex::escape(nick)));

        let build = |optional_prefix: bool| {
            let mut alternatives = Vec::new();
            if let Some(class) = &class {
                alternatives.push(if optional_prefix {
                    format!("{class}?")
                } else {
                    class.clone()
                });
            } else if optional_prefix {
                alternatives.push(String::new());
            }
            if let Some(addressed) = &addressed {
                alternatives.push(addressed.clone());
            }
            if alternatives.is_empty() {
                // Nothing can address the bot; never matches.
                alternatives.push(r"[^\s\S]".to_string());
            }
            Regex::new(&format!(r"(?i)^(?:{})(\w+)(?:$|\s+)(.*)", alternatives.join("|")))
        };

        Ok(Self {
            channel: build(false)?,
            private: build(true)?,
        })
    }

    /// Split `text` into a lower-cased command name and its arguments.
    #[must_use]
    pub fn parse(&self, text: &str, private: bool) -> Option<(String, String)> {
        let regex = if private { &self.private } else { &self.channel };
        let caps = regex.captures(text)?;
        let name = caps.get(1)?.as_str().to_lowercase();
        let args = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
        Some((name, args))
    }
}

/// Everything one dispatch needs, borrowed from the bot.
pub(crate) struct Dispatcher<'a> {
    pub tables: &'a DispatchTables,
    pub definition: &'a HostDefinition,
    pub config: &'a Config,
    pub workers: &'a WorkerSupervisor,
    pub matcher: Option<&'a CommandMatcher>,
}

impl Dispatcher<'_> {
    /// Route `event` from `conn`. Returns how many handlers were run or
    /// queued.
    pub fn dispatch(&self, conn: &Connection, event: &Event) -> usize {
        let conf = conn.conf();
        let base = Input::from_event(conn.name(), &conf.nick, event);
        let censored = conf
            .censored_strings
            .as_deref()
            .unwrap_or(&self.config.censored_strings);
        let shape = self.definition.reply_shape(censored);

        let mut fired = 0;

        let verb = event.command.to_uppercase();
        for record in self.tables.listeners(&verb).iter().chain(self.tables.listeners("*")) {
            let input = Input {
                trigger: verb.clone(),
                ..base.clone()
            };
            fired += usize::from(self.run(record, input, &shape, conn));
        }

        if verb != "PRIVMSG" {
            return fired;
        }

        if let Some(matcher) = self.matcher {
            let private = !base.is_channel();
            if let Some((name, args)) = matcher.parse(&base.msg, private) {
                fired += self.dispatch_command(&name, &args, &base, &shape, conn);
            }
        }

        for record in self.tables.patterns() {
            let Behavior::Pattern { regex } = &record.behavior else {
                continue;
            };
            let Some(caps) = regex.captures(&base.msg) else {
                continue;
            };
            let input = Input {
                trigger: regex.as_str().to_string(),
                groups: caps.iter().map(|m| m.map(|m| m.as_str().to_string())).collect(),
                ..base.clone()
            };
            fired += usize::from(self.run(record, input, &shape, conn));
        }

        fired
    }

    fn dispatch_command(
        &self,
        name: &str,
        args: &str,
        base: &Input,
        shape: &ReplyShape,
        conn: &Connection,
    ) -> usize {
        let key = name.to_lowercase();
        let (key, record) = match self.tables.command(&key) {
            Some(record) => (key, record),
            None if self.definition.prefix_matching => {
                let candidates: Vec<&str> = self
                    .tables
                    .commands_with_prefix(name)
                    .into_iter()
                    .filter(|c| !self.config.is_command_disabled(c))
                    .collect();
                match candidates.as_slice() {
                    [] => return 0,
                    [only] => match self.tables.command(only) {
                        Some(record) => ((*only).to_string(), record),
                        None => return 0,
                    },
                    [init @ .., last] => {
                        let text = format!("did you mean {} or {}?", init.join(", "), last);
                        if let Some(response) = shape.shape(base, &text) {
                            push_response(conn.outbound(), response);
                        }
                        return 0;
                    }
                }
            }
            None => return 0,
        };

        let Behavior::Command { autohelp, .. } = &record.behavior else {
            return 0;
        };
        if self.config.is_command_disabled(&key) {
            log::debug!("Command {} is disabled", key);
            return 0;
        }

        if *autohelp && args.is_empty() {
            if let Some(help) = record.handler.help() {
                if let Some(response) = shape.shape(base, help) {
                    push_response(conn.outbound(), response);
                }
                return 0;
            }
        }

        let input = Input {
            trigger: key,
            inp: args.to_string(),
            ..base.clone()
        };
        usize::from(self.run(record, input, shape, conn))
    }

    /// Run or queue one handler. Returns false when the plugin is disabled.
    fn run(
        &self,
        record: &PluginRecord,
        mut input: Input,
        shape: &ReplyShape,
        conn: &Connection,
    ) -> bool {
        if self.config.is_plugin_disabled(&record.unit.name) {
            return false;
        }

        if let Some(key) = &record.api_key {
            input.api_key = self.config.api_keys.get(key).cloned();
            if input.api_key.is_none() {
                log::warn!(
                    "{} wants api key `{}`, which is not configured",
                    record.signature(),
                    key
                );
            }
        }

        let job = Job {
            input,
            reply: shape.clone(),
            outbound: Arc::clone(conn.outbound()),
        };

        if record.threaded {
            if let Err(job) = self.workers.submit(record.handler.id(), job) {
                log::warn!("No worker for {}; running inline", record.signature());
                job.run(&record.handler);
            }
        } else {
            job.run(&record.handler);
        }
        true
    }
}

/// Format a response for the console and logs.
#[must_use]
pub fn describe(conn: &str, response: &Response) -> String {
    format!("[{conn}] {response}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_command_in_channel() {
        let matcher = CommandMatcher::new(".", "bot", true).expect("matcher");
        assert_eq!(
            matcher.parse(".ping  now ", false),
            Some(("ping".to_string(), "now".to_string()))
        );
        assert_eq!(matcher.parse("ping", false), None);
        assert_eq!(matcher.parse(".", false), None);
    }

    #[test]
    fn test_nick_addressing() {
        let matcher = CommandMatcher::new(".", "bot", true).expect("matcher");
        assert_eq!(
            matcher.parse("bot: Weather paris", false),
            Some(("weather".to_string(), "paris".to_string()))
        );

        let strict = CommandMatcher::new(".", "bot", false).expect("matcher");
        assert_eq!(strict.parse("bot: weather paris", false), None);
    }

    #[test]
    fn test_private_message_prefix_optional() {
        let matcher = CommandMatcher::new(".", "bot", true).expect("matcher");
        assert_eq!(
            matcher.parse("ping", true),
            Some(("ping".to_string(), String::new()))
        );
    }

    #[test]
    fn test_multi_character_prefix_is_a_class() {
        let matcher = CommandMatcher::new(".!", "bot", false).expect("matcher");
        assert!(matcher.parse("!ping", false).is_some());
        assert!(matcher.parse(".ping", false).is_some());
        assert!(matcher.parse("?ping", false).is_none());
    }

    #[test]
    fn test_no_prefix_no_addressing_never_matches_channel() {
        let matcher = CommandMatcher::new("", "bot", false).expect("matcher");
        assert_eq!(matcher.parse(".ping", false), None);
        assert!(matcher.parse("ping", true).is_some());
    }
}
