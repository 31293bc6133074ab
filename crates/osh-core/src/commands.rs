//! Command registry and dispatcher.
//!
//! The registry is built once at process start by [`CommandRegistry::builtin`]
//! (or assembled manually with [`register`](CommandRegistry::register)) and is
//! read-only afterwards: registration is not safe to interleave with dispatch,
//! and nothing here does so.
//!
//! Command failures are user output, not protocol errors — the dispatcher
//! renders a handler's error message as a line of text for the remote user
//! and never fails the caller.

use crate::error::OshResult;
use crate::identity::Identity;
use std::collections::HashMap;

/// A registered command handler.
///
/// Pure function of the identity, the argument string, and whatever the
/// handler itself reads from the ambient file system. The registry reference
/// exists so `help` can enumerate its peers.
pub type CommandHandler =
    fn(&CommandRegistry, Option<&Identity>, &str) -> OshResult<String>;

/// Mapping from command name to handler.
pub struct CommandRegistry {
    handlers: HashMap<&'static str, CommandHandler>,
}

impl CommandRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The registry with all built-in commands.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("pwd", cmd_pwd);
        registry.register("ls", cmd_ls);
        registry.register("cat", cmd_cat);
        registry.register("echo", cmd_echo);
        registry.register("clear", cmd_clear);
        registry.register("exit", cmd_exit);
        registry.register("help", cmd_help);
        registry.register("whoami", cmd_whoami);
        registry
    }

    /// Register a handler. The last registration for a name wins.
    pub fn register(&mut self, name: &'static str, handler: CommandHandler) {
        self.handlers.insert(name, handler);
    }

    /// Registered command names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Look up and invoke the handler for `command`.
    ///
    /// Unknown commands and handler failures both come back as output text.
    pub fn dispatch(&self, identity: Option<&Identity>, command: &str, argument: &str) -> String {
        match self.handlers.get(command) {
            Some(handler) => match handler(self, identity, argument) {
                Ok(output) => output,
                Err(e) => format!("{e}\n"),
            },
            None => "Unknown command\n".to_string(),
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Split a raw line into a command token and the remainder argument string.
///
/// The split is at the first whitespace; with no whitespace the argument
/// string is empty. An empty line yields an empty command token, which
/// resolves to "Unknown command" at dispatch.
pub fn parse_line(line: &str) -> (&str, &str) {
    match line.split_once(|c: char| c.is_whitespace()) {
        Some((command, argument)) => (command, argument),
        None => (line, ""),
    }
}

// ── Built-in handlers ─────────────────────────────────────────────────

fn cmd_pwd(_: &CommandRegistry, _: Option<&Identity>, _: &str) -> OshResult<String> {
    let dir = std::env::current_dir()?;
    Ok(format!("{}\n", dir.display()))
}

fn cmd_ls(_: &CommandRegistry, _: Option<&Identity>, _: &str) -> OshResult<String> {
    // Directory read order, not sorted.
    let mut names = Vec::new();
    for entry in std::fs::read_dir(".")? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    Ok(format!("{}\n", names.join("\n")))
}

fn cmd_cat(_: &CommandRegistry, _: Option<&Identity>, argument: &str) -> OshResult<String> {
    let Some(file_name) = argument.split_whitespace().next() else {
        return Ok("Usage: cat <file>\n".to_string());
    };
    let contents = std::fs::read_to_string(file_name)?;
    Ok(format!("{contents}\n"))
}

fn cmd_echo(_: &CommandRegistry, _: Option<&Identity>, argument: &str) -> OshResult<String> {
    Ok(format!("You echoed: {argument}\n"))
}

fn cmd_clear(_: &CommandRegistry, _: Option<&Identity>, _: &str) -> OshResult<String> {
    Ok("\x1b[H\x1b[2J".to_string())
}

fn cmd_exit(_: &CommandRegistry, _: Option<&Identity>, _: &str) -> OshResult<String> {
    Ok("Bye\n".to_string())
}

fn cmd_help(registry: &CommandRegistry, _: Option<&Identity>, _: &str) -> OshResult<String> {
    let names: Vec<&str> = registry.names().collect();
    Ok(format!("Available commands:\n{}\n", names.join("\n")))
}

fn cmd_whoami(_: &CommandRegistry, identity: Option<&Identity>, _: &str) -> OshResult<String> {
    let username = identity
        .map(|id| id.username.as_str())
        .filter(|u| !u.is_empty())
        .unwrap_or("anonymous");
    Ok(format!("You are {username}\n"))
}
