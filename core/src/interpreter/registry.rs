//! Command registry
//!
//! Maps the keyword in front of `:` to a [`Command`]. Built once when the
//! engine is assembled and read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use super::commands;
use super::context::ExecContext;
use super::errors::CommandError;

/// Prepared arguments of one instruction (the Run half of a registration).
///
/// `run` may be called several times under the retry budget; `init` is not
/// repeated between attempts.
pub trait Invocation: Send {
    fn run(&mut self, ctx: &mut ExecContext) -> bool;
}

/// A registered command (the Init half plus the Async flag).
pub trait Command: Send + Sync {
    /// Validate `payload` and capture what `run` needs.
    fn init(&self, payload: &str, ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError>;

    /// Async commands start their own threads (registered on
    /// [`ExecContext::barrier`]) and are never forked by the loop.
    fn is_async(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct Registration {
    command: Arc<dyn Command>,
    is_async: bool,
}

impl Registration {
    pub fn command(&self) -> &dyn Command {
        self.command.as_ref()
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    commands: HashMap<String, Registration>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the control-flow commands.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        commands::register_builtins(&mut registry);
        registry
    }

    /// Add a command under `key`; a later registration replaces an earlier one.
    pub fn register(&mut self, key: &str, command: impl Command + 'static) -> &mut Self {
        let is_async = command.is_async();
        self.commands.insert(
            key.to_string(),
            Registration {
                command: Arc::new(command),
                is_async,
            },
        );
        self
    }

    pub fn get(&self, key: &str) -> Option<Registration> {
        self.commands.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.commands.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Registered keywords, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Invocation for Noop {
        fn run(&mut self, _ctx: &mut ExecContext) -> bool {
            true
        }
    }

    struct Plain;

    impl Command for Plain {
        fn init(&self, _payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
            Ok(Box::new(Noop))
        }
    }

    struct Background;

    impl Command for Background {
        fn init(&self, _payload: &str, _ctx: &ExecContext) -> Result<Box<dyn Invocation>, CommandError> {
            Ok(Box::new(Noop))
        }

        fn is_async(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = Registry::with_builtins();
        for key in [
            "call", "if", "ifEmpty", "ifArray", "switch", "for", "range", "return", "void",
            "break", "var",
        ] {
            assert!(registry.contains(key), "missing {}", key);
        }
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = Registry::new();
        registry.register("job", Plain);
        assert!(!registry.get("job").unwrap().is_async());
        registry.register("job", Background);
        assert!(registry.get("job").unwrap().is_async());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.keys(), vec!["job"]);
    }
}
