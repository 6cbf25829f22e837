//! Factory registry mapping stable string keys to command-set builders.
//!
//! Persisted stacks never store serialized set instances; they store the
//! keys registered here. Plugins register their factories once at process
//! start, and rebuilds resolve through this table. A missing key resolves
//! to an error-sentinel set rather than an error escaping to the caller.

use crate::set::{Command, CommandSet, MergeType};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;

/// A registered builder producing a fresh instance of a command set.
pub type CmdSetFactory = Arc<dyn Fn() -> CommandSet + Send + Sync>;

/// Startup-populated registry of command-set factories.
///
/// Constructed once per process and handed to the components that rebuild
/// persisted stacks; there is deliberately no global instance.
#[derive(Default)]
pub struct CmdSetRegistry {
    factories: DashMap<String, CmdSetFactory>,
}

impl CmdSetRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under a stable key, replacing any previous
    /// registration for that key.
    pub fn register<F>(&self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> CommandSet + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
    }

    /// Builds the set registered under `key`.
    ///
    /// A cache miss is absorbed here: the caller receives an error-sentinel
    /// set whose single command reports the failure in-band, so one broken
    /// reference cannot break an actor's whole stack.
    pub fn resolve(&self, key: &str) -> CommandSet {
        match self.factories.get(key) {
            Some(factory) => factory(),
            None => {
                warn!(key, "no factory registered for command set, using error sentinel");
                error_sentinel_set(key)
            }
        }
    }

    /// Like [`CmdSetRegistry::resolve`] but reports the miss to the caller.
    pub fn try_resolve(&self, key: &str) -> Option<CommandSet> {
        self.factories.get(key).map(|factory| factory())
    }

    /// Whether a factory is registered under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// True when nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Builds the sentinel set substituted for an unresolvable reference.
///
/// It carries exactly one unusable command whose sole effect is reporting
/// the resolution failure, merged as a no-priority Union so it cannot
/// shadow working layers.
pub fn error_sentinel_set(broken_key: &str) -> CommandSet {
    let mut set = CommandSet::new(format!("error:{broken_key}"), i32::MIN);
    set.mergetype = MergeType::Union;
    set.add(
        Command::new("__cmdset_error").with_help(format!(
            "command set '{broken_key}' failed to load; contact an administrator"
        )),
    );
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let registry = CmdSetRegistry::new();
        registry.register("combat", || {
            CommandSet::new("combat", 1).with_command(Command::new("attack"))
        });

        let set = registry.resolve("combat");
        assert_eq!(set.key, "combat");
        assert!(set.get("attack").is_some());
        // Each resolve builds a fresh instance.
        let again = registry.resolve("combat");
        assert_eq!(again.keys(), set.keys());
    }

    #[test]
    fn test_missing_key_yields_error_sentinel() {
        let registry = CmdSetRegistry::new();
        let set = registry.resolve("ghost");
        assert_eq!(set.key, "error:ghost");
        assert_eq!(set.len(), 1);
        assert!(set.get("__cmdset_error").is_some());
        assert!(registry.try_resolve("ghost").is_none());
    }
}
