//! Command and command-set definitions plus the merge fold primitives.
//!
//! A [`CommandSet`] is a named, prioritized collection of [`Command`]s with
//! a [`MergeType`] describing how it combines with whatever sits below it
//! on an actor's stack. The fold itself operates on a working map that
//! remembers, per command, the priority of the set that contributed it -
//! that source priority is what collision resolution compares.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single invocable command as seen by the input router.
///
/// The command body (what actually runs) lives with the logic process;
/// this record carries only the dispatch surface: key, aliases, a help
/// blurb and a lock string evaluated by the access layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Primary name the router matches on (lowercased at construction).
    pub key: String,
    /// Alternative names that resolve to the same command.
    pub aliases: Vec<String>,
    /// One-line help text shown by the help system.
    pub help: String,
    /// Access lock expression, evaluated by the caller's lock handler.
    pub locks: String,
}

impl Command {
    /// Creates a command with no aliases, help or locks.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into().to_lowercase(),
            aliases: Vec::new(),
            help: String::new(),
            locks: String::new(),
        }
    }

    /// Builder-style alias attachment.
    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_lowercase()).collect();
        self
    }

    /// Builder-style help attachment.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// Returns true if `name` matches the key or any alias.
    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.key == name || self.aliases.iter().any(|a| *a == name)
    }
}

/// How an incoming command set combines with the running fold result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeType {
    /// Keep all commands from both sides; collisions resolve by priority,
    /// ties prefer the incoming (most recently pushed) set.
    Union,
    /// Keep only commands whose key exists on both sides. Used to restrict
    /// an actor to a subset of its normal commands.
    Intersect,
    /// The incoming set's commands supplant same-key commands outright.
    /// Unlisted base commands survive only if they outrank the stack's
    /// default layer or the incoming priority; leftovers from the default
    /// layer are cleared.
    Replace,
    /// Subtract the incoming set's keys from the running result. The
    /// incoming set contributes no commands of its own.
    Remove,
}

impl Default for MergeType {
    fn default() -> Self {
        MergeType::Union
    }
}

/// A named, prioritized, mergeable collection of commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSet {
    /// Stable identifier; also the lookup key for stack removal and for
    /// the factory registry when the set is persisted.
    pub key: String,
    /// Merge precedence; higher wins on key collisions.
    pub priority: i32,
    /// How this set combines with the fold result beneath it.
    pub mergetype: MergeType,
    /// Whether the set survives a restart (persisted as a factory key,
    /// never as a serialized instance).
    pub permanent: bool,
    /// The commands this set contributes, keyed by command key.
    pub commands: HashMap<String, Command>,
}

impl CommandSet {
    /// Creates an empty set with [`MergeType::Union`] and the given priority.
    pub fn new(key: impl Into<String>, priority: i32) -> Self {
        Self {
            key: key.into(),
            priority,
            mergetype: MergeType::Union,
            permanent: false,
            commands: HashMap::new(),
        }
    }

    /// Builder-style merge type selection.
    pub fn with_mergetype(mut self, mergetype: MergeType) -> Self {
        self.mergetype = mergetype;
        self
    }

    /// Builder-style permanent marking.
    pub fn permanent(mut self) -> Self {
        self.permanent = true;
        self
    }

    /// Adds a command, replacing any previous command with the same key.
    pub fn add(&mut self, command: Command) {
        self.commands.insert(command.key.clone(), command);
    }

    /// Builder-style [`CommandSet::add`].
    pub fn with_command(mut self, command: Command) -> Self {
        self.add(command);
        self
    }

    /// Looks up a command by key or alias.
    pub fn get(&self, name: &str) -> Option<&Command> {
        let lowered = name.to_lowercase();
        self.commands
            .get(&lowered)
            .or_else(|| self.commands.values().find(|c| c.matches(&lowered)))
    }

    /// Number of commands in the set.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True if the set carries no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sorted command keys, mainly for diagnostics and tests.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.commands.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// A command in the working fold state, tagged with the priority of the
/// set that contributed it.
#[derive(Debug, Clone)]
pub(crate) struct RankedCommand {
    pub command: Command,
    pub source_priority: i32,
}

/// Working state of a fold in progress.
///
/// Starts from the default layer and absorbs one stack entry at a time.
/// `default_priority` is remembered so Replace can tell default-layer
/// leftovers from later layered additions.
#[derive(Debug)]
pub(crate) struct WorkingSet {
    pub entries: HashMap<String, RankedCommand>,
    pub default_priority: i32,
}

impl WorkingSet {
    /// Seeds the working state from the stack's default set.
    pub fn from_default(default: &CommandSet) -> Self {
        let entries = default
            .commands
            .values()
            .map(|c| {
                (
                    c.key.clone(),
                    RankedCommand {
                        command: c.clone(),
                        source_priority: default.priority,
                    },
                )
            })
            .collect();
        Self {
            entries,
            default_priority: default.priority,
        }
    }

    /// Absorbs `incoming` into the working state under `mergetype`.
    ///
    /// `mergetype` is normally `incoming.mergetype` but may be overridden
    /// per call (the stack records which one was actually applied).
    pub fn absorb(&mut self, incoming: &CommandSet, mergetype: MergeType) {
        match mergetype {
            MergeType::Union => {
                for cmd in incoming.commands.values() {
                    let replace = match self.entries.get(&cmd.key) {
                        // Tie goes to the incoming set.
                        Some(existing) => incoming.priority >= existing.source_priority,
                        None => true,
                    };
                    if replace {
                        self.entries.insert(
                            cmd.key.clone(),
                            RankedCommand {
                                command: cmd.clone(),
                                source_priority: incoming.priority,
                            },
                        );
                    }
                }
            }
            MergeType::Intersect => {
                self.entries.retain(|key, _| incoming.commands.contains_key(key));
                for cmd in incoming.commands.values() {
                    if let Some(existing) = self.entries.get_mut(&cmd.key) {
                        if incoming.priority >= existing.source_priority {
                            existing.command = cmd.clone();
                            existing.source_priority = incoming.priority;
                        }
                    }
                }
            }
            MergeType::Replace => {
                let default_priority = self.default_priority;
                self.entries.retain(|key, ranked| {
                    if incoming.commands.contains_key(key) {
                        // Same-key commands are supplanted below.
                        return false;
                    }
                    // Layered additions above the default survive, as does
                    // anything outranking the incoming set. Default-layer
                    // leftovers are cleared.
                    ranked.source_priority > incoming.priority
                        || ranked.source_priority > default_priority
                });
                for cmd in incoming.commands.values() {
                    self.entries.insert(
                        cmd.key.clone(),
                        RankedCommand {
                            command: cmd.clone(),
                            source_priority: incoming.priority,
                        },
                    );
                }
            }
            MergeType::Remove => {
                self.entries.retain(|key, _| !incoming.commands.contains_key(key));
            }
        }
    }

    /// Finalizes the fold into a plain [`CommandSet`] carrying the given
    /// identity fields.
    pub fn finish(self, key: &str, priority: i32) -> CommandSet {
        CommandSet {
            key: key.to_string(),
            priority,
            mergetype: MergeType::Union,
            permanent: false,
            commands: self
                .entries
                .into_iter()
                .map(|(k, ranked)| (k, ranked.command))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(key: &str, priority: i32, mergetype: MergeType, cmds: &[&str]) -> CommandSet {
        let mut s = CommandSet::new(key, priority).with_mergetype(mergetype);
        for c in cmds {
            s.add(Command::new(*c));
        }
        s
    }

    #[test]
    fn test_union_keeps_both_sides() {
        let base = set("default", 0, MergeType::Union, &["look", "say"]);
        let top = set("combat", 1, MergeType::Union, &["attack", "flee"]);

        let mut work = WorkingSet::from_default(&base);
        work.absorb(&top, MergeType::Union);
        let merged = work.finish("current", 0);

        assert_eq!(merged.keys(), vec!["attack", "flee", "look", "say"]);
    }

    #[test]
    fn test_union_collision_higher_priority_wins() {
        let mut base = set("default", 5, MergeType::Union, &[]);
        base.add(Command::new("look").with_help("base look"));
        let mut low = set("low", 1, MergeType::Union, &[]);
        low.add(Command::new("look").with_help("low look"));

        let mut work = WorkingSet::from_default(&base);
        work.absorb(&low, MergeType::Union);
        let merged = work.finish("current", 0);

        assert_eq!(merged.get("look").unwrap().help, "base look");
    }

    #[test]
    fn test_union_tie_prefers_incoming() {
        let mut base = set("default", 1, MergeType::Union, &[]);
        base.add(Command::new("look").with_help("old"));
        let mut top = set("top", 1, MergeType::Union, &[]);
        top.add(Command::new("look").with_help("new"));

        let mut work = WorkingSet::from_default(&base);
        work.absorb(&top, MergeType::Union);
        let merged = work.finish("current", 0);

        assert_eq!(merged.get("look").unwrap().help, "new");
    }

    #[test]
    fn test_intersect_restricts_to_shared_keys() {
        let base = set("default", 0, MergeType::Union, &["look", "say", "quit"]);
        let restrict = set("jail", 1, MergeType::Intersect, &["look", "say"]);

        let mut work = WorkingSet::from_default(&base);
        work.absorb(&restrict, MergeType::Intersect);
        let merged = work.finish("current", 0);

        assert_eq!(merged.keys(), vec!["look", "say"]);
    }

    #[test]
    fn test_remove_subtracts_and_contributes_nothing() {
        let base = set("default", 0, MergeType::Union, &["look", "say", "shout"]);
        let gag = set("gag", 10, MergeType::Remove, &["say", "shout"]);

        let mut work = WorkingSet::from_default(&base);
        work.absorb(&gag, MergeType::Remove);
        let merged = work.finish("current", 0);

        assert_eq!(merged.keys(), vec!["look"]);
    }

    #[test]
    fn test_replace_supplants_same_key_and_clears_default_leftovers() {
        let base = set("default", 0, MergeType::Union, &["look", "say"]);
        let mut editor = set("editor", 2, MergeType::Replace, &[]);
        editor.add(Command::new("look").with_help("editor look"));
        editor.add(Command::new("write"));

        let mut work = WorkingSet::from_default(&base);
        work.absorb(&editor, MergeType::Replace);
        let merged = work.finish("current", 0);

        // `say` came from the default layer and is cleared; `look` is
        // supplanted by the editor's version.
        assert_eq!(merged.keys(), vec!["look", "write"]);
        assert_eq!(merged.get("look").unwrap().help, "editor look");
    }

    #[test]
    fn test_alias_matching() {
        let cmd = Command::new("look").with_aliases(&["l", "examine"]);
        assert!(cmd.matches("look"));
        assert!(cmd.matches("L"));
        assert!(cmd.matches("examine"));
        assert!(!cmd.matches("glance"));
    }
}
