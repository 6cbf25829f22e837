//! # Command-Set Merge Engine
//!
//! Every actor connected to the Meridian logic process carries a stack of
//! named command sets. The stack is folded bottom-to-top into a single
//! effective set (`current`) that the input router consults when dispatching
//! player input. Sets layered on top of the default can extend, restrict,
//! replace or subtract from the commands below them, which is how states
//! like "sitting at a table", "editing a description" or "building mode"
//! temporarily reshape what a player can type.
//!
//! ## Components
//!
//! * [`Command`] / [`CommandSet`] - the mergeable unit and its container
//! * [`MergeType`] - Union / Intersect / Replace / Remove combination rules
//! * [`CommandSetStack`] - per-actor stack with an atomically swapped fold
//! * [`CmdSetRegistry`] - startup-registered factories behind stable string
//!   keys, used to rebuild persisted stacks without runtime path imports
//!
//! ## Merge contract
//!
//! The fold starts from the default set (index 0) and combines each later
//! entry into the running result according to the *incoming* entry's own
//! merge type. On key collisions the command sourced from the higher
//! priority wins; ties go to the most recently pushed set. A broken
//! persisted reference never aborts a rebuild - it is swapped for a
//! single-command error-sentinel set that reports the failure in-band.

pub use registry::{error_sentinel_set, CmdSetFactory, CmdSetRegistry};
pub use set::{Command, CommandSet, MergeType};
pub use stack::{AppliedMerge, CommandSetStack, StackEntry};

pub mod persist;
pub mod registry;
pub mod set;
pub mod stack;

use thiserror::Error;

/// Errors surfaced by command-set operations.
///
/// These are deliberately narrow: merge folds themselves are total and
/// cannot fail, so errors only arise around stack mutation and persisted
/// reference resolution.
#[derive(Debug, Error)]
pub enum CmdSetError {
    /// Attempted to pop or remove the default (index 0) entry.
    #[error("the default command set cannot be removed, only replaced")]
    DefaultImmutable,

    /// No stack entry matched the given key.
    #[error("no command set with key '{0}' on the stack")]
    UnknownKey(String),

    /// A persisted factory key had no registered factory.
    #[error("no factory registered for command set key '{0}'")]
    UnresolvedFactory(String),

    /// Failed to read or parse a persisted stack snapshot.
    #[error("persisted stack snapshot invalid: {0}")]
    Snapshot(String),
}
