//! Per-actor command-set stacks with atomically swapped fold results.
//!
//! The stack owns an ordered list of [`CommandSet`]s; index 0 is the
//! default set, which can only ever be replaced. Every mutation re-runs
//! the bottom-to-top fold and swaps the `current` pointer in one motion.
//! Readers clone the `Arc` and keep a consistent view even while a writer
//! is mid-mutation; the single-writer rule per actor is enforced by the
//! async mutex around the entry list.

use crate::set::{CommandSet, MergeType, WorkingSet};
use crate::CmdSetError;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::debug;

/// Fold key used for the synthesized `current` set.
const CURRENT_KEY: &str = "current";

/// One layer of the stack: the set plus an optional per-push merge-type
/// override (e.g. a forced Union) that takes precedence over the set's own
/// merge type during the fold.
#[derive(Debug, Clone)]
pub struct StackEntry {
    pub set: CommandSet,
    pub override_mergetype: Option<MergeType>,
}

/// Diagnostics record of which merge type was actually applied at each
/// stack position during the most recent fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMerge {
    /// Key of the set at this position.
    pub key: String,
    /// The merge type the set itself asked for.
    pub requested: MergeType,
    /// The merge type the fold actually used (differs when overridden).
    pub applied: MergeType,
}

#[derive(Debug)]
struct StackInner {
    entries: Vec<StackEntry>,
    trail: Vec<AppliedMerge>,
}

/// An actor's command-set stack.
///
/// Mutating operations (`push`, `pop`, `remove`, `clear`, `set_default`)
/// serialize through an internal async mutex; [`CommandSetStack::current`]
/// never blocks on it.
#[derive(Debug)]
pub struct CommandSetStack {
    inner: Mutex<StackInner>,
    current: RwLock<Arc<CommandSet>>,
}

impl CommandSetStack {
    /// Creates a stack seeded with its default set.
    pub fn new(default: CommandSet) -> Self {
        let entry = StackEntry {
            set: default,
            override_mergetype: None,
        };
        let (current, trail) = fold(std::slice::from_ref(&entry));
        Self {
            inner: Mutex::new(StackInner {
                entries: vec![entry],
                trail,
            }),
            current: RwLock::new(Arc::new(current)),
        }
    }

    /// The effective command set. Cheap: clones an `Arc` under a read lock.
    ///
    /// A caller holding the returned `Arc` keeps a valid, fully folded set
    /// even if the stack mutates afterwards.
    pub fn current(&self) -> Arc<CommandSet> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Pushes a set on top of the stack and refolds.
    pub async fn push(&self, set: CommandSet) {
        self.push_with(set, None).await;
    }

    /// Pushes a set with a per-call merge-type override.
    pub async fn push_with(&self, set: CommandSet, override_mergetype: Option<MergeType>) {
        let mut inner = self.inner.lock().await;
        debug!(key = %set.key, "pushing command set");
        inner.entries.push(StackEntry {
            set,
            override_mergetype,
        });
        self.refold(&mut inner);
    }

    /// Replaces the default (index 0) set and refolds.
    pub async fn set_default(&self, set: CommandSet) {
        let mut inner = self.inner.lock().await;
        inner.entries[0] = StackEntry {
            set,
            override_mergetype: None,
        };
        self.refold(&mut inner);
    }

    /// Pops the topmost non-default entry.
    pub async fn pop(&self) -> Result<CommandSet, CmdSetError> {
        let mut inner = self.inner.lock().await;
        if inner.entries.len() <= 1 {
            return Err(CmdSetError::DefaultImmutable);
        }
        let entry = inner.entries.pop().expect("stack length checked above");
        self.refold(&mut inner);
        Ok(entry.set)
    }

    /// Removes every non-default entry whose set key matches.
    ///
    /// Returns how many entries were dropped.
    pub async fn remove(&self, key: &str) -> Result<usize, CmdSetError> {
        let mut inner = self.inner.lock().await;
        let before = inner.entries.len();
        // Index 0 stays untouchable.
        let default = inner.entries.remove(0);
        inner.entries.retain(|e| e.set.key != key);
        inner.entries.insert(0, default);
        let dropped = before - inner.entries.len();
        if dropped == 0 {
            return Err(CmdSetError::UnknownKey(key.to_string()));
        }
        self.refold(&mut inner);
        Ok(dropped)
    }

    /// Truncates the stack to just the default set.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.truncate(1);
        self.refold(&mut inner);
    }

    /// Number of entries including the default.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// The applied-mergetype trail from the most recent fold.
    pub async fn trail(&self) -> Vec<AppliedMerge> {
        self.inner.lock().await.trail.clone()
    }

    /// Snapshot of the stacked sets, bottom first. Used by persistence and
    /// by tests that recompute the fold from scratch.
    pub async fn snapshot(&self) -> Vec<CommandSet> {
        self.inner
            .lock()
            .await
            .entries
            .iter()
            .map(|e| e.set.clone())
            .collect()
    }

    fn refold(&self, inner: &mut StackInner) {
        let (current, trail) = fold(&inner.entries);
        inner.trail = trail;
        let mut slot = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Arc::new(current);
    }
}

/// Folds a slice of stack entries, bottom-to-top, into the effective set
/// plus the applied-mergetype trail.
///
/// Exposed within the crate so tests can verify that incremental refolds
/// agree with a from-scratch recomputation.
pub(crate) fn fold(entries: &[StackEntry]) -> (CommandSet, Vec<AppliedMerge>) {
    let default = &entries[0].set;
    let mut work = WorkingSet::from_default(default);
    let mut trail = vec![AppliedMerge {
        key: default.key.clone(),
        requested: default.mergetype,
        applied: default.mergetype,
    }];

    for entry in &entries[1..] {
        let applied = entry.override_mergetype.unwrap_or(entry.set.mergetype);
        work.absorb(&entry.set, applied);
        trail.push(AppliedMerge {
            key: entry.set.key.clone(),
            requested: entry.set.mergetype,
            applied,
        });
    }

    (work.finish(CURRENT_KEY, default.priority), trail)
}
