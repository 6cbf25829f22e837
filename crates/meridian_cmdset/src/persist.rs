//! Persistence of permanent command-set stack entries.
//!
//! Only sets marked `permanent` survive a restart, and they are stored as
//! ordered factory-key references, never as serialized instances. On
//! rebuild each reference is resolved through the [`CmdSetRegistry`]; a
//! reference that no longer resolves is replaced by an error-sentinel set
//! so the rest of the stack still loads.

use crate::registry::{error_sentinel_set, CmdSetRegistry};
use crate::stack::CommandSetStack;
use crate::CmdSetError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// On-disk shape of an actor's persistent stack: the default set's factory
/// key plus the layered permanent entries in push order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedStack {
    /// Factory key for the default (index 0) set.
    pub default_key: String,
    /// Factory keys of permanent layered entries, bottom first.
    pub entry_keys: Vec<String>,
}

impl PersistedStack {
    /// Captures the persistent portion of a live stack.
    ///
    /// Non-permanent layers are transient by definition and are skipped.
    pub async fn capture(stack: &CommandSetStack) -> Self {
        let snapshot = stack.snapshot().await;
        let default_key = snapshot[0].key.clone();
        let entry_keys = snapshot[1..]
            .iter()
            .filter(|set| set.permanent)
            .map(|set| set.key.clone())
            .collect();
        Self {
            default_key,
            entry_keys,
        }
    }

    /// Serializes to the stored JSON blob.
    pub fn to_json(&self) -> Result<String, CmdSetError> {
        serde_json::to_string(self).map_err(|e| CmdSetError::Snapshot(e.to_string()))
    }

    /// Parses a stored JSON blob.
    pub fn from_json(raw: &str) -> Result<Self, CmdSetError> {
        serde_json::from_str(raw).map_err(|e| CmdSetError::Snapshot(e.to_string()))
    }

    /// Rebuilds a live stack by re-resolving every reference in stored
    /// order.
    ///
    /// Unresolvable references become error-sentinel layers; an
    /// unresolvable default falls back to a sentinel default so the actor
    /// still has a working (if degraded) stack.
    pub async fn rebuild(&self, registry: &CmdSetRegistry) -> CommandSetStack {
        let default = match registry.try_resolve(&self.default_key) {
            Some(set) => set,
            None => {
                warn!(key = %self.default_key, "default command set failed to resolve");
                error_sentinel_set(&self.default_key)
            }
        };
        let stack = CommandSetStack::new(default);

        for key in &self.entry_keys {
            match registry.try_resolve(key) {
                Some(mut set) => {
                    // Entries were only persisted because they were
                    // permanent; re-mark in case the factory forgot.
                    set.permanent = true;
                    stack.push(set).await;
                }
                None => {
                    warn!(key = %key, "permanent command set failed to resolve, inserting sentinel");
                    stack.push(error_sentinel_set(key)).await;
                }
            }
        }

        debug!(
            default = %self.default_key,
            layers = self.entry_keys.len(),
            "rebuilt persistent command stack"
        );
        stack
    }
}
