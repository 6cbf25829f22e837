//! Remembered capability flags.
//!
//! When a logged-in session disconnects, a small display-relevant subset
//! of its negotiated flags is kept keyed by account, so the next login
//! from a dumb bootstrap connection can be styled the way the player
//! last saw the game. Durable storage is external; the trait below is
//! the seam and the in-memory store the reference implementation.

use meridian_session::{AccountUid, ProtocolFlagMap};
use dashmap::DashMap;

/// The flag keys worth remembering across connections.
const REMEMBERED_KEYS: &[&str] = &["ansi", "xterm256", "truecolor", "utf8", "screen_reader"];

/// Extracts the remembered subset from a full capability map.
pub fn remembered_subset(flags: &ProtocolFlagMap) -> ProtocolFlagMap {
    let mut subset = ProtocolFlagMap::new();
    for key in REMEMBERED_KEYS {
        if let Some(value) = flags.get(*key) {
            subset.insert((*key).to_string(), value.clone());
        }
    }
    subset
}

/// Per-account storage of remembered display flags.
pub trait FlagStore: Send + Sync {
    fn remember(&self, account: AccountUid, flags: ProtocolFlagMap);
    fn recall(&self, account: AccountUid) -> Option<ProtocolFlagMap>;
}

/// In-memory flag store.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    flags: DashMap<u64, ProtocolFlagMap>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlagStore {
    fn remember(&self, account: AccountUid, flags: ProtocolFlagMap) {
        self.flags.insert(account.0, flags);
    }

    fn recall(&self, account: AccountUid) -> Option<ProtocolFlagMap> {
        self.flags.get(&account.0).map(|f| f.clone())
    }
}
