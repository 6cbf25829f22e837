//! The puppet arena.
//!
//! Entities are the in-world bodies sessions control. The gateway never
//! sees an entity, only the numeric [`PuppetId`] mirrored in the session
//! record; everything else about an entity stays on this side of the
//! wire. Full in-world simulation is out of scope - the arena carries
//! exactly what puppet control needs.

use dashmap::DashMap;
use meridian_session::{AccountUid, LogicSessions, PuppetId, Sessid};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use uuid::Uuid;

/// One controllable entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: PuppetId,
    /// Stable internal identity, independent of the wire-visible id.
    pub key: Uuid,
    pub name: String,
    /// Owning account; only its sessions may puppet this entity.
    pub owner: AccountUid,
}

/// Result of a puppet-control attempt. Plain data, no control-flow
/// exceptions: callers match and answer the client in-band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PuppetOutcome {
    /// Control transferred.
    Ok(PuppetId),
    /// The session already controls an entity and must release it first.
    AlreadyPuppeting(PuppetId),
    /// The entity does not exist or belongs to another account.
    NoPermission,
    /// Another session controls this entity right now.
    AlreadyPuppeted(Sessid),
}

/// All entities known to this logic process.
#[derive(Debug, Default)]
pub struct EntityArena {
    entities: DashMap<u64, Entity>,
    next_id: AtomicU64,
}

impl EntityArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an entity owned by `owner`.
    pub fn create(&self, name: &str, owner: AccountUid) -> Entity {
        let id = PuppetId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let entity = Entity {
            id,
            key: Uuid::new_v4(),
            name: name.to_string(),
            owner,
        };
        self.entities.insert(id.0, entity.clone());
        info!(puppet = id.0, name, owner = owner.0, "entity created");
        entity
    }

    pub fn get(&self, id: PuppetId) -> Option<Entity> {
        self.entities.get(&id.0).map(|e| e.clone())
    }

    /// The account's first entity, creating a starter one when none
    /// exists yet.
    pub fn ensure_for_account(&self, owner: AccountUid, name: &str) -> Entity {
        if let Some(existing) = self
            .entities
            .iter()
            .find(|e| e.owner == owner)
            .map(|e| e.clone())
        {
            return existing;
        }
        self.create(name, owner)
    }

    /// Entities owned by an account.
    pub fn owned_by(&self, owner: AccountUid) -> Vec<Entity> {
        self.entities
            .iter()
            .filter(|e| e.owner == owner)
            .map(|e| e.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Attempts to give `sessid` control of `puppet`, checking ownership
    /// and exclusivity against the session registry. On success the
    /// registry is updated; the caller mirrors the returned state to the
    /// gateway.
    pub fn try_puppet(
        &self,
        sessions: &LogicSessions,
        sessid: Sessid,
        puppet: PuppetId,
    ) -> PuppetOutcome {
        let Some(record) = sessions.get(sessid) else {
            return PuppetOutcome::NoPermission;
        };
        if let Some(current) = record.puppet_id {
            return PuppetOutcome::AlreadyPuppeting(current);
        }
        let Some(entity) = self.get(puppet) else {
            return PuppetOutcome::NoPermission;
        };
        if record.account_uid != Some(entity.owner) {
            return PuppetOutcome::NoPermission;
        }
        if let Some(holder) = sessions.puppeteer(puppet) {
            return PuppetOutcome::AlreadyPuppeted(holder);
        }
        match sessions.set_puppet(sessid, Some(puppet)) {
            Ok(_) => PuppetOutcome::Ok(puppet),
            Err(_) => PuppetOutcome::NoPermission,
        }
    }
}
