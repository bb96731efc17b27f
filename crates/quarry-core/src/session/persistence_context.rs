//! First-level cache: one instance per entity identity per session.
//!
//! Entries move `Loading -> Managed -> {ReadOnly, Removed}`; `ReadOnly` may
//! return to `Managed`, and `Removed` is terminal until the entry is dropped
//! after the delete is flushed. Uninitialized references are kept apart from
//! entries until they are loaded.

use crate::error::Error;
use crate::metamodel::EntityDescriptor;
use crate::results::{EntityInstance, EntityKey, EntityRef};
use crate::value::{Identifier, Value};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::trace;

/// Lifecycle state of a persistence-context entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// Being hydrated by a query or loader.
    Loading,
    Managed,
    /// Managed but excluded from dirty checking.
    ReadOnly,
    /// Scheduled for deletion.
    Removed,
}

/// Disassembled attribute state, one slot per attribute.
pub type LoadedState = Vec<Vec<Value>>;

#[derive(Debug)]
pub struct EntityEntry {
    pub instance: EntityRef,
    pub status: EntityStatus,
    /// State as last read from or written to the database; `None` until the
    /// entity exists there.
    pub loaded_state: Option<LoadedState>,
    pub exists_in_database: bool,
}

#[derive(Debug, Default)]
pub struct PersistenceContext {
    entries: HashMap<EntityKey, EntityEntry>,
    /// Keys in the order they entered the context; flush follows it.
    order: Vec<EntityKey>,
    proxies: HashMap<EntityKey, EntityRef>,
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, key: &EntityKey) -> Option<&EntityEntry> {
        self.entries.get(key)
    }

    pub fn status(&self, key: &EntityKey) -> Option<EntityStatus> {
        self.entries.get(key).map(|e| e.status)
    }

    /// The instance known for `key`: a managed one, or an uninitialized reference.
    pub fn instance(&self, key: &EntityKey) -> Option<EntityRef> {
        self.entries
            .get(key)
            .map(|e| Rc::clone(&e.instance))
            .or_else(|| self.proxies.get(key).cloned())
    }

    /// The existing instance for the identity or a new uninitialized reference.
    pub fn reference(&mut self, descriptor: &Arc<EntityDescriptor>, id: Identifier) -> EntityRef {
        let key = EntityKey::of(descriptor, id.clone());
        if let Some(entry) = self.entries.get(&key) {
            return Rc::clone(&entry.instance);
        }
        Rc::clone(self.proxies.entry(key).or_insert_with(|| {
            trace!(entity = %descriptor.name, %id, "created lazy reference");
            EntityInstance::proxy(Arc::clone(descriptor), id).into_ref()
        }))
    }

    /// Take the uninitialized reference for `key` so it can be hydrated in place.
    pub fn take_proxy(&mut self, key: &EntityKey) -> Option<EntityRef> {
        self.proxies.remove(key)
    }

    /// `ABSENT -> LOADING`.
    pub fn begin_loading(&mut self, key: EntityKey, instance: EntityRef) -> Result<(), Error> {
        if let Some(existing) = self.entries.get(&key) {
            return Err(Error::IllegalState(format!(
                "{} is already {:?} in the persistence context",
                key, existing.status
            )));
        }
        trace!(%key, "loading");
        self.insert(
            key,
            EntityEntry {
                instance,
                status: EntityStatus::Loading,
                loaded_state: None,
                exists_in_database: true,
            },
        );
        Ok(())
    }

    /// `LOADING -> MANAGED` (or `READ_ONLY`).
    pub fn finish_loading(
        &mut self,
        key: &EntityKey,
        loaded_state: LoadedState,
        read_only: bool,
    ) -> Result<(), Error> {
        let entry = self.expect_entry(key)?;
        if entry.status != EntityStatus::Loading {
            return Err(Error::IllegalState(format!(
                "{} finished loading while {:?}",
                key, entry.status
            )));
        }
        entry.status = if read_only {
            EntityStatus::ReadOnly
        } else {
            EntityStatus::Managed
        };
        entry.loaded_state = Some(loaded_state);
        trace!(%key, status = ?entry.status, "loaded");
        Ok(())
    }

    /// Drop an entry whose load failed.
    pub fn abort_loading(&mut self, key: &EntityKey) {
        if self.status(key) == Some(EntityStatus::Loading) {
            self.remove_entry(key);
        }
    }

    /// A new instance scheduled for insertion: `ABSENT -> MANAGED`.
    pub fn add_new(&mut self, key: EntityKey, instance: EntityRef) -> Result<(), Error> {
        if let Some(existing) = self.entries.get(&key) {
            return Err(Error::IllegalState(format!(
                "a different instance with identity {} is already {:?}",
                key, existing.status
            )));
        }
        self.proxies.remove(&key);
        trace!(%key, "persisted");
        self.insert(
            key,
            EntityEntry {
                instance,
                status: EntityStatus::Managed,
                loaded_state: None,
                exists_in_database: false,
            },
        );
        Ok(())
    }

    /// `MANAGED <-> READ_ONLY`. Leaving read-only takes a fresh snapshot.
    pub fn set_read_only(
        &mut self,
        key: &EntityKey,
        read_only: bool,
        snapshot: Option<LoadedState>,
    ) -> Result<(), Error> {
        let entry = self.expect_entry(key)?;
        match (entry.status, read_only) {
            (EntityStatus::Managed, true) => entry.status = EntityStatus::ReadOnly,
            (EntityStatus::ReadOnly, false) => {
                entry.status = EntityStatus::Managed;
                if let (true, Some(snapshot)) = (entry.exists_in_database, snapshot) {
                    entry.loaded_state = Some(snapshot);
                }
            }
            (EntityStatus::Managed, false) | (EntityStatus::ReadOnly, true) => {}
            (status, _) => {
                return Err(Error::IllegalState(format!(
                    "cannot change read-only mode of {} while {:?}",
                    key, status
                )))
            }
        }
        trace!(%key, status = ?entry.status, "read-only mode changed");
        Ok(())
    }

    /// `MANAGED | READ_ONLY -> REMOVED`. Returns whether the entity exists in
    /// the database; a never-flushed instance is simply dropped.
    pub fn mark_removed(&mut self, key: &EntityKey) -> Result<bool, Error> {
        let entry = self.expect_entry(key)?;
        match entry.status {
            EntityStatus::Managed | EntityStatus::ReadOnly => {}
            status => {
                return Err(Error::IllegalState(format!(
                    "cannot remove {} while {:?}",
                    key, status
                )))
            }
        }
        if !entry.exists_in_database {
            self.remove_entry(key);
            trace!(%key, "removed before insert");
            return Ok(false);
        }
        entry.status = EntityStatus::Removed;
        trace!(%key, "removed");
        Ok(true)
    }

    /// Record state written by a flush.
    pub fn mark_flushed(&mut self, key: &EntityKey, state: LoadedState) -> Result<(), Error> {
        let entry = self.expect_entry(key)?;
        entry.loaded_state = Some(state);
        entry.exists_in_database = true;
        Ok(())
    }

    pub fn remove_entry(&mut self, key: &EntityKey) -> Option<EntityEntry> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(entry)
    }

    /// Detach an entity (and any uninitialized reference to it).
    pub fn evict(&mut self, key: &EntityKey) -> Option<EntityEntry> {
        self.proxies.remove(key);
        let entry = self.remove_entry(key);
        if entry.is_some() {
            trace!(%key, "evicted");
        }
        entry
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.proxies.clear();
    }

    /// Key of `instance` if this context manages that very instance.
    pub fn key_of(&self, instance: &EntityRef) -> Option<EntityKey> {
        let key = instance.try_borrow().ok()?.key()?;
        let entry = self.entries.get(&key)?;
        Rc::ptr_eq(&entry.instance, instance).then_some(key)
    }

    pub fn contains(&self, instance: &EntityRef) -> bool {
        self.key_of(instance)
            .and_then(|key| self.status(&key))
            .map(|status| status != EntityStatus::Removed)
            .unwrap_or(false)
    }

    /// Entries in the order they entered the context.
    pub fn entries(&self) -> impl Iterator<Item = (&EntityKey, &EntityEntry)> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key).map(|entry| (key, entry)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, key: EntityKey, entry: EntityEntry) {
        self.order.push(key.clone());
        self.entries.insert(key, entry);
    }

    fn expect_entry(&mut self, key: &EntityKey) -> Result<&mut EntityEntry, Error> {
        self.entries
            .get_mut(key)
            .ok_or_else(|| Error::IllegalState(format!("{} is not in the persistence context", key)))
    }
}
