// memory.rs - In-memory object store.
//
// Objects are kept serialized, keyed by kind and identity, so one store can
// hold every kind the operator touches. Create and update calls are counted
// to let tests assert on write amplification.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Fetched, ResourceStore, StoreError};
use crate::meta::{ObjectKey, ObjectMeta, Resource};

/// (apiVersion, kind, identity). Kinds of the same name in different
/// groups live side by side.
type Slot = (&'static str, &'static str, ObjectKey);

fn slot<K: Resource>(key: ObjectKey) -> Slot {
    (K::API_VERSION, K::KIND, key)
}

/// Number of create and update calls a store has accepted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteCounts {
    pub creates: usize,
    pub updates: usize,
}

impl WriteCounts {
    pub fn total(&self) -> usize {
        self.creates + self.updates
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<Slot, serde_json::Value>>,
    last_version: AtomicU64,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `object` unconditionally, as if another client wrote it.
    /// Not counted as a write.
    pub fn put<K: Resource>(&self, mut object: K) -> Result<K, StoreError> {
        self.stamp(object.meta_mut());
        let value = serde_json::to_value(&object)?;
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects.insert(slot::<K>(object.key()), value);
        Ok(object)
    }

    /// Drop the object at `key`, as if another client deleted it.
    pub fn remove<K: Resource>(&self, key: &ObjectKey) -> bool {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects.remove(&slot::<K>(key.clone())).is_some()
    }

    /// Read an object without going through the async capability.
    pub fn get<K: Resource>(&self, key: &ObjectKey) -> Option<K> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let value = objects.get(&slot::<K>(key.clone()))?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Every stored object of kind `K`, sorted by key.
    pub fn list<K: Resource>(&self) -> Vec<K> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<(ObjectKey, K)> = objects
            .iter()
            .filter(|((api_version, kind, _), _)| {
                *api_version == K::API_VERSION && *kind == K::KIND
            })
            .filter_map(|((_, _, key), value)| {
                serde_json::from_value(value.clone()).ok().map(|o| (key.clone(), o))
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found.into_iter().map(|(_, object)| object).collect()
    }

    pub fn write_counts(&self) -> WriteCounts {
        WriteCounts {
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
        }
    }

    pub fn reset_write_counts(&self) {
        self.creates.store(0, Ordering::SeqCst);
        self.updates.store(0, Ordering::SeqCst);
    }

    fn stamp(&self, meta: &mut ObjectMeta) {
        if meta.uid.is_none() {
            meta.uid = Some(Uuid::new_v4().to_string());
        }
        let version = self.last_version.fetch_add(1, Ordering::SeqCst) + 1;
        meta.resource_version = Some(version.to_string());
    }
}

fn stored_version(value: &serde_json::Value) -> Option<String> {
    value["metadata"]["resourceVersion"].as_str().map(str::to_string)
}

#[async_trait]
impl<K: Resource> ResourceStore<K> for MemoryStore {
    async fn fetch(&self, key: &ObjectKey) -> Fetched<K> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        match objects.get(&slot::<K>(key.clone())) {
            None => Fetched::Absent,
            Some(value) => match serde_json::from_value(value.clone()) {
                Ok(object) => Fetched::Found(object),
                Err(e) => Fetched::Failed(e.into()),
            },
        }
    }

    async fn create(&self, mut object: K) -> Result<K, StoreError> {
        let key = object.key();
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        let at = slot::<K>(key.clone());
        if objects.contains_key(&at) {
            return Err(StoreError::AlreadyExists { kind: K::KIND, key });
        }

        self.stamp(object.meta_mut());
        objects.insert(at, serde_json::to_value(&object)?);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(object)
    }

    async fn update(&self, mut object: K) -> Result<K, StoreError> {
        let key = object.key();
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        let at = slot::<K>(key.clone());
        let Some(current) = objects.get(&at) else {
            return Err(StoreError::NotFound { kind: K::KIND, key });
        };

        let stored = stored_version(current);
        let sent = object.meta().resource_version.clone();
        if sent != stored {
            return Err(StoreError::Conflict {
                kind: K::KIND,
                key,
                sent,
                stored,
            });
        }

        self.stamp(object.meta_mut());
        objects.insert(at, serde_json::to_value(&object)?);
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(object)
    }
}
