//! In-memory store backend.

use super::{Store, StoreRecord, Version};
use crate::error::StoreError;
use crate::sync::lock;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct InMemoryState {
    /// Live records, ordered so prefix scans are range queries.
    records: BTreeMap<Vec<u8>, (Vec<u8>, Version)>,
    /// Last version of deleted keys. A recreated key continues from here.
    tombstones: HashMap<Vec<u8>, Version>,
}

/// Process-local [`Store`] with atomic compare-and-set semantics.
///
/// All operations take a single lock for their whole duration, so every write is
/// all-or-nothing with respect to concurrent readers and writers.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        lock(&self.state).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn read(&self, key: &[u8]) -> Result<Option<StoreRecord>, StoreError> {
        let state = lock(&self.state);
        Ok(state.records.get(key).map(|(value, version)| StoreRecord {
            key: key.to_vec(),
            value: value.clone(),
            version: *version,
        }))
    }

    async fn write(
        &self,
        key: &[u8],
        value: Vec<u8>,
        expected: Option<Version>,
    ) -> Result<Version, StoreError> {
        let mut state = lock(&self.state);
        let actual = state.records.get(key).map(|(_, version)| *version);
        if actual != expected {
            return Err(StoreError::Conflict { expected, actual });
        }
        let version = match actual {
            Some(current) => current.next(),
            None => state
                .tombstones
                .remove(key)
                .map(Version::next)
                .unwrap_or(Version::INITIAL),
        };
        state.records.insert(key.to_vec(), (value, version));
        Ok(version)
    }

    async fn delete(&self, key: &[u8], expected: Option<Version>) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        let actual = state.records.get(key).map(|(_, version)| *version);
        if actual != expected {
            return Err(StoreError::Conflict { expected, actual });
        }
        if let Some((_, version)) = state.records.remove(key) {
            state.tombstones.insert(key.to_vec(), version);
        }
        Ok(())
    }

    async fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Version)>, StoreError> {
        let state = lock(&self.state);
        Ok(state
            .records
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, (_, version))| (key.clone(), *version))
            .collect())
    }
}
