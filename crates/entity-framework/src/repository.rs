//! # Repository
//!
//! A [`Repository`] wraps one [`Store`] for one entity type. It owns the key namespacing
//! rule and the state codec, and nothing else: it keeps no cache and tracks no versions.
//! The caller (the entity instance) supplies the version it last observed on every
//! mutating call, which keeps a single repository safely shared by every instance of
//! its entity type.
//!
//! ## Key Namespacing
//!
//! Entity ids are mapped to `"{entity_type}/{entity_id}"`. Entity type names may not
//! contain `/`, so the first separator is unambiguous and two entity types sharing one
//! store can never collide.

use crate::codec::{Codec, JsonCodec};
use crate::error::{RepositoryError, StoreError};
use crate::store::{Store, Version};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Separator between the entity type and the entity id in store keys.
pub const KEY_SEPARATOR: char = '/';

/// Builds the store key for `(entity_type, entity_id)`.
pub fn namespace_key(entity_type: &str, entity_id: &str) -> Vec<u8> {
    format!("{entity_type}{KEY_SEPARATOR}{entity_id}").into_bytes()
}

/// Type-aware persistence wrapper for entities of a single type.
pub struct Repository<S, C = JsonCodec> {
    store: Arc<dyn Store>,
    entity_type: String,
    codec: C,
    timeout: Option<Duration>,
    _state: PhantomData<fn() -> S>,
}

impl<S> Repository<S, JsonCodec>
where
    JsonCodec: Codec<S>,
{
    /// Creates a repository using the JSON codec.
    pub fn new(store: Arc<dyn Store>, entity_type: impl Into<String>) -> Self {
        Self::with_codec(store, entity_type, JsonCodec)
    }
}

impl<S, C: Codec<S>> Repository<S, C> {
    pub fn with_codec(store: Arc<dyn Store>, entity_type: impl Into<String>, codec: C) -> Self {
        Self {
            store,
            entity_type: entity_type.into(),
            codec,
            timeout: None,
            _state: PhantomData,
        }
    }

    /// Bounds every store call. An expired call is reported as unavailable.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn key_for(&self, entity_id: &str) -> Vec<u8> {
        namespace_key(&self.entity_type, entity_id)
    }

    /// Loads the state and its version, or `None` when never persisted.
    pub async fn load(&self, entity_id: &str) -> Result<Option<(S, Version)>, RepositoryError> {
        let key = self.key_for(entity_id);
        let record = self
            .call(self.store.read(&key))
            .await
            .map_err(|e| self.map_store_error(entity_id, e))?;

        let Some(record) = record else {
            debug!(entity_type = %self.entity_type, entity_id, "No persisted state");
            return Ok(None);
        };

        match self.codec.decode(&record.value) {
            Ok(state) => Ok(Some((state, record.version))),
            Err(e) => {
                warn!(
                    entity_type = %self.entity_type,
                    entity_id,
                    version = %record.version,
                    error = %e,
                    "Stored state cannot be decoded"
                );
                Err(RepositoryError::DataCorruption {
                    entity_type: self.entity_type.clone(),
                    entity_id: entity_id.to_string(),
                    reason: e.0,
                })
            }
        }
    }

    /// Persists `state` if the stored version is still `expected`.
    pub async fn save(
        &self,
        entity_id: &str,
        state: &S,
        expected: Option<Version>,
    ) -> Result<Version, RepositoryError> {
        let bytes = self
            .codec
            .encode(state)
            .map_err(|e| RepositoryError::Encode {
                entity_type: self.entity_type.clone(),
                entity_id: entity_id.to_string(),
                reason: e.0,
            })?;
        let key = self.key_for(entity_id);
        self.call(self.store.write(&key, bytes, expected))
            .await
            .map_err(|e| self.map_store_error(entity_id, e))
    }

    /// Deletes the persisted state if the stored version is still `expected`.
    pub async fn remove(
        &self,
        entity_id: &str,
        expected: Option<Version>,
    ) -> Result<(), RepositoryError> {
        let key = self.key_for(entity_id);
        self.call(self.store.delete(&key, expected))
            .await
            .map_err(|e| self.map_store_error(entity_id, e))
    }

    /// Lists the ids that currently have persisted state.
    pub async fn ids(&self) -> Result<Vec<String>, RepositoryError> {
        let prefix = namespace_key(&self.entity_type, "");
        let keys = self
            .call(self.store.scan(&prefix))
            .await
            .map_err(|e| self.map_store_error("*", e))?;
        Ok(keys
            .into_iter()
            .map(|(key, _)| String::from_utf8_lossy(&key[prefix.len()..]).into_owned())
            .collect())
    }

    async fn call<T>(
        &self,
        operation: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| StoreError::Unavailable(format!("timed out after {limit:?}")))?,
            None => operation.await,
        }
    }

    fn map_store_error(&self, entity_id: &str, e: StoreError) -> RepositoryError {
        match e {
            StoreError::Conflict { expected, actual } => RepositoryError::Conflict {
                entity_type: self.entity_type.clone(),
                entity_id: entity_id.to_string(),
                expected,
                actual,
            },
            StoreError::Unavailable(reason) => RepositoryError::Unavailable(reason),
        }
    }
}
