//! # Store Contract
//!
//! The [`Store`] trait is the minimal durable key/value contract the runtime persists
//! through. Keys and values are opaque bytes; every key carries a [`Version`] token that
//! is totally ordered and changes on each committed write.
//!
//! ## Optimistic Concurrency
//!
//! Writers pass the version they last observed (`None` when they believe the key is
//! absent). A backend must compare and install atomically: either the write commits
//! and a new, strictly greater version is returned, or it is rejected with
//! [`StoreError::Conflict`] and nothing changes. Readers never observe a partial write.
//!
//! The backend may be shared with writers outside this process; the version check is
//! the only protection against lost updates, so implementations must never skip it.
//!
//! One implementation per backend, selected when the runtime is built:
//! - [`memory::InMemoryStore`] - process-local backend, also the reference semantics
//! - [`crate::mock::MockStore`] - fault injection for tests

pub mod memory;

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

pub use memory::InMemoryStore;

/// Optimistic-concurrency token for a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    /// Version assigned to the first write of a never-written key.
    pub const INITIAL: Version = Version(1);

    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A fully committed value together with its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub version: Version,
}

/// Durable key/value backend with compare-and-set writes.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Returns the committed record for `key`, or `None` when absent.
    async fn read(&self, key: &[u8]) -> Result<Option<StoreRecord>, StoreError>;

    /// Installs `value` if the current version equals `expected`.
    async fn write(
        &self,
        key: &[u8],
        value: Vec<u8>,
        expected: Option<Version>,
    ) -> Result<Version, StoreError>;

    /// Removes `key` if the current version equals `expected`.
    ///
    /// Deleting an absent key with `expected == None` succeeds.
    async fn delete(&self, key: &[u8], expected: Option<Version>) -> Result<(), StoreError>;

    /// Lists the keys starting with `prefix` and their current versions.
    async fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Version)>, StoreError>;
}
