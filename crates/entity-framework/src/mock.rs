//! # Mock Store & Testing Guide
//!
//! [`MockStore`] wraps an [`InMemoryStore`] and lets a test script failures and latency
//! that a real backend would only produce under load: conflicts from a concurrent
//! writer, an unreachable database, a slow disk. Everything not scripted is served by
//! the wrapped store, so entities behave normally around the injected faults.
//!
//! ## When to use MockStore vs InMemoryStore
//!
//! | Feature | MockStore | InMemoryStore |
//! |---------|-----------|---------------|
//! | **Error Injection** | Easy (`return_err`) | Only real conflicts |
//! | **Latency** | Per key prefix (`with_write_delay`) | None |
//! | **Verification** | `verify()` panics on unused expectations | n/a |
//! | **Use Case** | Failure paths, scheduling behaviour | Happy paths, full system tests |
//!
//! ## Testing Failure Scenarios
//!
//! ```rust
//! use entity_framework::mock::MockStore;
//! use entity_framework::{StoreError, Store};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MockStore::new();
//!     store
//!         .expect_write()
//!         .for_key("wallet/w-1")
//!         .return_err(StoreError::Unavailable("disk full".into()));
//!
//!     // Another key is unaffected.
//!     assert!(store.write(b"wallet/w-2", b"{}".to_vec(), None).await.is_ok());
//!
//!     let result = store.write(b"wallet/w-1", b"{}".to_vec(), None).await;
//!     assert!(matches!(result, Err(StoreError::Unavailable(_))));
//!
//!     store.verify();
//! }
//! ```
//!
//! ## Testing Strategies
//!
//! 1. **Entity logic**: call [`Entity::handle_command`](crate::Entity::handle_command)
//!    directly with a [`CommandContext`](crate::CommandContext); no runtime needed.
//! 2. **Runtime behaviour**: an [`EntityRuntime`](crate::EntityRuntime) over a
//!    `MockStore`, with paused tokio time for passivation.
//! 3. **Full system**: the domain's system type over an `InMemoryStore`.

use crate::error::StoreError;
use crate::store::{InMemoryStore, Store, StoreRecord, Version};
use crate::sync::lock;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// EXPECTATION BUILDER API
// =============================================================================

/// Store operation an expectation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Delete,
    Scan,
}

#[derive(Debug)]
struct Expectation {
    operation: Operation,
    key: Option<Vec<u8>>,
    error: StoreError,
}

impl Expectation {
    fn matches(&self, operation: Operation, key: &[u8]) -> bool {
        self.operation == operation && self.key.as_deref().map_or(true, |k| k == key)
    }
}

/// A store with scripted faults for testing.
///
/// Each expectation fails exactly one matching call, in the order the expectations
/// were added. Calls that match no expectation reach the wrapped store.
#[derive(Default)]
pub struct MockStore {
    inner: InMemoryStore,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    write_delays: Mutex<Vec<(Vec<u8>, Duration)>>,
    writes: AtomicUsize,
}

impl MockStore {
    /// Creates a mock store with no expectations.
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store, for seeding data or writing behind the runtime's back.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Delays every write whose key starts with `prefix` by `delay`.
    pub fn with_write_delay(self, prefix: impl AsRef<[u8]>, delay: Duration) -> Self {
        lock(&self.write_delays).push((prefix.as_ref().to_vec(), delay));
        self
    }

    pub fn expect_read(&self) -> ExpectationBuilder {
        self.expect(Operation::Read)
    }

    pub fn expect_write(&self) -> ExpectationBuilder {
        self.expect(Operation::Write)
    }

    pub fn expect_delete(&self) -> ExpectationBuilder {
        self.expect(Operation::Delete)
    }

    pub fn expect_scan(&self) -> ExpectationBuilder {
        self.expect(Operation::Scan)
    }

    fn expect(&self, operation: Operation) -> ExpectationBuilder {
        ExpectationBuilder {
            operation,
            key: None,
            expectations: self.expectations.clone(),
        }
    }

    /// Number of writes that reached the wrapped store, successful or not.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Verifies that all expectations were met.
    pub fn verify(&self) {
        let exps = lock(&self.expectations);
        if !exps.is_empty() {
            panic!(
                "Not all expectations were met. {} remaining: {:?}",
                exps.len(),
                exps
            );
        }
    }

    fn take_fault(&self, operation: Operation, key: &[u8]) -> Result<(), StoreError> {
        let mut exps = lock(&self.expectations);
        match exps.iter().position(|e| e.matches(operation, key)) {
            Some(index) => match exps.remove(index) {
                Some(expectation) => Err(expectation.error),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    fn write_delay(&self, key: &[u8]) -> Option<Duration> {
        lock(&self.write_delays)
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix))
            .map(|(_, delay)| *delay)
    }
}

/// Builder for a single scripted fault.
pub struct ExpectationBuilder {
    operation: Operation,
    key: Option<Vec<u8>>,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
}

impl ExpectationBuilder {
    /// Restricts the fault to one key. Without it any key matches.
    pub fn for_key(mut self, key: impl AsRef<[u8]>) -> Self {
        self.key = Some(key.as_ref().to_vec());
        self
    }

    /// Sets the error the matching call returns.
    pub fn return_err(self, error: StoreError) {
        lock(&self.expectations).push_back(Expectation {
            operation: self.operation,
            key: self.key,
            error,
        });
    }
}

#[async_trait]
impl Store for MockStore {
    async fn read(&self, key: &[u8]) -> Result<Option<StoreRecord>, StoreError> {
        self.take_fault(Operation::Read, key)?;
        self.inner.read(key).await
    }

    async fn write(
        &self,
        key: &[u8],
        value: Vec<u8>,
        expected: Option<Version>,
    ) -> Result<Version, StoreError> {
        if let Some(delay) = self.write_delay(key) {
            tokio::time::sleep(delay).await;
        }
        self.take_fault(Operation::Write, key)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(key, value, expected).await
    }

    async fn delete(&self, key: &[u8], expected: Option<Version>) -> Result<(), StoreError> {
        self.take_fault(Operation::Delete, key)?;
        self.inner.delete(key, expected).await
    }

    async fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Version)>, StoreError> {
        self.take_fault(Operation::Scan, prefix)?;
        self.inner.scan(prefix).await
    }
}
