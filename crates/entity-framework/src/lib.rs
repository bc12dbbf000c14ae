//! # Entity Framework
//!
//! This crate hosts stateful, addressable **entities**: units of business logic
//! identified by `(entity type, entity id)` whose state lives in a pluggable key-value
//! [`Store`]. The runtime keeps at most one in-memory instance per id, processes its
//! commands strictly one at a time, persists state with optimistic concurrency and
//! unloads idle instances after a configurable timeout (passivation).
//!
//! ## Why Entities + Mailboxes?
//!
//! - **Isolation**: each id owns its state; no two commands for the same id ever overlap
//! - **Parallelism**: different ids make progress independently, a slow id stalls nobody else
//! - **Elasticity**: instances exist only while they are used; everything else is in the store
//! - **Safety**: a stale instance can never silently overwrite a newer version
//!
//! **Further Reading**:
//! - [Actors in Rust](https://ryhl.io/blog/actors-with-tokio/) - Practical guide to implementing actors with Tokio
//! - [Optimistic concurrency control (Wikipedia)](https://en.wikipedia.org/wiki/Optimistic_concurrency_control)
//!
//! ## Architecture Overview
//!
//! 1. **Entity Layer** ([`Entity`]) - your state type and command handler
//! 2. **Runtime Layer** ([`EntityRuntime`]) - registry, per-id mailboxes, passivation,
//!    forward routing, effect execution
//! 3. **Persistence Layer** ([`Repository`], [`Store`]) - codec, key namespacing, versions
//! 4. **Interface Layer** ([`EntityClient`], [`DomainClient`]) - typed access
//!
//! ## Replies and Effects
//!
//! A handler returns an [`ActionReply`]: a `Message` for the caller, a `Forward` to
//! another entity or service, `NoReply`, or a business `Failure`. Any reply can carry
//! [`Effect`]s. Effects run after the state change is persisted and the reply is
//! released, in the order they were attached; their failures are logged, never
//! reported to the original caller.
//!
//! ## Concurrency Model
//!
//! - Each active id runs in its own Tokio task with an unbounded mailbox
//! - The instance map is guarded by a short synchronous lock never held across `.await`
//! - Passivation requests are advisory: an instance declines when it has queued work
//!
//! ## Testing
//!
//! [`mock::MockStore`] wraps the in-memory store with scripted faults and latency. See
//! the [`mock`] module for the patterns.

pub mod client;
pub mod client_trait;
pub mod codec;
pub mod config;
pub mod entity;
pub mod error;
mod instance;
mod manager;
mod message;
pub mod mock;
pub mod passivation;
pub mod reply;
pub mod repository;
pub mod runtime;
pub mod service;
pub mod store;
mod sync;
pub mod tracing;

// Re-export core types for convenience
pub use client::EntityClient;
pub use client_trait::DomainClient;
pub use codec::{Codec, JsonCodec};
pub use config::RuntimeConfig;
pub use entity::{CommandContext, Entity, EntityOptions, StateChange};
pub use error::{CodecError, FrameworkError, RepositoryError, StoreError};
pub use passivation::{PassivationStrategy, DEFAULT_PASSIVATION_TIMEOUT};
pub use reply::{ActionReply, Effect, Target};
pub use repository::Repository;
pub use runtime::EntityRuntime;
pub use service::ServiceHandler;
pub use store::{InMemoryStore, Store, StoreRecord, Version};
