//! # Entity Runtime
//!
//! The [`EntityRuntime`] is the orchestrator: it hosts every registered entity type,
//! routes commands to the single instance responsible for each id, follows forwards,
//! executes effects once replies are final, and shuts everything down without
//! aborting a write half-way.
//!
//! ## Usage Pattern
//!
//! 1. **Create**: build the runtime over a [`Store`] backend chosen by the embedder.
//! 2. **Register**: register each entity type with its options and injected context,
//!    and each service effects may target. Registration returns a typed client.
//! 3. **Run**: send commands through the typed clients or the dynamic [`handle`]
//!    boundary.
//! 4. **Shut down**: [`shutdown`] drains in-flight work and stops all instances.
//!
//! [`handle`]: EntityRuntime::handle
//! [`shutdown`]: EntityRuntime::shutdown
//!
//! ```rust
//! use async_trait::async_trait;
//! use entity_framework::{
//!     ActionReply, CommandContext, Entity, EntityOptions, EntityRuntime, InMemoryStore,
//! };
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Default, Serialize, Deserialize)]
//! struct Counter { value: u64 }
//!
//! #[derive(Debug, Deserialize)]
//! enum CounterCommand { Increment }
//!
//! #[async_trait]
//! impl Entity for Counter {
//!     const ENTITY_TYPE: &'static str = "counter";
//!     type Command = CounterCommand;
//!     type Reply = u64;
//!     type Context = ();
//!
//!     fn initial_state(_: &str) -> Self { Self::default() }
//!
//!     async fn handle_command(
//!         &self,
//!         _command: CounterCommand,
//!         ctx: &mut CommandContext<'_, Self>,
//!     ) -> ActionReply<u64> {
//!         let value = self.value + 1;
//!         ctx.update_state(Counter { value });
//!         ActionReply::message(value)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let runtime = EntityRuntime::new(Arc::new(InMemoryStore::new()));
//!     let counters = runtime.register::<Counter>(EntityOptions::defaults(), ()).unwrap();
//!
//!     let reply = counters.send("c-1", CounterCommand::Increment).await.unwrap();
//!     assert_eq!(reply.payload(), Some(&1));
//!
//!     let reply = runtime
//!         .handle("counter", "c-1", serde_json::json!("Increment"))
//!         .await
//!         .unwrap();
//!     assert_eq!(reply.payload(), Some(&serde_json::json!(2)));
//!
//!     runtime.shutdown().await;
//! }
//! ```

use crate::client::EntityClient;
use crate::codec::{Codec, JsonCodec};
use crate::config::RuntimeConfig;
use crate::entity::{Entity, EntityOptions};
use crate::error::FrameworkError;
use crate::manager::{EntityManager, SharedCodec};
use crate::reply::{ActionReply, Effect, Target};
use crate::repository::{Repository, KEY_SEPARATOR};
use crate::service::ServiceHandler;
use crate::store::Store;
use crate::sync::{read, write, InFlight, InFlightGuard};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, info, warn};

/// Type-erased view of an [`EntityManager`], used by the dynamic boundary.
#[async_trait]
pub(crate) trait EntityHost: Send + Sync {
    fn entity_type(&self) -> &'static str;

    async fn handle_value(
        &self,
        entity_id: &str,
        payload: Value,
        in_flight: InFlightGuard,
    ) -> Result<ActionReply<Value>, FrameworkError>;

    fn is_active(&self, entity_id: &str) -> bool;

    fn active_count(&self) -> usize;

    async fn stop(&self);
}

pub(crate) struct RuntimeInner {
    store: Arc<dyn Store>,
    config: RuntimeConfig,
    entities: RwLock<HashMap<String, Arc<dyn EntityHost>>>,
    services: RwLock<HashMap<String, Arc<dyn ServiceHandler>>>,
    in_flight: InFlight,
    /// External commands are rejected.
    closing: AtomicBool,
    /// Internal dispatch (effects, forwards) is rejected too.
    closed: AtomicBool,
}

/// Hosts entity types and routes commands to their instances.
///
/// Cheap to clone; clones share the same runtime.
#[derive(Clone)]
pub struct EntityRuntime {
    inner: Arc<RuntimeInner>,
}

impl EntityRuntime {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, RuntimeConfig::default())
    }

    pub fn with_config(store: Arc<dyn Store>, config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                store,
                config,
                entities: RwLock::new(HashMap::new()),
                services: RwLock::new(HashMap::new()),
                in_flight: InFlight::default(),
                closing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.inner.store.clone()
    }

    /// Registers entity type `E` and returns a typed client for it. State is stored
    /// as JSON.
    ///
    /// `context` is handed to every handler invocation of this type.
    pub fn register<E: Entity>(
        &self,
        options: EntityOptions,
        context: E::Context,
    ) -> Result<EntityClient<E>, FrameworkError> {
        self.register_with_codec(options, context, JsonCodec)
    }

    /// Registers entity type `E` with `codec` as the format of its stored state.
    pub fn register_with_codec<E, C>(
        &self,
        options: EntityOptions,
        context: E::Context,
        codec: C,
    ) -> Result<EntityClient<E>, FrameworkError>
    where
        E: Entity,
        C: Codec<E>,
    {
        let entity_type = E::ENTITY_TYPE;
        if entity_type.is_empty() || entity_type.contains(KEY_SEPARATOR) {
            return Err(FrameworkError::InvalidEntityType(entity_type.to_string()));
        }
        self.ensure_accepting()?;

        let mut entities = write(&self.inner.entities);
        if entities.contains_key(entity_type) {
            return Err(FrameworkError::DuplicateEntityType(entity_type.to_string()));
        }
        let codec: SharedCodec<E> = Arc::new(codec);
        let repository = Repository::with_codec(self.inner.store.clone(), entity_type, codec)
            .with_timeout(self.inner.config.store_timeout);
        let manager = EntityManager::start(
            repository,
            options,
            context,
            EffectScheduler {
                runtime: Arc::downgrade(&self.inner),
            },
        );
        entities.insert(entity_type.to_string(), manager.clone());
        Ok(EntityClient::new(self.clone(), manager))
    }

    /// Registers a service that effects and forwards can target.
    pub fn register_service(&self, name: impl Into<String>, handler: Arc<dyn ServiceHandler>) {
        let name = name.into();
        info!(service = %name, "Service registered");
        write(&self.inner.services).insert(name, handler);
    }

    /// Handles one command at the dynamic boundary.
    ///
    /// The payload is decoded into the entity's command type; decoding failures are
    /// validation errors. `Forward` replies are followed until a final reply.
    pub async fn handle(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: Value,
    ) -> Result<ActionReply<Value>, FrameworkError> {
        let _in_flight = self.enter();
        self.ensure_accepting()?;
        self.inner
            .dispatch(entity_type.to_string(), entity_id.to_string(), payload, 1)
            .await
    }

    pub fn is_active(&self, entity_type: &str, entity_id: &str) -> bool {
        self.inner
            .host(entity_type)
            .is_ok_and(|host| host.is_active(entity_id))
    }

    /// Number of instances of `entity_type` currently in memory.
    pub fn active_count(&self, entity_type: &str) -> usize {
        self.inner
            .host(entity_type)
            .map(|host| host.active_count())
            .unwrap_or(0)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    /// Stops accepting commands, lets in-flight commands and their effects finish,
    /// then stops every instance.
    pub async fn shutdown(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(in_flight = self.inner.in_flight.count(), "Runtime shutting down");

        let timeout = self.inner.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.inner.in_flight.wait_idle())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.inner.in_flight.count(),
                ?timeout,
                "Shutdown timeout elapsed with work in flight"
            );
        }
        self.inner.closed.store(true, Ordering::Release);

        let hosts: Vec<Arc<dyn EntityHost>> = read(&self.inner.entities).values().cloned().collect();
        for host in hosts {
            debug!(entity_type = host.entity_type(), "Stopping entity type");
            host.stop().await;
        }
        info!("Runtime stopped");
    }

    /// Must be called while holding an [`InFlightGuard`], so that `shutdown` either
    /// sees the guard or the caller sees `closing`.
    pub(crate) fn ensure_accepting(&self) -> Result<(), FrameworkError> {
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(FrameworkError::Unavailable);
        }
        Ok(())
    }

    pub(crate) fn enter(&self) -> InFlightGuard {
        self.inner.in_flight.enter()
    }
}

impl RuntimeInner {
    fn host(&self, entity_type: &str) -> Result<Arc<dyn EntityHost>, FrameworkError> {
        read(&self.entities)
            .get(entity_type)
            .cloned()
            .ok_or_else(|| FrameworkError::UnknownEntityType(entity_type.to_string()))
    }

    fn service(&self, name: &str) -> Result<Arc<dyn ServiceHandler>, FrameworkError> {
        read(&self.services)
            .get(name)
            .cloned()
            .ok_or_else(|| FrameworkError::UnknownService(name.to_string()))
    }

    async fn call_service(
        &self,
        service: &str,
        method: &str,
        payload: Value,
    ) -> Result<Value, FrameworkError> {
        self.service(service)?
            .call(method, payload)
            .await
            .map_err(FrameworkError::ServiceFailed)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error, uses up
    /// `attempts`, or the runtime closes. The pause between attempts starts at
    /// `effect_retry_backoff` and doubles.
    async fn retrying<T, F, Fut>(
        &self,
        attempts: u32,
        to: &str,
        mut operation: F,
    ) -> Result<T, FrameworkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FrameworkError>>,
    {
        let mut backoff = self.config.effect_retry_backoff;
        let mut attempt = 1;
        loop {
            match operation().await {
                Err(e)
                    if e.is_retryable()
                        && attempt < attempts
                        && !self.closed.load(Ordering::Acquire) =>
                {
                    debug!(to, error = %e, attempt, ?backoff, "Retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Sends a command and follows `Forward` replies.
    ///
    /// Each hop is attempted up to `attempts` times, so a retry never replays a hop
    /// that already committed.
    async fn dispatch(
        &self,
        mut entity_type: String,
        mut entity_id: String,
        mut payload: Value,
        attempts: u32,
    ) -> Result<ActionReply<Value>, FrameworkError> {
        let mut hops = 0;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(FrameworkError::Unavailable);
            }
            let host = self.host(&entity_type)?;
            let label = format!("{entity_type}/{entity_id}");
            let reply = self
                .retrying(attempts, &label, || {
                    host.handle_value(&entity_id, payload.clone(), self.in_flight.enter())
                })
                .await?;

            let (target, forwarded) = match reply {
                ActionReply::Forward {
                    target, payload, ..
                } => (target, payload),
                reply => return Ok(reply),
            };

            if hops >= self.config.max_forward_hops {
                warn!(%entity_type, %entity_id, hops, "Forward limit exceeded");
                return Err(FrameworkError::ForwardLimitExceeded(hops));
            }
            hops += 1;
            debug!(from = %label, to = %target, hops, "Following forward");

            match target {
                Target::Entity {
                    entity_type: next_type,
                    entity_id: next_id,
                } => {
                    entity_type = next_type;
                    entity_id = next_id;
                    payload = forwarded;
                }
                Target::Service { service, method } => {
                    let value = self.call_service(&service, &method, forwarded).await?;
                    return Ok(ActionReply::message(value));
                }
            }
        }
    }

    /// Runs one reply's effects, in order, one at a time.
    ///
    /// A hop that fails with a retryable error is retried before the next effect
    /// starts. An effect that still fails is logged and given up.
    async fn execute_effects(&self, origin: &Target, effects: Vec<Effect>) {
        let attempts = self.config.effect_max_attempts;
        for (position, Effect { target, payload }) in effects.into_iter().enumerate() {
            let label = target.to_string();
            let result = match target {
                Target::Entity {
                    entity_type,
                    entity_id,
                } => self
                    .dispatch(entity_type, entity_id, payload, attempts)
                    .await
                    .map(|reply| reply.kind()),
                Target::Service { service, method } => self
                    .retrying(attempts, &label, || {
                        self.call_service(&service, &method, payload.clone())
                    })
                    .await
                    .map(|_| "message"),
            };
            match result {
                Ok(reply) => debug!(%origin, position, target = %label, reply, "Effect executed"),
                Err(e) => warn!(%origin, position, target = %label, error = %e, "Effect failed"),
            }
        }
    }
}

/// Hands finished replies' effects to the runtime for execution.
#[derive(Clone)]
pub(crate) struct EffectScheduler {
    runtime: Weak<RuntimeInner>,
}

impl EffectScheduler {
    /// Spawns the execution of `effects`. Called after the reply was released.
    pub(crate) fn schedule(&self, origin: Target, effects: Vec<Effect>) {
        if effects.is_empty() {
            return;
        }
        let Some(runtime) = self.runtime.upgrade() else {
            warn!(%origin, count = effects.len(), "Runtime dropped, effects not executed");
            return;
        };
        let in_flight = runtime.in_flight.enter();
        tokio::spawn(async move {
            let _in_flight = in_flight;
            runtime.execute_effects(&origin, effects).await;
        });
    }
}
