//! # Entity Manager
//!
//! One [`EntityManager`] exists per registered entity type. It owns the map of active
//! instances and guarantees that at most one instance (one mailbox, one worker task)
//! exists per id. Commands for different ids run on different workers and never wait
//! on each other; commands for the same id queue in that id's mailbox.
//!
//! ## Locking
//!
//! The instance map is guarded by a plain mutex that is never held across an await.
//! Sends into a mailbox happen while the lock is held, and a worker only removes its
//! own entry while holding the lock and after checking that its mailbox is empty. So
//! a command can never be sent to a worker that has decided to stop.

use crate::codec::Codec;
use crate::entity::{Entity, EntityOptions};
use crate::error::FrameworkError;
use crate::instance::EntityInstance;
use crate::message::Envelope;
use crate::passivation::{PassivationManager, PassivationRequest};
use crate::reply::ActionReply;
use crate::repository::Repository;
use crate::runtime::{EffectScheduler, EntityHost};
use crate::sync::{lock, InFlightGuard};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Codec shared by the repository of one entity type.
pub(crate) type SharedCodec<E> = Arc<dyn Codec<E>>;

struct InstanceHandle<E: Entity> {
    incarnation: u64,
    sender: mpsc::UnboundedSender<Envelope<E>>,
    join: JoinHandle<()>,
}

/// Hosts every active instance of entity type `E`.
pub(crate) struct EntityManager<E: Entity> {
    this: Weak<EntityManager<E>>,
    pub(crate) repository: Repository<E, SharedCodec<E>>,
    pub(crate) passivation: PassivationManager,
    pub(crate) context: E::Context,
    pub(crate) effects: EffectScheduler,
    instances: Mutex<HashMap<String, InstanceHandle<E>>>,
    incarnations: AtomicU64,
    passivation_loop: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Entity> EntityManager<E> {
    /// Creates the manager and starts its passivation loop.
    pub(crate) fn start(
        repository: Repository<E, SharedCodec<E>>,
        options: EntityOptions,
        context: E::Context,
        effects: EffectScheduler,
    ) -> Arc<Self> {
        let (passivation, requests) = PassivationManager::new(options.passivation_strategy());
        let manager = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            repository,
            passivation,
            context,
            effects,
            instances: Mutex::new(HashMap::new()),
            incarnations: AtomicU64::new(1),
            passivation_loop: Mutex::new(None),
        });
        let task = tokio::spawn(run_passivation_loop(Arc::downgrade(&manager), requests));
        *lock(&manager.passivation_loop) = Some(task);
        info!(
            entity_type = E::ENTITY_TYPE,
            strategy = ?options.passivation_strategy(),
            "Entity type registered"
        );
        manager
    }

    /// Validates `command`, queues it for `entity_id` and waits for the reply.
    pub(crate) async fn send(
        &self,
        entity_id: &str,
        command: E::Command,
        in_flight: InFlightGuard,
    ) -> Result<ActionReply<E::Reply>, FrameworkError> {
        if let Err(reason) = E::validate(&command) {
            warn!(entity_type = E::ENTITY_TYPE, entity_id, %reason, "Command rejected");
            return Err(FrameworkError::Validation {
                entity_type: E::ENTITY_TYPE.to_string(),
                entity_id: entity_id.to_string(),
                reason,
            });
        }

        let (respond_to, response) = oneshot::channel();
        self.enqueue(
            entity_id,
            Envelope::Command {
                command,
                respond_to,
                _in_flight: in_flight,
            },
        )?;
        response.await.map_err(|_| {
            warn!(entity_type = E::ENTITY_TYPE, entity_id, "Instance stopped without replying");
            FrameworkError::InstancePanicked {
                entity_type: E::ENTITY_TYPE.to_string(),
                entity_id: entity_id.to_string(),
            }
        })?
    }

    fn enqueue(&self, entity_id: &str, mut envelope: Envelope<E>) -> Result<(), FrameworkError> {
        let mut instances = lock(&self.instances);
        self.passivation.mark_busy(entity_id);
        loop {
            if !instances.contains_key(entity_id) {
                match self.spawn_instance(entity_id) {
                    Ok(handle) => {
                        instances.insert(entity_id.to_string(), handle);
                    }
                    Err(e) => {
                        self.passivation.mark_idle(entity_id);
                        return Err(e);
                    }
                }
            }
            let Some(handle) = instances.get(entity_id) else {
                return Err(FrameworkError::ActorDropped);
            };
            match handle.sender.send(envelope) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    // The worker died without deregistering (it panicked).
                    warn!(
                        entity_type = E::ENTITY_TYPE,
                        entity_id,
                        incarnation = handle.incarnation,
                        "Instance worker gone, respawning"
                    );
                    instances.remove(entity_id);
                    self.passivation.remove(entity_id);
                    self.passivation.mark_busy(entity_id);
                    envelope = returned;
                }
            }
        }
    }

    fn spawn_instance(&self, entity_id: &str) -> Result<InstanceHandle<E>, FrameworkError> {
        let manager = self.this.upgrade().ok_or(FrameworkError::Unavailable)?;
        let incarnation = self.incarnations.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let instance = EntityInstance::new(entity_id.to_string(), incarnation, manager, receiver);
        let join = tokio::spawn(instance.run());
        debug!(entity_type = E::ENTITY_TYPE, entity_id, incarnation, "Instance spawned");
        Ok(InstanceHandle {
            incarnation,
            sender,
            join,
        })
    }

    /// Removes the calling instance if nothing is queued for it and, for passivation,
    /// the request is still current. Returns `true` when the worker must stop.
    pub(crate) fn deregister_if_idle(
        &self,
        entity_id: &str,
        incarnation: u64,
        mailbox: &mpsc::UnboundedReceiver<Envelope<E>>,
        generation: Option<u64>,
    ) -> bool {
        let mut instances = lock(&self.instances);
        if !mailbox.is_empty() {
            return false;
        }
        if let Some(generation) = generation {
            if !self.passivation.is_current(entity_id, generation) {
                return false;
            }
        }
        match instances.get(entity_id) {
            Some(handle) if handle.incarnation == incarnation => {
                instances.remove(entity_id);
            }
            // Shutdown already took the entry; the mailbox is closed and empty.
            None => {}
            Some(_) => return false,
        }
        self.passivation.remove(entity_id);
        true
    }

    /// Unconditionally removes the calling instance. The worker must then close and
    /// drain its mailbox.
    pub(crate) fn deregister(&self, entity_id: &str, incarnation: u64) {
        let mut instances = lock(&self.instances);
        if instances
            .get(entity_id)
            .is_some_and(|handle| handle.incarnation == incarnation)
        {
            instances.remove(entity_id);
        }
        self.passivation.remove(entity_id);
    }

    fn deliver_passivation(&self, request: PassivationRequest) {
        let instances = lock(&self.instances);
        match instances.get(&request.entity_id) {
            Some(handle) => {
                let _ = handle.sender.send(Envelope::Passivate {
                    generation: request.generation,
                });
            }
            None => debug!(
                entity_type = E::ENTITY_TYPE,
                entity_id = %request.entity_id,
                "Passivation request for inactive id"
            ),
        }
    }

    pub(crate) fn is_active(&self, entity_id: &str) -> bool {
        lock(&self.instances).contains_key(entity_id)
    }

    pub(crate) fn active_count(&self) -> usize {
        lock(&self.instances).len()
    }

    /// Stops every instance after it drained its mailbox.
    pub(crate) async fn stop(&self) {
        if let Some(task) = lock(&self.passivation_loop).take() {
            task.abort();
        }
        let handles: Vec<(String, InstanceHandle<E>)> = lock(&self.instances).drain().collect();
        let stopped = handles.len();
        for (entity_id, InstanceHandle { sender, join, .. }) in handles {
            drop(sender);
            if let Err(e) = join.await {
                warn!(entity_type = E::ENTITY_TYPE, %entity_id, error = %e, "Instance task failed");
            }
        }
        self.passivation.clear();
        info!(entity_type = E::ENTITY_TYPE, stopped, "Entity type stopped");
    }
}

#[async_trait]
impl<E: Entity> EntityHost for EntityManager<E> {
    fn entity_type(&self) -> &'static str {
        E::ENTITY_TYPE
    }

    async fn handle_value(
        &self,
        entity_id: &str,
        payload: Value,
        in_flight: InFlightGuard,
    ) -> Result<ActionReply<Value>, FrameworkError> {
        let command: E::Command =
            serde_json::from_value(payload).map_err(|e| FrameworkError::Validation {
                entity_type: E::ENTITY_TYPE.to_string(),
                entity_id: entity_id.to_string(),
                reason: e.to_string(),
            })?;
        self.send(entity_id, command, in_flight)
            .await?
            .try_map(serde_json::to_value)
            .map_err(|e| FrameworkError::Codec(e.to_string()))
    }

    fn is_active(&self, entity_id: &str) -> bool {
        EntityManager::is_active(self, entity_id)
    }

    fn active_count(&self) -> usize {
        EntityManager::active_count(self)
    }

    async fn stop(&self) {
        EntityManager::stop(self).await
    }
}

/// Forwards passivation requests into the mailboxes of the instances they name.
async fn run_passivation_loop<E: Entity>(
    manager: Weak<EntityManager<E>>,
    mut requests: mpsc::UnboundedReceiver<PassivationRequest>,
) {
    while let Some(request) = requests.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        debug!(
            entity_type = E::ENTITY_TYPE,
            entity_id = %request.entity_id,
            generation = request.generation,
            "Passivation requested"
        );
        manager.deliver_passivation(request);
    }
}
