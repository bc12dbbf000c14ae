//! # Typed Client
//!
//! This module defines the typed client returned by [`EntityRuntime::register`].

use crate::entity::Entity;
use crate::error::FrameworkError;
use crate::manager::EntityManager;
use crate::reply::ActionReply;
use crate::runtime::EntityRuntime;
use std::sync::Arc;

/// A type-safe client for one registered entity type.
///
/// ## EntityClient
///
/// The `EntityClient<E>` sends `E::Command`s straight to the instance mailboxes of
/// entity type `E`, bypassing the JSON boundary of [`EntityRuntime::handle`]. Replies
/// come back as `ActionReply<E::Reply>`.
///
/// * **Cloneable** – holds the runtime handle and the manager, cloning is inexpensive.
/// * **Unresolved forwards** – a `Forward` reply is returned as-is; route it through
///   [`EntityRuntime::handle`] if it should be followed.
pub struct EntityClient<E: Entity> {
    runtime: EntityRuntime,
    manager: Arc<EntityManager<E>>,
}

impl<E: Entity> Clone for EntityClient<E> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            manager: self.manager.clone(),
        }
    }
}

impl<E: Entity> EntityClient<E> {
    pub(crate) fn new(runtime: EntityRuntime, manager: Arc<EntityManager<E>>) -> Self {
        Self { runtime, manager }
    }

    pub fn entity_type(&self) -> &'static str {
        E::ENTITY_TYPE
    }

    pub fn runtime(&self) -> &EntityRuntime {
        &self.runtime
    }

    /// Sends `command` to the instance for `entity_id`, activating it if needed.
    pub async fn send(
        &self,
        entity_id: &str,
        command: E::Command,
    ) -> Result<ActionReply<E::Reply>, FrameworkError> {
        let in_flight = self.runtime.enter();
        self.runtime.ensure_accepting()?;
        self.manager.send(entity_id, command, in_flight).await
    }

    pub fn is_active(&self, entity_id: &str) -> bool {
        self.manager.is_active(entity_id)
    }

    pub fn active_count(&self) -> usize {
        self.manager.active_count()
    }
}
