//! # Entity Trait
//!
//! The [`Entity`] trait is the contract every hosted entity type implements. The
//! implementing type **is** the entity's state: the runtime loads it from the
//! repository (or starts from [`Entity::initial_state`]), hands it to
//! [`Entity::handle_command`], and persists whatever new state the handler records on
//! the [`CommandContext`].
//!
//! # Architecture Note
//! Handlers never write to storage and never execute side effects. They *describe*
//! them: a state change through [`CommandContext::update_state`] or
//! [`CommandContext::delete_state`], side effects through the
//! [`Effect`](crate::reply::Effect)s attached to the returned
//! [`ActionReply`]. The runtime commits the state change first and only then runs the
//! effects, which is what makes "effects never run before persistence" hold without
//! any cooperation from the handler.
//!
//! # Associated Types
//! - `Command` - the commands this entity accepts; decoded with serde at the dynamic boundary
//! - `Reply` - the payload of `Message` replies
//! - `Context` - dependencies injected at registration ("late binding"), `()` if none

use crate::passivation::PassivationStrategy;
use crate::reply::ActionReply;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A stateful, addressable unit of business logic.
#[async_trait]
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Registry name of this entity type. Must be non-empty and must not contain `/`.
    const ENTITY_TYPE: &'static str;

    type Command: DeserializeOwned + Send + Sync + Debug;
    type Reply: Serialize + Clone + Send + Sync + Debug;
    type Context: Send + Sync + 'static;

    /// State of an id that was never persisted (or was deleted).
    fn initial_state(entity_id: &str) -> Self;

    /// Rejects malformed commands before an instance is activated.
    ///
    /// The default accepts everything.
    fn validate(_command: &Self::Command) -> Result<(), String> {
        Ok(())
    }

    /// Handles one command against the current state.
    async fn handle_command(
        &self,
        command: Self::Command,
        ctx: &mut CommandContext<'_, Self>,
    ) -> ActionReply<Self::Reply>;
}

/// A state change recorded by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange<E> {
    Update(E),
    Delete,
}

/// Per-command view handed to [`Entity::handle_command`].
pub struct CommandContext<'a, E: Entity> {
    entity_id: &'a str,
    context: &'a E::Context,
    change: Option<StateChange<E>>,
}

impl<'a, E: Entity> CommandContext<'a, E> {
    pub fn new(entity_id: &'a str, context: &'a E::Context) -> Self {
        Self {
            entity_id,
            context,
            change: None,
        }
    }

    pub fn entity_id(&self) -> &'a str {
        self.entity_id
    }

    /// The dependencies injected when the entity type was registered.
    pub fn context(&self) -> &'a E::Context {
        self.context
    }

    /// Replaces the state. Persisted after the handler returns; last call wins.
    pub fn update_state(&mut self, state: E) {
        self.change = Some(StateChange::Update(state));
    }

    /// Deletes the persisted state and unloads the instance after the reply.
    pub fn delete_state(&mut self) {
        self.change = Some(StateChange::Delete);
    }

    pub fn has_change(&self) -> bool {
        self.change.is_some()
    }

    /// Removes and returns the recorded change. Lets handler tests inspect the outcome.
    pub fn take_change(&mut self) -> Option<StateChange<E>> {
        self.change.take()
    }
}

/// Options attached to an entity type at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityOptions {
    passivation_strategy: PassivationStrategy,
}

impl EntityOptions {
    /// Default options: passivate after the default idle timeout.
    pub fn defaults() -> Self {
        Self {
            passivation_strategy: PassivationStrategy::default_timeout(),
        }
    }

    pub fn with_passivation_strategy(self, strategy: PassivationStrategy) -> Self {
        Self {
            passivation_strategy: strategy,
        }
    }

    pub fn passivation_strategy(&self) -> PassivationStrategy {
        self.passivation_strategy
    }
}
