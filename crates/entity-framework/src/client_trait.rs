//! # DomainClient Trait
//!
//! Provides a common interface for entity-specific clients, adding a default `send`
//! built on top of a typed [`EntityClient`].
use crate::{ActionReply, Entity, EntityClient, FrameworkError};
use async_trait::async_trait;

/// Trait for entity-specific clients to inherit the standard send operation.
///
/// Domain wrappers usually expose one method per command and map replies into their
/// own result types. `map_error` turns framework failures into the domain error.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use entity_framework::{
///     ActionReply, CommandContext, DomainClient, Entity, EntityClient, FrameworkError,
/// };
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Lamp { on: bool }
///
/// #[derive(Debug, Deserialize)]
/// enum LampCommand { Toggle }
///
/// #[async_trait]
/// impl Entity for Lamp {
///     const ENTITY_TYPE: &'static str = "lamp";
///     type Command = LampCommand;
///     type Reply = bool;
///     type Context = ();
///
///     fn initial_state(_: &str) -> Self { Self::default() }
///
///     async fn handle_command(&self, _: LampCommand, ctx: &mut CommandContext<'_, Self>) -> ActionReply<bool> {
///         ctx.update_state(Lamp { on: !self.on });
///         ActionReply::message(!self.on)
///     }
/// }
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("lamp error: {0}")]
/// struct LampError(String);
///
/// struct LampClient { inner: EntityClient<Lamp> }
///
/// #[async_trait]
/// impl DomainClient<Lamp> for LampClient {
///     type Error = LampError;
///
///     fn inner(&self) -> &EntityClient<Lamp> { &self.inner }
///
///     fn map_error(e: FrameworkError) -> Self::Error { LampError(e.to_string()) }
/// }
///
/// impl LampClient {
///     async fn toggle(&self, id: &str) -> Result<bool, LampError> {
///         match self.send(id, LampCommand::Toggle).await? {
///             ActionReply::Message { payload, .. } => Ok(payload),
///             other => Err(LampError(format!("unexpected {} reply", other.kind()))),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait DomainClient<E: Entity>: Send + Sync {
    /// The entity-specific error type.
    type Error: Send + Sync;

    /// Access the inner typed client.
    fn inner(&self) -> &EntityClient<E>;

    /// Map framework errors to the entity-specific error type.
    fn map_error(e: FrameworkError) -> Self::Error;

    /// Send a command to one entity instance.
    #[tracing::instrument(skip(self), fields(entity_type = E::ENTITY_TYPE))]
    async fn send(
        &self,
        entity_id: &str,
        command: E::Command,
    ) -> Result<ActionReply<E::Reply>, Self::Error> {
        tracing::debug!("Sending command");
        self.inner()
            .send(entity_id, command)
            .await
            .map_err(Self::map_error)
    }
}
