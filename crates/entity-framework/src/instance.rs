//! # Entity Instance Worker
//!
//! An [`EntityInstance`] is the single writer for one `(type, id)`. It is the "server"
//! half of the actor for that id: it owns the in-memory state and the last persisted
//! version, and drains its mailbox one message at a time, so no handler call and no
//! store call for the id ever overlap.
//!
//! ## Lifecycle
//!
//! ```text
//! Unloaded --first command--> Loading --loaded--> Ready
//! Ready --command--> Processing --(persist)--> Ready
//! Ready --passivation, idle--> Passivating --> Unloaded
//! Ready --passivation, stale or busy--> Ready (declined)
//! ```
//!
//! * **Loading**: `Repository::load`; an absent record starts from
//!   [`Entity::initial_state`] with no version. A failed load stops the instance and
//!   fails every queued command with the same error; the next command retries.
//! * **Processing**: the handler runs against the current state. A recorded state
//!   change is saved with the last known version. On success the reply is released,
//!   then its effects are scheduled. On conflict the state is reloaded and the command
//!   fails with a retryable error; its effects are dropped with it. If that reload
//!   fails too, the instance stops like a failed activation.
//! * **Passivating**: only when the passivation request is still current and the
//!   mailbox is empty. Persistence is never pending here since the worker is
//!   sequential.

use crate::entity::{CommandContext, Entity, StateChange};
use crate::error::{FrameworkError, RepositoryError};
use crate::manager::EntityManager;
use crate::message::{Envelope, Response};
use crate::reply::{ActionReply, Target};
use crate::store::Version;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub(crate) struct EntityInstance<E: Entity> {
    entity_id: String,
    incarnation: u64,
    manager: Arc<EntityManager<E>>,
    receiver: mpsc::UnboundedReceiver<Envelope<E>>,
    state: Option<E>,
    version: Option<Version>,
    /// Set when the state could not be resynchronized; the worker must stop.
    desynced: Option<RepositoryError>,
}

impl<E: Entity> EntityInstance<E> {
    pub(crate) fn new(
        entity_id: String,
        incarnation: u64,
        manager: Arc<EntityManager<E>>,
        receiver: mpsc::UnboundedReceiver<Envelope<E>>,
    ) -> Self {
        Self {
            entity_id,
            incarnation,
            manager,
            receiver,
            state: None,
            version: None,
            desynced: None,
        }
    }

    /// Runs the instance until it is passivated, deleted or its mailbox closes.
    pub(crate) async fn run(mut self) {
        let entity_type = E::ENTITY_TYPE;

        if let Err(e) = self.load().await {
            self.abandon(e, "Activation failed");
            return;
        }
        info!(
            entity_type,
            entity_id = %self.entity_id,
            version = ?self.version,
            "Instance activated"
        );

        while let Some(envelope) = self.receiver.recv().await {
            match envelope {
                Envelope::Command {
                    command,
                    respond_to,
                    _in_flight,
                } => {
                    let deleted = self.process(command, respond_to).await;
                    drop(_in_flight);
                    if let Some(e) = self.desynced.take() {
                        self.abandon(e, "Reload after conflict failed");
                        return;
                    }
                    if deleted && self.try_unload(None) {
                        info!(entity_type, entity_id = %self.entity_id, "Instance unloaded after delete");
                        return;
                    }
                }
                Envelope::Passivate { generation } => {
                    if self.try_unload(Some(generation)) {
                        info!(entity_type, entity_id = %self.entity_id, version = ?self.version, "Passivated");
                        return;
                    }
                    debug!(entity_type, entity_id = %self.entity_id, generation, "Passivation declined");
                }
            }
        }

        debug!(entity_type, entity_id = %self.entity_id, "Mailbox closed, instance stopped");
    }

    async fn load(&mut self) -> Result<(), RepositoryError> {
        match self.manager.repository.load(&self.entity_id).await? {
            Some((state, version)) => {
                self.state = Some(state);
                self.version = Some(version);
            }
            None => {
                self.state = Some(E::initial_state(&self.entity_id));
                self.version = None;
            }
        }
        Ok(())
    }

    /// Handles one command. Returns `true` when the state was deleted.
    async fn process(
        &mut self,
        command: E::Command,
        respond_to: Response<ActionReply<E::Reply>>,
    ) -> bool {
        let entity_type = E::ENTITY_TYPE;
        debug!(entity_type, entity_id = %self.entity_id, ?command, "Command");

        let (reply, change) = {
            let state = match &self.state {
                Some(state) => state,
                None => {
                    let _ = respond_to.send(Err(FrameworkError::ActorDropped));
                    self.finish();
                    return false;
                }
            };
            let mut ctx = CommandContext::new(&self.entity_id, &self.manager.context);
            let reply = state.handle_command(command, &mut ctx).await;
            (reply, ctx.take_change())
        };

        let outcome = match change {
            None => Ok(false),
            Some(StateChange::Update(state)) => {
                match self
                    .manager
                    .repository
                    .save(&self.entity_id, &state, self.version)
                    .await
                {
                    Ok(version) => {
                        debug!(entity_type, entity_id = %self.entity_id, %version, "State persisted");
                        self.state = Some(state);
                        self.version = Some(version);
                        Ok(false)
                    }
                    Err(e) => Err(self.recover(e).await),
                }
            }
            Some(StateChange::Delete) => {
                match self
                    .manager
                    .repository
                    .remove(&self.entity_id, self.version)
                    .await
                {
                    Ok(()) => {
                        info!(entity_type, entity_id = %self.entity_id, "State deleted");
                        self.state = Some(E::initial_state(&self.entity_id));
                        self.version = None;
                        Ok(true)
                    }
                    Err(e) => Err(self.recover(e).await),
                }
            }
        };

        match outcome {
            Ok(deleted) => {
                let effects = reply.effects().to_vec();
                if reply.is_failure() {
                    debug!(entity_type, entity_id = %self.entity_id, description = ?reply.failure_description(), "Command failed");
                } else {
                    debug!(entity_type, entity_id = %self.entity_id, reply = reply.kind(), "Command ok");
                }
                let _ = respond_to.send(Ok(reply));
                self.manager
                    .effects
                    .schedule(Target::entity(entity_type, self.entity_id.as_str()), effects);
                self.finish();
                deleted
            }
            Err(error) => {
                warn!(entity_type, entity_id = %self.entity_id, error = %error, "Command failed");
                let _ = respond_to.send(Err(error));
                self.finish();
                false
            }
        }
    }

    /// Turns a persistence failure into the caller-facing error, resynchronizing the
    /// version first when another writer got there before us. A failed reload leaves
    /// the in-memory state unusable and marks the instance for stopping.
    async fn recover(&mut self, error: RepositoryError) -> FrameworkError {
        if let RepositoryError::Conflict { actual, .. } = &error {
            warn!(
                entity_type = E::ENTITY_TYPE,
                entity_id = %self.entity_id,
                expected = ?self.version,
                actual = ?actual,
                "Persistence conflict, reloading"
            );
            if let Err(reload) = self.load().await {
                self.state = None;
                self.version = None;
                self.desynced = Some(reload);
            }
        }
        error.into()
    }

    fn finish(&self) {
        self.manager.passivation.mark_idle(&self.entity_id);
        self.manager.passivation.touch(&self.entity_id);
    }

    fn try_unload(&self, generation: Option<u64>) -> bool {
        self.manager
            .deregister_if_idle(&self.entity_id, self.incarnation, &self.receiver, generation)
    }

    /// Stops an instance whose state could not be loaded and fails everything queued
    /// for it with the load error. The next command activates a fresh instance.
    fn abandon(mut self, error: RepositoryError, reason: &'static str) {
        let error = FrameworkError::from(error);
        warn!(
            entity_type = E::ENTITY_TYPE,
            entity_id = %self.entity_id,
            error = %error,
            "{reason}"
        );
        self.manager.deregister(&self.entity_id, self.incarnation);
        self.receiver.close();
        while let Ok(envelope) = self.receiver.try_recv() {
            if let Envelope::Command { respond_to, .. } = envelope {
                let _ = respond_to.send(Err(error.clone()));
            }
        }
    }
}
