//! # Mailbox Messages
//!
//! This module defines the messages queued in an entity instance's mailbox. Every
//! active `(type, id)` has exactly one mailbox and one worker draining it, so
//! everything delivered here is processed strictly one at a time.

use crate::entity::Entity;
use crate::error::FrameworkError;
use crate::reply::ActionReply;
use crate::sync::InFlightGuard;
use tokio::sync::oneshot;

/// Type alias for the one-shot response channel used by instances.
pub type Response<T> = oneshot::Sender<Result<T, FrameworkError>>;

/// A message for a single entity instance.
pub(crate) enum Envelope<E: Entity> {
    /// Handle one command and answer on `respond_to`.
    Command {
        command: E::Command,
        respond_to: Response<ActionReply<E::Reply>>,
        /// Keeps the runtime from reporting quiescence until processing finished.
        _in_flight: InFlightGuard,
    },
    /// Advisory unload request from the passivation timer.
    Passivate { generation: u64 },
}
