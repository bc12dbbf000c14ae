//! # Replies and Effects
//!
//! Command handlers answer with an [`ActionReply`]: a closed set of outcomes, each of
//! which can carry an ordered list of [`Effect`]s.
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | `Message` | Answer the caller with a payload |
//! | `Forward` | Redirect the command to another [`Target`] |
//! | `NoReply` | Acknowledge without a payload |
//! | `Failure` | Business-level failure, delivered as a normal outcome |
//!
//! Replies are plain values. [`ActionReply::with_effects`] never mutates the receiver; it
//! returns a new reply with the effects appended, so a reply can be shared, cloned and
//! extended without surprising anyone holding the original.
//!
//! ```rust
//! use entity_framework::reply::{ActionReply, Effect};
//! use serde_json::json;
//!
//! let failure: ActionReply<()> = ActionReply::failure("insufficient funds");
//! let notified = failure.with_effects([Effect::service("admin", "notify", json!({"wallet": "w-1"}))]);
//!
//! assert!(failure.effects().is_empty());
//! assert_eq!(notified.effects().len(), 1);
//! assert_eq!(notified.failure_description(), Some("insufficient funds"));
//! ```
//!
//! Effects are executed by the runtime after the reply is final: after the state
//! change committed for mutating commands, straight away otherwise. A handler never
//! runs them itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display};

/// Something an effect or a forward can be addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    /// A hosted entity, addressed by type and id.
    Entity {
        entity_type: String,
        entity_id: String,
    },
    /// A registered [`ServiceHandler`](crate::service::ServiceHandler) method.
    Service { service: String, method: String },
}

impl Target {
    pub fn entity(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Target::Entity {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    pub fn service(service: impl Into<String>, method: impl Into<String>) -> Self {
        Target::Service {
            service: service.into(),
            method: method.into(),
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Entity {
                entity_type,
                entity_id,
            } => write!(f, "{entity_type}/{entity_id}"),
            Target::Service { service, method } => write!(f, "{service}.{method}"),
        }
    }
}

/// A side-effecting call scheduled to run after a reply is finalized.
///
/// Its position in the reply's effect list is its execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub target: Target,
    pub payload: Value,
}

impl Effect {
    pub fn new(target: Target, payload: Value) -> Self {
        Self { target, payload }
    }

    /// An effect that sends `payload` as a command to another entity.
    pub fn entity(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::new(Target::entity(entity_type, entity_id), payload)
    }

    /// An effect that calls a registered service.
    pub fn service(service: impl Into<String>, method: impl Into<String>, payload: Value) -> Self {
        Self::new(Target::service(service, method), payload)
    }
}

/// The outcome of handling one command.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionReply<T> {
    Message {
        payload: T,
        effects: Vec<Effect>,
    },
    Forward {
        target: Target,
        payload: Value,
        effects: Vec<Effect>,
    },
    NoReply {
        effects: Vec<Effect>,
    },
    Failure {
        description: String,
        effects: Vec<Effect>,
    },
}

impl<T> ActionReply<T> {
    pub fn message(payload: T) -> Self {
        ActionReply::Message {
            payload,
            effects: Vec::new(),
        }
    }

    pub fn forward(target: Target, payload: Value) -> Self {
        ActionReply::Forward {
            target,
            payload,
            effects: Vec::new(),
        }
    }

    pub fn no_reply() -> Self {
        ActionReply::NoReply {
            effects: Vec::new(),
        }
    }

    pub fn failure(description: impl Into<String>) -> Self {
        ActionReply::Failure {
            description: description.into(),
            effects: Vec::new(),
        }
    }

    /// Returns a copy of this reply with `effects` appended after the existing ones.
    pub fn with_effects(&self, effects: impl IntoIterator<Item = Effect>) -> Self
    where
        T: Clone,
    {
        self.clone().and_effects(effects)
    }

    /// Consuming variant of [`with_effects`](Self::with_effects), for building a reply
    /// that nobody else holds yet.
    pub fn and_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects_mut().extend(effects);
        self
    }

    pub fn effects(&self) -> &[Effect] {
        match self {
            ActionReply::Message { effects, .. }
            | ActionReply::Forward { effects, .. }
            | ActionReply::NoReply { effects }
            | ActionReply::Failure { effects, .. } => effects,
        }
    }

    fn effects_mut(&mut self) -> &mut Vec<Effect> {
        match self {
            ActionReply::Message { effects, .. }
            | ActionReply::Forward { effects, .. }
            | ActionReply::NoReply { effects }
            | ActionReply::Failure { effects, .. } => effects,
        }
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            ActionReply::Message { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ActionReply::Failure { .. })
    }

    pub fn failure_description(&self) -> Option<&str> {
        match self {
            ActionReply::Failure { description, .. } => Some(description),
            _ => None,
        }
    }

    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionReply::Message { .. } => "message",
            ActionReply::Forward { .. } => "forward",
            ActionReply::NoReply { .. } => "no_reply",
            ActionReply::Failure { .. } => "failure",
        }
    }

    /// Converts the message payload, keeping the variant and effects.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<ActionReply<U>, E> {
        Ok(match self {
            ActionReply::Message { payload, effects } => ActionReply::Message {
                payload: f(payload)?,
                effects,
            },
            ActionReply::Forward {
                target,
                payload,
                effects,
            } => ActionReply::Forward {
                target,
                payload,
                effects,
            },
            ActionReply::NoReply { effects } => ActionReply::NoReply { effects },
            ActionReply::Failure {
                description,
                effects,
            } => ActionReply::Failure {
                description,
                effects,
            },
        })
    }
}
