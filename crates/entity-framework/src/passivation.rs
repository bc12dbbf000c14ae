//! # Passivation
//!
//! Passivation unloads an idle entity instance from memory while its durable state
//! stays in the store. The [`PassivationManager`] keeps one rearmable timer per active
//! entity id and, when a timer expires on an idle id, emits a [`PassivationRequest`]
//! on a channel. It never touches runtime state itself.
//!
//! ## Busy / Idle
//!
//! Commands are bracketed by [`mark_busy`](PassivationManager::mark_busy) and
//! [`mark_idle`](PassivationManager::mark_idle). A timer that expires while the id is
//! busy does not fire; the firing is deferred and emitted when the id becomes idle.
//!
//! ## Advisory Requests
//!
//! Each request carries the timer generation it was armed with. Every
//! [`touch`](PassivationManager::touch) bumps the generation, so the consumer can ask
//! [`is_current`](PassivationManager::is_current) before acting and decline stale
//! requests. A declined request needs no cleanup: the touch that made it stale has
//! already rearmed the timer.

use crate::sync::lock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

/// Default idle timeout for [`PassivationStrategy::default_timeout`].
pub const DEFAULT_PASSIVATION_TIMEOUT: Duration = Duration::from_secs(30);

/// When an idle entity instance should be unloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassivationStrategy {
    /// Unload after this long without a command.
    Timeout(Duration),
    /// Keep the instance until shutdown or deletion.
    Never,
}

impl PassivationStrategy {
    pub fn default_timeout() -> Self {
        PassivationStrategy::Timeout(DEFAULT_PASSIVATION_TIMEOUT)
    }

    pub fn timeout(duration: Duration) -> Self {
        PassivationStrategy::Timeout(duration)
    }

    pub fn never() -> Self {
        PassivationStrategy::Never
    }
}

impl Default for PassivationStrategy {
    fn default() -> Self {
        Self::default_timeout()
    }
}

/// Emitted when an idle id's timer expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassivationRequest {
    pub entity_id: String,
    pub generation: u64,
}

#[derive(Default)]
struct TimerSlot {
    deadline: Option<Instant>,
    generation: u64,
    in_flight: usize,
    /// Expired while busy; fire on the next transition to idle.
    deferred: bool,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    strategy: PassivationStrategy,
    slots: Mutex<HashMap<String, TimerSlot>>,
    requests: mpsc::UnboundedSender<PassivationRequest>,
}

/// Per-id idle timers for one entity type.
///
/// Cheap to clone; clones share the same timers.
#[derive(Clone)]
pub struct PassivationManager {
    inner: Arc<Inner>,
}

impl PassivationManager {
    /// Creates a manager and the receiving end of its request channel.
    pub fn new(
        strategy: PassivationStrategy,
    ) -> (Self, mpsc::UnboundedReceiver<PassivationRequest>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            inner: Arc::new(Inner {
                strategy,
                slots: Mutex::new(HashMap::new()),
                requests,
            }),
        };
        (manager, receiver)
    }

    pub fn strategy(&self) -> PassivationStrategy {
        self.inner.strategy
    }

    /// Rearms the timer for `entity_id` to `now + timeout`. No-op under `Never`.
    ///
    /// A timeout too large to be represented as a deadline never fires.
    pub fn touch(&self, entity_id: &str) {
        let PassivationStrategy::Timeout(timeout) = self.inner.strategy else {
            return;
        };
        let mut slots = lock(&self.inner.slots);
        let slot = slots.entry(entity_id.to_string()).or_default();
        slot.generation += 1;
        slot.deferred = false;
        slot.deadline = Instant::now().checked_add(timeout);
        if slot.deadline.is_none() {
            trace!(entity_id, ?timeout, "Passivation timeout out of range, timer disarmed");
            return;
        }
        // A running timer picks the new deadline up when it wakes.
        if slot.task.is_none() {
            slot.task = Some(tokio::spawn(run_timer(
                Arc::downgrade(&self.inner),
                entity_id.to_string(),
            )));
        }
        trace!(entity_id, generation = slot.generation, "Passivation timer armed");
    }

    /// Records that a command for `entity_id` is in flight.
    pub fn mark_busy(&self, entity_id: &str) {
        let mut slots = lock(&self.inner.slots);
        slots.entry(entity_id.to_string()).or_default().in_flight += 1;
    }

    /// Records that a command for `entity_id` finished. Emits a deferred request if
    /// the timer expired while the id was busy.
    pub fn mark_idle(&self, entity_id: &str) {
        let mut slots = lock(&self.inner.slots);
        let Some(slot) = slots.get_mut(entity_id) else {
            return;
        };
        slot.in_flight = slot.in_flight.saturating_sub(1);
        if slot.in_flight == 0 && slot.deferred {
            slot.deferred = false;
            let _ = self.inner.requests.send(PassivationRequest {
                entity_id: entity_id.to_string(),
                generation: slot.generation,
            });
        }
    }

    pub fn is_busy(&self, entity_id: &str) -> bool {
        lock(&self.inner.slots)
            .get(entity_id)
            .is_some_and(|slot| slot.in_flight > 0)
    }

    /// True when a request with `generation` may still be honoured: no touch since it
    /// was armed and nothing in flight.
    pub fn is_current(&self, entity_id: &str, generation: u64) -> bool {
        lock(&self.inner.slots)
            .get(entity_id)
            .is_some_and(|slot| slot.generation == generation && slot.in_flight == 0)
    }

    /// Forgets `entity_id` and cancels its timer.
    pub fn remove(&self, entity_id: &str) {
        if let Some(slot) = lock(&self.inner.slots).remove(entity_id) {
            if let Some(task) = slot.task {
                task.abort();
            }
        }
    }

    /// Cancels every timer.
    pub fn clear(&self) {
        for (_, slot) in lock(&self.inner.slots).drain() {
            if let Some(task) = slot.task {
                task.abort();
            }
        }
    }

    /// Number of ids with a slot (armed timer or in-flight command).
    pub fn tracked(&self) -> usize {
        lock(&self.inner.slots).len()
    }
}

/// Sleeps until the slot's deadline, following rearms, then fires or defers.
async fn run_timer(inner: Weak<Inner>, entity_id: String) {
    loop {
        let deadline = {
            let Some(inner) = inner.upgrade() else { return };
            let slots = lock(&inner.slots);
            match slots.get(&entity_id).and_then(|slot| slot.deadline) {
                Some(deadline) => deadline,
                None => return,
            }
        };

        tokio::time::sleep_until(deadline).await;

        let Some(inner) = inner.upgrade() else { return };
        let mut slots = lock(&inner.slots);
        let Some(slot) = slots.get_mut(&entity_id) else {
            return;
        };
        match slot.deadline {
            Some(current) if current > Instant::now() => continue,
            None => {
                slot.task = None;
                return;
            }
            Some(_) => {}
        }

        slot.task = None;
        slot.deadline = None;
        if slot.in_flight > 0 {
            trace!(entity_id, "Passivation deferred, command in flight");
            slot.deferred = true;
        } else {
            let _ = inner.requests.send(PassivationRequest {
                entity_id: entity_id.clone(),
                generation: slot.generation,
            });
        }
        return;
    }
}
