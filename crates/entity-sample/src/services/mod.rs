//! # Services
//!
//! Non-entity effect targets. Only the admin notifier lives here for now.

use async_trait::async_trait;
use entity_framework::ServiceHandler;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

pub const ADMIN_SERVICE: &str = "admin";
pub const NOTIFY_METHOD: &str = "notify";

/// Collects operator notifications.
///
/// A real deployment would page someone; this one logs and keeps them in memory so
/// they can be inspected.
#[derive(Clone, Default)]
pub struct AdminNotifier {
    notifications: Arc<Mutex<Vec<Value>>>,
}

impl AdminNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received so far, oldest first.
    pub fn notifications(&self) -> Vec<Value> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl ServiceHandler for AdminNotifier {
    async fn call(&self, method: &str, payload: Value) -> Result<Value, String> {
        match method {
            NOTIFY_METHOD => {
                info!(%payload, "Admin notified");
                let mut notifications = self
                    .notifications
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                notifications.push(payload);
                Ok(json!({ "received": notifications.len() }))
            }
            other => {
                warn!(method = other, "Unknown admin method");
                Err(format!("unknown method: {other}"))
            }
        }
    }
}
