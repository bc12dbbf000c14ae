//! # Services
//!
//! Not every effect or forward goes to an entity. A [`ServiceHandler`] is a stateless
//! collaborator (a notifier, a payment gateway, ...) registered under a name on the
//! runtime and addressed with [`Target::Service`](crate::reply::Target::Service).

use async_trait::async_trait;
use serde_json::Value;

/// A named, stateless call target.
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    /// Invokes `method` with `payload`.
    ///
    /// The returned value becomes the `Message` payload when the call answers a
    /// forward; it is discarded when the call is an effect.
    async fn call(&self, method: &str, payload: Value) -> Result<Value, String>;
}
