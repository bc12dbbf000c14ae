//! # Cart Client
//!
//! Provides a high-level API for interacting with carts.
//! It wraps an `EntityClient<Cart>` and exposes domain-specific methods.
use crate::cart_entity::{CartError, ENTITY_TYPE};
use crate::model::{Balance, Cart, CartCommand, CartView};
use async_trait::async_trait;
use entity_framework::{ActionReply, DomainClient, EntityClient, FrameworkError};
use tracing::{debug, instrument};

/// Client for interacting with cart entities.
#[derive(Clone)]
pub struct CartClient {
    inner: EntityClient<Cart>,
}

impl CartClient {
    pub fn new(inner: EntityClient<Cart>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DomainClient<Cart> for CartClient {
    type Error = CartError;

    fn inner(&self) -> &EntityClient<Cart> {
        &self.inner
    }

    fn map_error(e: FrameworkError) -> Self::Error {
        CartError::Framework(e)
    }
}

impl CartClient {
    pub async fn add_item(
        &self,
        cart_id: &str,
        sku: impl Into<String>,
        quantity: u32,
    ) -> Result<CartView, CartError> {
        let command = CartCommand::AddItem {
            sku: sku.into(),
            quantity,
        };
        view(self.send(cart_id, command).await?)
    }

    pub async fn remove_item(
        &self,
        cart_id: &str,
        sku: impl Into<String>,
    ) -> Result<CartView, CartError> {
        view(self.send(cart_id, CartCommand::RemoveItem { sku: sku.into() }).await?)
    }

    pub async fn get_cart(&self, cart_id: &str) -> Result<CartView, CartError> {
        view(self.send(cart_id, CartCommand::GetCart).await?)
    }

    /// Deletes the cart.
    pub async fn clear(&self, cart_id: &str) -> Result<CartView, CartError> {
        view(self.send(cart_id, CartCommand::Clear).await?)
    }

    /// Charges the cart total to `wallet_id`, then clears the cart.
    ///
    /// Returns the wallet balance after the debit. Retrying after a retryable error is
    /// safe: the wallet applies each cart's debit once.
    #[instrument(skip(self))]
    pub async fn checkout(&self, cart_id: &str, wallet_id: &str) -> Result<Balance, CartError> {
        debug!("Checking out");
        let payload = serde_json::to_value(CartCommand::Checkout {
            wallet_id: wallet_id.to_string(),
        })
        .map_err(|e| CartError::Framework(FrameworkError::Codec(e.to_string())))?;

        // The typed client would hand the forward back; the runtime follows it.
        let reply = self
            .inner
            .runtime()
            .handle(ENTITY_TYPE, cart_id, payload)
            .await?;
        let balance = match reply {
            ActionReply::Message { payload, .. } => serde_json::from_value::<Balance>(payload)
                .map_err(|e| CartError::UnexpectedReply(e.to_string()))?,
            ActionReply::Failure { description, .. } => {
                return Err(CartError::Rejected(description))
            }
            other => return Err(CartError::UnexpectedReply(other.kind().to_string())),
        };

        self.clear(cart_id).await?;
        Ok(balance)
    }
}

fn view(reply: ActionReply<CartView>) -> Result<CartView, CartError> {
    match reply {
        ActionReply::Message { payload, .. } => Ok(payload),
        ActionReply::Failure { description, .. } => Err(CartError::Rejected(description)),
        other => Err(CartError::UnexpectedReply(other.kind().to_string())),
    }
}
