use entity_framework::FrameworkError;
use thiserror::Error;

/// Errors surfaced by [`CartClient`](crate::clients::CartClient).
#[derive(Debug, Error)]
pub enum CartError {
    /// The cart (or the wallet it forwarded to) refused the command.
    #[error("Cart command rejected: {0}")]
    Rejected(String),

    #[error("Unexpected reply from cart: {0}")]
    UnexpectedReply(String),

    #[error("Runtime error: {0}")]
    Framework(#[from] FrameworkError),
}

impl CartError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CartError::Framework(e) if e.is_retryable())
    }
}
