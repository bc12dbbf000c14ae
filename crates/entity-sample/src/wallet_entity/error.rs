use entity_framework::FrameworkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Wallet command rejected: {0}")]
    Rejected(String),

    #[error("Unexpected reply from wallet: {0}")]
    UnexpectedReply(String),

    #[error("Runtime error: {0}")]
    Framework(#[from] FrameworkError),
}

impl WalletError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Framework(e) if e.is_retryable())
    }

    pub(crate) fn from_failure(description: &str) -> Self {
        match description {
            "insufficient funds" => WalletError::InsufficientFunds,
            other => WalletError::Rejected(other.to_string()),
        }
    }
}
