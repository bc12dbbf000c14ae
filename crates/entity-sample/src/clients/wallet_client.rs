//! # Wallet Client
//!
//! Wraps an `EntityClient<Wallet>`; amounts are in cents.
use crate::model::{Balance, Wallet, WalletCommand};
use crate::wallet_entity::WalletError;
use async_trait::async_trait;
use entity_framework::{ActionReply, DomainClient, EntityClient, FrameworkError};
use tracing::instrument;

#[derive(Clone)]
pub struct WalletClient {
    inner: EntityClient<Wallet>,
}

impl WalletClient {
    pub fn new(inner: EntityClient<Wallet>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl DomainClient<Wallet> for WalletClient {
    type Error = WalletError;

    fn inner(&self) -> &EntityClient<Wallet> {
        &self.inner
    }

    fn map_error(e: FrameworkError) -> Self::Error {
        WalletError::Framework(e)
    }
}

impl WalletClient {
    #[instrument(skip(self))]
    pub async fn deposit(&self, wallet_id: &str, amount: u64) -> Result<u64, WalletError> {
        balance(self.send(wallet_id, WalletCommand::Deposit { amount }).await?)
    }

    #[instrument(skip(self))]
    pub async fn withdraw(&self, wallet_id: &str, amount: u64) -> Result<u64, WalletError> {
        balance(self.send(wallet_id, WalletCommand::Withdraw { amount }).await?)
    }

    pub async fn balance(&self, wallet_id: &str) -> Result<u64, WalletError> {
        balance(self.send(wallet_id, WalletCommand::GetBalance).await?)
    }
}

fn balance(reply: ActionReply<Balance>) -> Result<u64, WalletError> {
    match reply {
        ActionReply::Message {
            payload: Balance { balance },
            ..
        } => Ok(balance),
        ActionReply::Failure { description, .. } => Err(WalletError::from_failure(&description)),
        other => Err(WalletError::UnexpectedReply(other.kind().to_string())),
    }
}
