//! # Wallet Entity
//!
//! Prepaid wallets keyed by wallet id. Overdrafts are refused with a `Failure` reply
//! that also notifies the admin service, so operators hear about declined payments
//! without the caller having to do anything.

pub mod error;

pub use error::*;

use crate::model::{Balance, Wallet, WalletCommand};
use crate::services::{ADMIN_SERVICE, NOTIFY_METHOD};
use async_trait::async_trait;
use entity_framework::{ActionReply, CommandContext, Effect, Entity};
use serde_json::json;

pub const ENTITY_TYPE: &str = "wallet";

impl Wallet {
    fn overdraft(&self, wallet_id: &str, requested: u64) -> ActionReply<Balance> {
        ActionReply::failure("insufficient funds").and_effects([Effect::service(
            ADMIN_SERVICE,
            NOTIFY_METHOD,
            json!({
                "wallet_id": wallet_id,
                "requested": requested,
                "balance": self.balance,
            }),
        )])
    }

    fn to_balance(&self) -> Balance {
        Balance {
            balance: self.balance,
        }
    }
}

#[async_trait]
impl Entity for Wallet {
    const ENTITY_TYPE: &'static str = ENTITY_TYPE;
    type Command = WalletCommand;
    type Reply = Balance;
    type Context = ();

    fn initial_state(_entity_id: &str) -> Self {
        Wallet::default()
    }

    fn validate(command: &WalletCommand) -> Result<(), String> {
        match command {
            WalletCommand::Deposit { amount: 0 }
            | WalletCommand::Withdraw { amount: 0 }
            | WalletCommand::Debit { amount: 0, .. } => Err("amount must be positive".into()),
            WalletCommand::Debit { reference, .. } if reference.is_empty() => {
                Err("debit reference must not be empty".into())
            }
            _ => Ok(()),
        }
    }

    async fn handle_command(
        &self,
        command: WalletCommand,
        ctx: &mut CommandContext<'_, Self>,
    ) -> ActionReply<Balance> {
        match command {
            WalletCommand::Deposit { amount } => {
                let Some(balance) = self.balance.checked_add(amount) else {
                    return ActionReply::failure("balance overflow");
                };
                let wallet = Wallet {
                    balance,
                    ..self.clone()
                };
                ctx.update_state(wallet);
                ActionReply::message(Balance { balance })
            }
            WalletCommand::Withdraw { amount } if amount > self.balance => {
                self.overdraft(ctx.entity_id(), amount)
            }
            WalletCommand::Withdraw { amount } => {
                let wallet = Wallet {
                    balance: self.balance - amount,
                    ..self.clone()
                };
                let reply = wallet.to_balance();
                ctx.update_state(wallet);
                ActionReply::message(reply)
            }
            WalletCommand::Debit { reference, .. } if self.debits.contains(&reference) => {
                ActionReply::message(self.to_balance())
            }
            WalletCommand::Debit { amount, .. } if amount > self.balance => {
                self.overdraft(ctx.entity_id(), amount)
            }
            WalletCommand::Debit { amount, reference } => {
                let mut wallet = self.clone();
                wallet.balance -= amount;
                wallet.debits.push(reference);
                let reply = wallet.to_balance();
                ctx.update_state(wallet);
                ActionReply::message(reply)
            }
            WalletCommand::GetBalance => ActionReply::message(self.to_balance()),
        }
    }
}
