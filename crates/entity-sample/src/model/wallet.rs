use serde::{Deserialize, Serialize};

/// A prepaid wallet. Amounts are in cents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub balance: u64,
    /// References of debits already applied, so a retried checkout is charged once.
    #[serde(default)]
    pub debits: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalletCommand {
    Deposit { amount: u64 },
    Withdraw { amount: u64 },
    Debit { amount: u64, reference: String },
    GetBalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub balance: u64,
}
