//! Token ledger holding the bridged balances.
//!
//! The bridge owns a balance on the bank: redemptions move redeemer funds
//! into it and burn them once the Bitcoin is paid out, sweeps mint to
//! depositors.
use crate::ledger::BankCall;
use crate::types::Address;
use async_trait::async_trait;

/// One balance change, as the bank sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BalanceOp {
    /// Move `amount` from `from` to the bridge.
    TransferFrom {
        /// Debited account.
        from: Address,
        /// Satoshi.
        amount: u64,
    },
    /// Move `amount` from the bridge to `to`.
    Transfer {
        /// Credited account.
        to: Address,
        /// Satoshi.
        amount: u64,
    },
    /// Burn `amount` of the bridge balance.
    Decrease {
        /// Satoshi.
        amount: u64,
    },
    /// Mint to each `(recipient, amount)` pair.
    Increase {
        /// `(recipient, amount)` pairs.
        recipients: Vec<(Address, u64)>,
    },
    /// Mint the total to `vault` and notify it of the depositors it covers.
    IncreaseAndCall {
        /// Vault receiving the total.
        vault: Address,
        /// `(depositor, amount)` pairs.
        depositors: Vec<(Address, u64)>,
    },
}

impl BalanceOp {
    /// Resolves a settlement call, routing treasury legs to `treasury`.
    pub fn from_call(call: BankCall, treasury: Address) -> Self {
        match call {
            BankCall::TransferFrom { from, amount } => Self::TransferFrom { from, amount },
            BankCall::Transfer { to, amount } => Self::Transfer { to, amount },
            BankCall::TransferToTreasury { amount } => Self::Transfer {
                to: treasury,
                amount,
            },
            BankCall::DecreaseBalance { amount } => Self::Decrease { amount },
            BankCall::IncreaseBalances { recipients } => Self::Increase { recipients },
            BankCall::IncreaseBalanceAndCall { vault, recipients } => Self::IncreaseAndCall {
                vault,
                depositors: recipients,
            },
            BankCall::IncreaseTreasuryBalance { amount } => Self::Increase {
                recipients: vec![(treasury, amount)],
            },
        }
    }
}

/// Balance operations the bridge performs.
#[async_trait]
pub trait Bank: Send + Sync {
    /// Applies `ops` in order as one batch.
    ///
    /// Either every op takes effect or, on error, none does.
    async fn apply(&self, ops: &[BalanceOp]) -> anyhow::Result<()>;
}
