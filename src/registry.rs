//! Threshold ECDSA wallet registry: creates signing groups, slashes and
//! retires them.
use crate::types::{Address, EcdsaWalletId};
use async_trait::async_trait;

/// Registry operations the bridge performs.
#[async_trait]
pub trait EcdsaWalletRegistry: Send + Sync {
    /// Starts the creation of a new signing group.
    async fn request_new_wallet(&self) -> anyhow::Result<()>;

    /// Seizes `amount` of stake from each of `members` and rewards `notifier`
    /// with `reward_multiplier` percent of it.
    async fn seize(
        &self,
        amount: u128,
        reward_multiplier: u32,
        notifier: Address,
        wallet_id: EcdsaWalletId,
        members: &[u32],
    ) -> anyhow::Result<()>;

    /// Retires a signing group.
    async fn close_wallet(&self, wallet_id: EcdsaWalletId) -> anyhow::Result<()>;

    /// True if `operator` is the member at `member_index` of `members`.
    async fn is_wallet_member(
        &self,
        wallet_id: EcdsaWalletId,
        members: &[u32],
        operator: Address,
        member_index: usize,
    ) -> anyhow::Result<bool>;
}
