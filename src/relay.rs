//! Source of the Bitcoin difficulty the SPV verifier checks proofs against.
use async_trait::async_trait;

/// Relay tracking the difficulty of the current and previous retarget epochs.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Difficulty of the current epoch.
    async fn current_epoch_difficulty(&self) -> anyhow::Result<u128>;

    /// Difficulty of the previous epoch.
    async fn prev_epoch_difficulty(&self) -> anyhow::Result<u128>;
}
