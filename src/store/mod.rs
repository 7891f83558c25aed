//! Persistence of the bridge ledger.
use crate::ledger::Ledger;
use async_trait::async_trait;

/// Ledger persistence. The bridge loads the ledger at the start of every
/// call and saves it once the call's effects have been applied.
#[async_trait]
pub trait Store: Send + Sync {
    /// Stored ledger; an empty one on first use.
    async fn load_ledger(&self) -> anyhow::Result<Ledger>;

    /// Replaces the stored ledger.
    async fn save_ledger(&self, ledger: &Ledger) -> anyhow::Result<()>;
}

// concrete stores live here
#[cfg(feature = "store-sqlite")]
pub mod sqlite_store;
#[cfg(feature = "store-sqlite")]
pub use sqlite_store::SqliteStore;
