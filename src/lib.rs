#![forbid(unsafe_code)]
#![deny(missing_docs)]
//! bridge-settlement: the settlement core of a Bitcoin bridge.
//!
//! Threshold-ECDSA wallets hold the bridged Bitcoin. Every Bitcoin
//! transaction they sign (deposit sweeps, redemptions, moving funds, moved
//! funds sweeps) is proven back with an SPV proof and settled against a
//! [`Ledger`] of wallets, deposits and redemption requests.
//!
//! ## What you implement
//! - [`Bank`]: the token ledger the bridge mints to, burns from and escrows in.
//!   Each call's balance changes arrive as one all-or-nothing batch.
//! - [`EcdsaWalletRegistry`]: creates, slashes and retires signing groups.
//! - [`Relay`]: the current and previous Bitcoin epoch difficulty.
//! - [`Store`]: persists the [`Ledger`]; [`SqliteStore`] ships with the crate.
//!
//! ## What the bridge does
//! - Verifies SPV proofs against the relay difficulty.
//! - Checks every settlement rule on a fresh copy of the ledger.
//! - Replays the resulting registry calls and one bank batch, then persists the ledger.
//! - Validates off-chain proposals before wallets sign them.
//!
//! The settlement rules themselves are plain functions over `&mut Ledger`
//! (see [`deposit`], [`sweep`], [`redemption`], [`moving_funds`],
//! [`moved_funds`], [`wallets`]) and can be used without the async runtime.
//!
//! ## Minimal usage
//! ```rust,ignore
//! use bridge_settlement::prelude::*;
//!
//! async fn run(bank: impl Bank + 'static, registry: impl EcdsaWalletRegistry + 'static,
//!              relay: impl Relay + 'static) -> anyhow::Result<()> {
//!     let store = SqliteStore::new("bridge.sqlite")?;
//!     let bridge = Bridge::new(store, bank, registry, relay, Address([0xee; 20]))
//!         .with_params(BridgeParams::from_json_file("bridge.json")?)?
//!         .with_spv_maintainers([Address([0x01; 20])]);
//!
//!     let ctx = CallContext::new(Address([0x02; 20]), 1_700_000_000);
//!     bridge.request_new_wallet(ctx, None).await?;
//!     Ok(())
//! }
//! ```

/// Hash newtypes, UTXOs and the raw transaction and proof shapes.
pub mod types;

/// Typed errors and their failure classes.
pub mod error;

/// Bridge parameters and their deployment defaults.
pub mod config;

/// Bitcoin transaction vector parsing and output classification.
pub mod tx;

/// SPV proof verification.
pub mod spv;

/// Persisted bridge state and produced collaborator calls.
pub mod ledger;

/// Wallet lifecycle transitions.
pub mod wallets;

/// Deposit reveal.
pub mod deposit;

/// Deposit sweep settlement.
pub mod sweep;

/// Redemption requests, settlement and timeouts.
pub mod redemption;

/// Moving funds commitment, settlement and timeouts.
pub mod moving_funds;

/// Moved funds sweep settlement and timeouts.
pub mod moved_funds;

/// Off-chain proposal checks.
pub mod validator;

/// Token ledger abstraction.
#[cfg(feature = "runtime")]
pub mod bank;

/// ECDSA wallet registry abstraction.
#[cfg(feature = "runtime")]
pub mod registry;

/// Bitcoin difficulty relay abstraction.
#[cfg(feature = "runtime")]
pub mod relay;

/// Async orchestrator serializing bridge calls.
#[cfg(feature = "runtime")]
pub mod engine;

/// Persistence layer (traits and SQLite implementation).
#[cfg(feature = "runtime")]
pub mod store;

// Public re-exports
pub use config::BridgeParams;
pub use error::{BridgeError, BridgeResult, ErrorKind, ProposalError, SpvError, TxError};
pub use ledger::{Ledger, Wallet, WalletState};
pub use types::{
    Address, BitcoinTxInfo, CallContext, CoinbaseProof, EcdsaWalletId, SpvProof, Utxo,
    WalletPubKeyHash,
};

#[cfg(feature = "runtime")]
pub use bank::{BalanceOp, Bank};
#[cfg(feature = "runtime")]
pub use engine::Bridge;
#[cfg(feature = "runtime")]
pub use registry::EcdsaWalletRegistry;
#[cfg(feature = "runtime")]
pub use relay::Relay;
#[cfg(feature = "store-sqlite")]
pub use store::SqliteStore;
#[cfg(feature = "runtime")]
pub use store::Store;

/// Convenience prelude for end users.
pub mod prelude {
    pub use crate::{
        Address, BitcoinTxInfo, BridgeError, BridgeParams, BridgeResult, CallContext,
        CoinbaseProof, EcdsaWalletId, Ledger, SpvProof, Utxo, Wallet, WalletPubKeyHash,
        WalletState,
    };

    #[cfg(feature = "runtime")]
    pub use crate::{BalanceOp, Bank, Bridge, EcdsaWalletRegistry, Relay, Store};

    #[cfg(feature = "store-sqlite")]
    pub use crate::SqliteStore;
}
