//! Persisted bridge state and the outbox of collaborator calls an operation
//! produces.
//!
//! Engines mutate a [`Ledger`] in place and push the external calls they need
//! into [`Effects`]. The orchestrator runs the engines on a copy, so a failed
//! call never leaves a partial mutation behind.
use crate::error::{BridgeError, BridgeResult};
use crate::types::{
    Address, DepositKey, EcdsaWalletId, MovedFundsSweepKey, OutpointKey, RedemptionKey,
    TargetWalletsCommitment, Utxo, UtxoCommitment, WalletPubKeyHash,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Lifecycle state of a wallet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletState {
    /// Not registered.
    #[default]
    Unknown,
    /// Accepts deposits and serves redemptions.
    Live,
    /// Must move its funds to other wallets.
    MovingFunds,
    /// Funds are gone; waiting out the closing period.
    Closing,
    /// Closed for good.
    Closed,
    /// Proven fraudulent.
    Terminated,
}

/// A registered wallet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Signing group in the ECDSA registry.
    pub ecdsa_wallet_id: EcdsaWalletId,
    /// Commitment to the current main UTXO, if the wallet holds one.
    pub main_utxo_hash: Option<UtxoCommitment>,
    /// Sum of redeemable amounts of pending requests.
    pub pending_redemptions_value: u64,
    /// Registration time.
    pub created_at: u32,
    /// When the wallet entered MovingFunds, or when its timeout was last reset.
    pub moving_funds_requested_at: u32,
    /// When the wallet entered Closing.
    pub closing_started_at: u32,
    /// Moved funds sweep requests targeting this wallet that are still pending.
    pub pending_moved_funds_sweep_requests_count: u32,
    /// Lifecycle state.
    pub state: WalletState,
    /// Commitment to the ordered target wallets of a moving funds transaction.
    pub moving_funds_target_wallets_commitment_hash: Option<TargetWalletsCommitment>,
}

impl Wallet {
    /// Fails with [`BridgeError::UnexpectedWalletState`] unless the wallet is in one of `allowed`.
    pub fn require_state(
        &self,
        pkh: &WalletPubKeyHash,
        allowed: &[WalletState],
        expected: &'static str,
    ) -> BridgeResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(BridgeError::wallet_state(*pkh, self.state, expected))
        }
    }

    /// Checks the claimed main UTXO against the stored commitment.
    ///
    /// Fails with [`BridgeError::NoMainUtxo`] if the wallet holds none.
    pub fn require_main_utxo(&self, claimed: &Utxo) -> BridgeResult<()> {
        match self.main_utxo_hash {
            None => Err(BridgeError::NoMainUtxo),
            Some(c) if c == claimed.commitment() => Ok(()),
            Some(_) => Err(BridgeError::InvalidMainUtxo),
        }
    }

    /// Resolves an optional claimed main UTXO.
    ///
    /// Returns `None` when the wallet holds no main UTXO, whatever the caller
    /// claimed. Otherwise the claim must match.
    pub fn resolve_main_utxo(&self, claimed: Option<&Utxo>) -> BridgeResult<Option<Utxo>> {
        match (self.main_utxo_hash, claimed) {
            (None, _) => Ok(None),
            (Some(c), Some(u)) if c == u.commitment() => Ok(Some(*u)),
            (Some(_), _) => Err(BridgeError::InvalidMainUtxo),
        }
    }

    /// Satoshi held by the wallet's main UTXO; zero if it holds none.
    pub fn btc_balance(&self, claimed: Option<&Utxo>) -> BridgeResult<u64> {
        Ok(self.resolve_main_utxo(claimed)?.map_or(0, |u| u.value))
    }
}

/// A pending or timed-out redemption request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    /// Account that requested and gets refunded on timeout.
    pub redeemer: Address,
    /// Amount taken from the redeemer.
    pub requested_amount: u64,
    /// Portion kept by the treasury.
    pub treasury_fee: u64,
    /// Maximum Bitcoin fee the output may bear, fixed at request time.
    pub tx_max_fee: u64,
    /// Request time.
    pub requested_at: u32,
}

impl RedemptionRequest {
    /// Amount the redeemer is owed on Bitcoin, before the transaction fee.
    pub fn redeemable(&self) -> u64 {
        self.requested_amount - self.treasury_fee
    }

    /// True if `value` is an acceptable payout for this request.
    pub fn accepts_output(&self, value: u64) -> bool {
        let redeemable = self.redeemable();
        value <= redeemable && value >= redeemable.saturating_sub(self.tx_max_fee)
    }
}

/// A revealed deposit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    /// Account credited when the deposit is swept.
    pub depositor: Address,
    /// Funding output value.
    pub amount: u64,
    /// Reveal time.
    pub revealed_at: u32,
    /// Vault credited instead of the depositor's plain balance.
    pub vault: Option<Address>,
    /// Portion kept by the treasury.
    pub treasury_fee: u64,
    /// Sweep time; zero while unswept.
    pub swept_at: u32,
    /// Wallet the deposit script locks to.
    pub wallet_pubkey_hash: WalletPubKeyHash,
    /// Refund locktime from the deposit script, seconds.
    pub refund_locktime: u32,
}

/// State of a moved funds sweep request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovedFundsSweepState {
    /// Never created.
    #[default]
    Unknown,
    /// Waiting for the target wallet to sweep it.
    Pending,
    /// Swept.
    Processed,
    /// Reported as not swept in time.
    TimedOut,
}

/// Obligation of a target wallet to sweep one moving funds output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedFundsSweepRequest {
    /// Target wallet that must sweep.
    pub wallet_pubkey_hash: WalletPubKeyHash,
    /// Output value.
    pub value: u64,
    /// Creation time.
    pub created_at: u32,
    /// Current state.
    pub state: MovedFundsSweepState,
}

/// The whole bridge state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    /// Registered wallets.
    pub wallets: BTreeMap<WalletPubKeyHash, Wallet>,
    /// Wallet receiving new deposits.
    pub active_wallet: Option<WalletPubKeyHash>,
    /// Number of wallets in Live state.
    pub live_wallets_count: u32,
    /// Revealed deposits.
    pub deposits: BTreeMap<DepositKey, DepositRequest>,
    /// Requests awaiting a redemption proof.
    pub pending_redemptions: BTreeMap<RedemptionKey, RedemptionRequest>,
    /// Requests reported as timed out.
    pub timed_out_redemptions: BTreeMap<RedemptionKey, RedemptionRequest>,
    /// Former main UTXOs.
    pub spent_main_utxos: BTreeSet<OutpointKey>,
    /// Moved funds sweep obligations.
    pub moved_funds_sweep_requests: BTreeMap<MovedFundsSweepKey, MovedFundsSweepRequest>,
}

impl Ledger {
    /// Wallet record, if registered.
    pub fn wallet(&self, pkh: &WalletPubKeyHash) -> Option<&Wallet> {
        self.wallets.get(pkh)
    }

    /// Registered wallet, or an `Unknown`-state error.
    pub fn registered_wallet(&self, pkh: &WalletPubKeyHash) -> BridgeResult<&Wallet> {
        self.wallets
            .get(pkh)
            .ok_or_else(|| BridgeError::wallet_state(*pkh, WalletState::Unknown, "a registered"))
    }

    /// Mutable registered wallet, or an `Unknown`-state error.
    pub fn registered_wallet_mut(&mut self, pkh: &WalletPubKeyHash) -> BridgeResult<&mut Wallet> {
        self.wallets
            .get_mut(pkh)
            .ok_or_else(|| BridgeError::wallet_state(*pkh, WalletState::Unknown, "a registered"))
    }

    /// Lifecycle state; `Unknown` for unregistered wallets.
    pub fn wallet_state(&self, pkh: &WalletPubKeyHash) -> WalletState {
        self.wallets.get(pkh).map_or(WalletState::Unknown, |w| w.state)
    }

    /// Marks a main UTXO as consumed.
    pub fn mark_main_utxo_spent(&mut self, utxo: &Utxo) {
        self.spent_main_utxos.insert(utxo.outpoint_key());
    }

    /// True if `utxo` used to be a main UTXO and was consumed.
    pub fn is_main_utxo_spent(&self, utxo: &Utxo) -> bool {
        self.spent_main_utxos.contains(&utxo.outpoint_key())
    }
}

/// A balance operation on the Bank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BankCall {
    /// Move `amount` from `from` into bridge custody.
    TransferFrom {
        /// Debited account.
        from: Address,
        /// Satoshi.
        amount: u64,
    },
    /// Pay `amount` out of bridge custody.
    Transfer {
        /// Credited account.
        to: Address,
        /// Satoshi.
        amount: u64,
    },
    /// Pay the treasury out of bridge custody.
    TransferToTreasury {
        /// Satoshi.
        amount: u64,
    },
    /// Burn `amount` held by the bridge.
    DecreaseBalance {
        /// Satoshi.
        amount: u64,
    },
    /// Mint to several depositors.
    IncreaseBalances {
        /// `(depositor, amount)` pairs.
        recipients: Vec<(Address, u64)>,
    },
    /// Mint to a vault on behalf of depositors and notify it.
    IncreaseBalanceAndCall {
        /// Vault receiving the total.
        vault: Address,
        /// `(depositor, amount)` pairs.
        recipients: Vec<(Address, u64)>,
    },
    /// Mint to the treasury.
    IncreaseTreasuryBalance {
        /// Satoshi.
        amount: u64,
    },
}

/// A call on the ECDSA wallet registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryCall {
    /// Start a new signing group.
    RequestNewWallet,
    /// Slash the members of a wallet.
    Seize {
        /// Stake amount seized from each member.
        amount: u128,
        /// Share paid to the notifier, percent.
        reward_multiplier: u32,
        /// Account that reported the misbehaviour.
        notifier: Address,
        /// Slashed signing group.
        wallet_id: EcdsaWalletId,
        /// Members of the signing group.
        members: Vec<u32>,
    },
    /// Retire a signing group.
    CloseWallet {
        /// Signing group.
        wallet_id: EcdsaWalletId,
    },
}

/// Ordered external calls produced by one operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Effects {
    /// Bank calls, in order.
    pub bank: Vec<BankCall>,
    /// Registry calls, in order.
    pub registry: Vec<RegistryCall>,
}

impl Effects {
    /// Empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bank(&mut self, call: BankCall) {
        self.bank.push(call);
    }

    pub(crate) fn registry(&mut self, call: RegistryCall) {
        self.registry.push(call);
    }
}
