//! # Bridge parameters
//!
//! Economic and timing parameters of the bridge. Defaults are the values the
//! bridge is deployed with; [`BridgeParams::from_json_file`] loads overrides and
//! [`BridgeParams::validate`] enforces the same consistency rules a parameter
//! update has to satisfy.

use crate::error::{BridgeError, BridgeResult};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default values for every parameter.
pub mod defaults {
    /// One day in seconds.
    pub const DAY: u32 = 86_400;

    /// Minimum deposit amount, satoshi.
    pub const DEPOSIT_DUST_THRESHOLD: u64 = 1_000_000;
    /// `amount / divisor` goes to the treasury. Zero disables the fee.
    pub const DEPOSIT_TREASURY_FEE_DIVISOR: u64 = 2_000;
    /// Maximum sweep fee share of a single deposit, satoshi.
    pub const DEPOSIT_TX_MAX_FEE: u64 = 100_000;
    /// Refund locktime must be at least this far ahead at reveal time.
    pub const DEPOSIT_REVEAL_AHEAD_PERIOD: u32 = 15 * DAY;
    /// Deposits younger than this cannot be swept.
    pub const DEPOSIT_MIN_AGE: u32 = 2 * 60 * 60;

    /// Minimum redeemable amount, satoshi.
    pub const REDEMPTION_DUST_THRESHOLD: u64 = 1_000_000;
    /// `amount / divisor` goes to the treasury. Zero disables the fee.
    pub const REDEMPTION_TREASURY_FEE_DIVISOR: u64 = 2_000;
    /// Maximum fee a single redemption output may bear, satoshi.
    pub const REDEMPTION_TX_MAX_FEE: u64 = 100_000;
    /// Maximum fee of a whole redemption transaction, satoshi.
    pub const REDEMPTION_TX_MAX_TOTAL_FEE: u64 = 1_000_000;
    /// Time a wallet has to fulfil a redemption request.
    pub const REDEMPTION_TIMEOUT: u32 = 5 * DAY;
    /// Stake seized from each operator on redemption timeout.
    pub const REDEMPTION_TIMEOUT_SLASHING_AMOUNT: u128 = 100 * 10u128.pow(18);
    /// Share of the seized stake paid to the notifier, percent.
    pub const REDEMPTION_TIMEOUT_NOTIFIER_REWARD_MULTIPLIER: u32 = 100;

    /// Maximum fee of a whole moving funds transaction, satoshi.
    pub const MOVING_FUNDS_TX_MAX_TOTAL_FEE: u64 = 100_000;
    /// Below this balance a moving funds wallet may close without moving.
    pub const MOVING_FUNDS_DUST_THRESHOLD: u64 = 200_000;
    /// Delay before a stuck moving funds timeout can be reset.
    pub const MOVING_FUNDS_TIMEOUT_RESET_DELAY: u32 = 6 * DAY;
    /// Time a wallet has to move its funds.
    pub const MOVING_FUNDS_TIMEOUT: u32 = 7 * DAY;
    /// Stake seized from each operator on moving funds timeout.
    pub const MOVING_FUNDS_TIMEOUT_SLASHING_AMOUNT: u128 = 100 * 10u128.pow(18);
    /// Share of the seized stake paid to the notifier, percent.
    pub const MOVING_FUNDS_TIMEOUT_NOTIFIER_REWARD_MULTIPLIER: u32 = 100;
    /// Time a target wallet has to sweep moved funds.
    pub const MOVED_FUNDS_SWEEP_TIMEOUT: u32 = 7 * DAY;
    /// Stake seized from each operator on moved funds sweep timeout.
    pub const MOVED_FUNDS_SWEEP_TIMEOUT_SLASHING_AMOUNT: u128 = 100 * 10u128.pow(18);
    /// Share of the seized stake paid to the notifier, percent.
    pub const MOVED_FUNDS_SWEEP_TIMEOUT_NOTIFIER_REWARD_MULTIPLIER: u32 = 100;

    /// Minimum time between new wallet requests.
    pub const WALLET_CREATION_PERIOD: u32 = 7 * DAY;
    /// Active wallet balance that allows a new wallet once the period passed.
    pub const WALLET_CREATION_MIN_BTC_BALANCE: u64 = 100_000_000;
    /// Active wallet balance that allows a new wallet at any time.
    pub const WALLET_CREATION_MAX_BTC_BALANCE: u64 = 10_000_000_000;
    /// Wallets below this balance may be closed.
    pub const WALLET_CLOSURE_MIN_BTC_BALANCE: u64 = 50_000_000;
    /// Wallets older than this may be closed.
    pub const WALLET_MAX_AGE: u32 = 26 * 7 * DAY;
    /// Maximum amount moved to one target wallet.
    pub const WALLET_MAX_BTC_TRANSFER: u64 = 1_000_000_000;
    /// Time between closing start and closed.
    pub const WALLET_CLOSING_PERIOD: u32 = 40 * DAY;

    /// Required accumulated difficulty, in blocks at the relay difficulty.
    pub const TX_PROOF_DIFFICULTY_FACTOR: u64 = 6;

    /// Maximum number of deposits in one sweep proposal.
    pub const DEPOSIT_SWEEP_MAX_SIZE: usize = 20;
    /// Refund locktime must be at least this far away when a sweep is proposed.
    pub const DEPOSIT_REFUND_SAFETY_MARGIN: u32 = DAY;
    /// Maximum number of requests in one redemption proposal.
    pub const REDEMPTION_MAX_SIZE: usize = 20;
    /// Requests younger than this are not proposed.
    pub const REDEMPTION_REQUEST_MIN_AGE: u32 = 600;
    /// Requests this close to their timeout are not proposed.
    pub const REDEMPTION_REQUEST_TIMEOUT_SAFETY_MARGIN: u32 = 2 * 60 * 60;
}

/// Deposit parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct DepositParams {
    pub dust_threshold: u64,
    pub treasury_fee_divisor: u64,
    pub tx_max_fee: u64,
    pub reveal_ahead_period: u32,
    pub min_age: u32,
}

impl Default for DepositParams {
    fn default() -> Self {
        Self {
            dust_threshold: defaults::DEPOSIT_DUST_THRESHOLD,
            treasury_fee_divisor: defaults::DEPOSIT_TREASURY_FEE_DIVISOR,
            tx_max_fee: defaults::DEPOSIT_TX_MAX_FEE,
            reveal_ahead_period: defaults::DEPOSIT_REVEAL_AHEAD_PERIOD,
            min_age: defaults::DEPOSIT_MIN_AGE,
        }
    }
}

/// Redemption parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct RedemptionParams {
    pub dust_threshold: u64,
    pub treasury_fee_divisor: u64,
    pub tx_max_fee: u64,
    pub tx_max_total_fee: u64,
    pub timeout: u32,
    pub timeout_slashing_amount: u128,
    pub timeout_notifier_reward_multiplier: u32,
}

impl Default for RedemptionParams {
    fn default() -> Self {
        Self {
            dust_threshold: defaults::REDEMPTION_DUST_THRESHOLD,
            treasury_fee_divisor: defaults::REDEMPTION_TREASURY_FEE_DIVISOR,
            tx_max_fee: defaults::REDEMPTION_TX_MAX_FEE,
            tx_max_total_fee: defaults::REDEMPTION_TX_MAX_TOTAL_FEE,
            timeout: defaults::REDEMPTION_TIMEOUT,
            timeout_slashing_amount: defaults::REDEMPTION_TIMEOUT_SLASHING_AMOUNT,
            timeout_notifier_reward_multiplier:
                defaults::REDEMPTION_TIMEOUT_NOTIFIER_REWARD_MULTIPLIER,
        }
    }
}

/// Moving funds and moved funds sweep parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct MovingFundsParams {
    pub tx_max_total_fee: u64,
    pub dust_threshold: u64,
    pub timeout_reset_delay: u32,
    pub timeout: u32,
    pub timeout_slashing_amount: u128,
    pub timeout_notifier_reward_multiplier: u32,
    pub sweep_timeout: u32,
    pub sweep_timeout_slashing_amount: u128,
    pub sweep_timeout_notifier_reward_multiplier: u32,
}

impl Default for MovingFundsParams {
    fn default() -> Self {
        Self {
            tx_max_total_fee: defaults::MOVING_FUNDS_TX_MAX_TOTAL_FEE,
            dust_threshold: defaults::MOVING_FUNDS_DUST_THRESHOLD,
            timeout_reset_delay: defaults::MOVING_FUNDS_TIMEOUT_RESET_DELAY,
            timeout: defaults::MOVING_FUNDS_TIMEOUT,
            timeout_slashing_amount: defaults::MOVING_FUNDS_TIMEOUT_SLASHING_AMOUNT,
            timeout_notifier_reward_multiplier:
                defaults::MOVING_FUNDS_TIMEOUT_NOTIFIER_REWARD_MULTIPLIER,
            sweep_timeout: defaults::MOVED_FUNDS_SWEEP_TIMEOUT,
            sweep_timeout_slashing_amount: defaults::MOVED_FUNDS_SWEEP_TIMEOUT_SLASHING_AMOUNT,
            sweep_timeout_notifier_reward_multiplier:
                defaults::MOVED_FUNDS_SWEEP_TIMEOUT_NOTIFIER_REWARD_MULTIPLIER,
        }
    }
}

/// Wallet lifecycle parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct WalletParams {
    pub creation_period: u32,
    pub creation_min_btc_balance: u64,
    pub creation_max_btc_balance: u64,
    pub closure_min_btc_balance: u64,
    pub max_age: u32,
    pub max_btc_transfer: u64,
    pub closing_period: u32,
}

impl Default for WalletParams {
    fn default() -> Self {
        Self {
            creation_period: defaults::WALLET_CREATION_PERIOD,
            creation_min_btc_balance: defaults::WALLET_CREATION_MIN_BTC_BALANCE,
            creation_max_btc_balance: defaults::WALLET_CREATION_MAX_BTC_BALANCE,
            closure_min_btc_balance: defaults::WALLET_CLOSURE_MIN_BTC_BALANCE,
            max_age: defaults::WALLET_MAX_AGE,
            max_btc_transfer: defaults::WALLET_MAX_BTC_TRANSFER,
            closing_period: defaults::WALLET_CLOSING_PERIOD,
        }
    }
}

/// Limits used only by the proposal validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct ProposalParams {
    pub deposit_sweep_max_size: usize,
    pub deposit_refund_safety_margin: u32,
    pub redemption_max_size: usize,
    pub redemption_request_min_age: u32,
    pub redemption_request_timeout_safety_margin: u32,
}

impl Default for ProposalParams {
    fn default() -> Self {
        Self {
            deposit_sweep_max_size: defaults::DEPOSIT_SWEEP_MAX_SIZE,
            deposit_refund_safety_margin: defaults::DEPOSIT_REFUND_SAFETY_MARGIN,
            redemption_max_size: defaults::REDEMPTION_MAX_SIZE,
            redemption_request_min_age: defaults::REDEMPTION_REQUEST_MIN_AGE,
            redemption_request_timeout_safety_margin:
                defaults::REDEMPTION_REQUEST_TIMEOUT_SAFETY_MARGIN,
        }
    }
}

/// All bridge parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeParams {
    /// Deposit reveal and sweep.
    pub deposit: DepositParams,
    /// Redemption requests and proofs.
    pub redemption: RedemptionParams,
    /// Moving funds and moved funds sweeps.
    pub moving_funds: MovingFundsParams,
    /// Wallet lifecycle.
    pub wallet: WalletParams,
    /// Off-chain proposal limits.
    pub proposal: ProposalParams,
    /// Accumulated difficulty an SPV proof needs, in units of the relay difficulty.
    pub tx_proof_difficulty_factor: u64,
}

impl Default for BridgeParams {
    fn default() -> Self {
        Self {
            deposit: DepositParams::default(),
            redemption: RedemptionParams::default(),
            moving_funds: MovingFundsParams::default(),
            wallet: WalletParams::default(),
            proposal: ProposalParams::default(),
            tx_proof_difficulty_factor: defaults::TX_PROOF_DIFFICULTY_FACTOR,
        }
    }
}

fn ensure(cond: bool, reason: &'static str) -> BridgeResult<()> {
    if cond {
        Ok(())
    } else {
        Err(BridgeError::InvalidParams(reason))
    }
}

impl BridgeParams {
    /// Reads parameters from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read bridge params at {}", path.display()))?;
        let params: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse bridge params at {}", path.display()))?;
        params.validate()?;
        Ok(params)
    }

    /// Checks the cross-parameter constraints.
    pub fn validate(&self) -> BridgeResult<()> {
        let d = &self.deposit;
        ensure(d.dust_threshold > 0, "Deposit dust threshold must be greater than zero")?;
        ensure(d.tx_max_fee > 0, "Deposit transaction max fee must be greater than zero")?;
        ensure(
            d.dust_threshold > d.tx_max_fee,
            "Deposit dust threshold must be greater than deposit TX max fee",
        )?;

        let r = &self.redemption;
        let m = &self.moving_funds;
        ensure(
            r.dust_threshold > m.dust_threshold,
            "Redemption dust threshold must be greater than moving funds dust threshold",
        )?;
        ensure(
            r.dust_threshold > r.tx_max_fee,
            "Redemption dust threshold must be greater than redemption TX max fee",
        )?;
        ensure(r.tx_max_fee > 0, "Redemption transaction max fee must be greater than zero")?;
        ensure(
            r.tx_max_total_fee >= r.tx_max_fee,
            "Redemption transaction max total fee must be greater than or equal to the redemption transaction per-request max fee",
        )?;
        ensure(r.timeout > 0, "Redemption timeout must be greater than zero")?;
        ensure(
            r.timeout_notifier_reward_multiplier <= 100,
            "Redemption timeout notifier reward multiplier must be in the range [0, 100]",
        )?;

        ensure(m.tx_max_total_fee > 0, "Moving funds transaction max total fee must be greater than zero")?;
        ensure(m.dust_threshold > 0, "Moving funds dust threshold must be greater than zero")?;
        ensure(m.timeout_reset_delay > 0, "Moving funds timeout reset delay must be greater than zero")?;
        ensure(
            m.timeout > m.timeout_reset_delay,
            "Moving funds timeout must be greater than its reset delay",
        )?;
        ensure(
            m.timeout_notifier_reward_multiplier <= 100,
            "Moving funds timeout notifier reward multiplier must be in the range [0, 100]",
        )?;
        ensure(m.sweep_timeout > 0, "Moved funds sweep timeout must be greater than zero")?;
        ensure(
            m.sweep_timeout_notifier_reward_multiplier <= 100,
            "Moved funds sweep timeout notifier reward multiplier must be in the range [0, 100]",
        )?;

        let w = &self.wallet;
        ensure(
            w.creation_max_btc_balance > w.creation_min_btc_balance,
            "Wallet creation maximum BTC balance must be greater than the creation minimum BTC balance",
        )?;
        ensure(w.max_btc_transfer > 0, "Wallet maximum BTC transfer must be greater than zero")?;
        ensure(w.closing_period > 0, "Wallet closing period must be greater than zero")?;

        let p = &self.proposal;
        ensure(p.deposit_sweep_max_size > 0, "Deposit sweep max size must be greater than zero")?;
        ensure(p.redemption_max_size > 0, "Redemption max size must be greater than zero")?;

        ensure(
            self.tx_proof_difficulty_factor > 0,
            "Transaction proof difficulty factor must be greater than zero",
        )
    }
}
