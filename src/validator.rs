//! # Proposal validator
//!
//! Proof-free checks a coordinator runs before asking a wallet to sign a
//! transaction. Each check mirrors a rule the matching settlement enforces
//! when the proof is submitted, so a proposal accepted here can only fail
//! later if the ledger changed in between.
//!
//! Every function returns `Ok(())` for a valid proposal and the first reason
//! for rejection otherwise.
use crate::config::BridgeParams;
use crate::deposit::{check_script_hash, deposit_script};
use crate::error::ProposalError;
use crate::ledger::{Ledger, WalletState};
use crate::sweep::fee_shares;
use crate::tx::OutputScript;
use crate::types::{
    Address, BitcoinTxInfo, OutpointKey, RedemptionKey, TargetWalletsCommitment, Utxo,
    WalletPubKeyHash,
};
use bitcoin::{OutPoint, ScriptBuf};
use std::collections::BTreeSet;

/// Length of a heartbeat message.
pub const HEARTBEAT_MESSAGE_LEN: usize = 16;

/// A proposed deposit sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepositSweepProposal {
    /// Sweeping wallet.
    pub wallet_pubkey_hash: WalletPubKeyHash,
    /// Funding outpoints of the deposits to sweep.
    pub deposits: Vec<OutPoint>,
    /// Proposed Bitcoin fee of the whole sweep.
    pub sweep_tx_fee: u64,
}

/// Reveal data of one proposed deposit, needed to rebuild its script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepositExtraInfo {
    /// Funding transaction.
    pub funding_tx: BitcoinTxInfo,
    /// Depositor-chosen salt.
    pub blinding_factor: [u8; 8],
    /// Wallet the deposit locks to.
    pub wallet_pubkey_hash: WalletPubKeyHash,
    /// Refund key hash.
    pub refund_pubkey_hash: [u8; 20],
    /// Refund locktime, 4 bytes little-endian.
    pub refund_locktime: [u8; 4],
}

/// A proposed redemption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedemptionProposal {
    /// Redeeming wallet.
    pub wallet_pubkey_hash: WalletPubKeyHash,
    /// Output scripts identifying the requests to pay.
    pub redeemers_output_scripts: Vec<ScriptBuf>,
    /// Proposed Bitcoin fee of the whole transaction.
    pub redemption_tx_fee: u64,
}

/// A proposed moving funds transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MovingFundsProposal {
    /// Source wallet.
    pub wallet_pubkey_hash: WalletPubKeyHash,
    /// Ordered target wallets.
    pub target_wallets: Vec<WalletPubKeyHash>,
    /// Proposed Bitcoin fee.
    pub moving_funds_tx_fee: u64,
}

/// A proposed heartbeat signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatProposal {
    /// Signing wallet.
    pub wallet_pubkey_hash: WalletPubKeyHash,
    /// Message to sign.
    pub message: Vec<u8>,
}

fn require(condition: bool, reason: ProposalError) -> Result<(), ProposalError> {
    if condition {
        Ok(())
    } else {
        Err(reason)
    }
}

fn require_live(ledger: &Ledger, pkh: &WalletPubKeyHash) -> Result<(), ProposalError> {
    require(
        ledger.wallet_state(pkh) == WalletState::Live,
        ProposalError::WalletNotLive,
    )
}

/// Validates a deposit sweep proposal against the revealed deposits.
pub fn validate_deposit_sweep_proposal(
    ledger: &Ledger,
    params: &BridgeParams,
    now: u32,
    proposal: &DepositSweepProposal,
    extra_info: &[DepositExtraInfo],
) -> Result<(), ProposalError> {
    let pkh = &proposal.wallet_pubkey_hash;
    require_live(ledger, pkh)?;

    let n = proposal.deposits.len();
    require(n > 0, ProposalError::SweepBelowMinSize)?;
    require(
        n <= params.proposal.deposit_sweep_max_size,
        ProposalError::SweepExceedsMaxSize,
    )?;
    require(extra_info.len() == n, ProposalError::DepositExtraDataMismatch)?;

    require(proposal.sweep_tx_fee > 0, ProposalError::ZeroFee)?;
    require(
        proposal.sweep_tx_fee <= params.deposit.tx_max_fee.saturating_mul(n as u64),
        ProposalError::FeeTooHigh,
    )?;

    let mut seen = BTreeSet::new();
    let mut proposal_vault: Option<Option<Address>> = None;
    for (outpoint, extra) in proposal.deposits.iter().zip(extra_info) {
        let key = OutpointKey::from_outpoint(outpoint);
        let deposit = ledger
            .deposits
            .get(&key)
            .ok_or(ProposalError::DepositNotRevealed)?;

        require(
            u64::from(now)
                > u64::from(deposit.revealed_at) + u64::from(params.deposit.min_age),
            ProposalError::DepositMinAgeNotAchieved,
        )?;
        require(deposit.swept_at == 0, ProposalError::DepositAlreadySwept)?;
        require(
            extra.funding_tx.hash() == outpoint.txid,
            ProposalError::FundingTxHashMismatch,
        )?;

        let output = extra.funding_tx.output_at(outpoint.vout)?;
        let script = deposit_script(
            &deposit.depositor,
            &extra.blinding_factor,
            &extra.wallet_pubkey_hash,
            &extra.refund_pubkey_hash,
            &extra.refund_locktime,
        );
        check_script_hash(&OutputScript::classify(&output.script_pubkey), script.as_bytes())
            .map_err(|_| ProposalError::FundingOutputScriptMismatch)?;

        let refundable_at = u32::from_le_bytes(extra.refund_locktime);
        require(
            u64::from(now) + u64::from(params.proposal.deposit_refund_safety_margin)
                < u64::from(refundable_at),
            ProposalError::RefundSafetyMarginNotPreserved,
        )?;
        require(
            extra.wallet_pubkey_hash == *pkh,
            ProposalError::DepositControlledByDifferentWallet,
        )?;
        match proposal_vault {
            None => proposal_vault = Some(deposit.vault),
            Some(vault) => require(
                vault == deposit.vault,
                ProposalError::DepositTargetsDifferentVault,
            )?,
        }
        require(seen.insert(key), ProposalError::DuplicatedDeposit)?;
    }
    Ok(())
}

/// Validates a redemption proposal against the pending requests.
pub fn validate_redemption_proposal(
    ledger: &Ledger,
    params: &BridgeParams,
    now: u32,
    proposal: &RedemptionProposal,
) -> Result<(), ProposalError> {
    let pkh = &proposal.wallet_pubkey_hash;
    require_live(ledger, pkh)?;

    let n = proposal.redeemers_output_scripts.len();
    require(n > 0, ProposalError::RedemptionBelowMinSize)?;
    require(
        n <= params.proposal.redemption_max_size,
        ProposalError::RedemptionExceedsMaxSize,
    )?;

    let fee = proposal.redemption_tx_fee;
    require(fee > 0, ProposalError::ZeroFee)?;
    require(
        fee <= params.redemption.tx_max_total_fee,
        ProposalError::FeeTooHigh,
    )?;

    let shares = fee_shares(fee, n);
    let mut seen = BTreeSet::new();
    for (script, share) in proposal.redeemers_output_scripts.iter().zip(shares) {
        let key = RedemptionKey::new(pkh, script.as_bytes());
        let request = ledger
            .pending_redemptions
            .get(&key)
            .ok_or(ProposalError::NotPendingRedemption)?;

        let requested_at = u64::from(request.requested_at);
        require(
            u64::from(now) > requested_at + u64::from(params.proposal.redemption_request_min_age),
            ProposalError::RedemptionMinAgeNotAchieved,
        )?;
        require(
            u64::from(now) + u64::from(params.proposal.redemption_request_timeout_safety_margin)
                < requested_at + u64::from(params.redemption.timeout),
            ProposalError::RedemptionTimeoutSafetyMarginNotPreserved,
        )?;
        require(
            share <= request.tx_max_fee,
            ProposalError::PerRequestFeeShareTooHigh,
        )?;
        require(seen.insert(key), ProposalError::DuplicatedRequest)?;
    }
    Ok(())
}

/// Validates a moving funds proposal against the submitted commitment.
pub fn validate_moving_funds_proposal(
    ledger: &Ledger,
    params: &BridgeParams,
    proposal: &MovingFundsProposal,
    main_utxo: &Utxo,
) -> Result<(), ProposalError> {
    let pkh = &proposal.wallet_pubkey_hash;
    let wallet = ledger
        .wallet(pkh)
        .filter(|w| w.state == WalletState::MovingFunds)
        .ok_or(ProposalError::SourceWalletNotMovingFunds)?;

    let commitment = wallet
        .moving_funds_target_wallets_commitment_hash
        .ok_or(ProposalError::TargetWalletsCommitmentNotSubmitted)?;
    require(
        commitment == TargetWalletsCommitment::new(&proposal.target_wallets),
        ProposalError::TargetWalletsMismatch,
    )?;

    let balance = wallet
        .btc_balance(Some(main_utxo))
        .map_err(|_| ProposalError::InvalidMainUtxo)?;
    require(
        balance >= params.moving_funds.dust_threshold,
        ProposalError::BalanceBelowMovingFundsDust,
    )?;

    let fee = proposal.moving_funds_tx_fee;
    require(fee > 0, ProposalError::ZeroFee)?;
    require(
        fee <= params.moving_funds.tx_max_total_fee,
        ProposalError::FeeTooHigh,
    )
}

/// A heartbeat message is 16 bytes starting with eight `0xff`.
pub fn validate_heartbeat_proposal(proposal: &HeartbeatProposal) -> Result<(), ProposalError> {
    let message = &proposal.message;
    require(
        message.len() == HEARTBEAT_MESSAGE_LEN && message[..8].iter().all(|b| *b == 0xff),
        ProposalError::InvalidHeartbeatMessage,
    )
}
