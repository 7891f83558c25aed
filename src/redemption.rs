//! Redemption requests, their settlement by proof and their timeouts.
use crate::config::RedemptionParams;
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::{BankCall, Effects, Ledger, RedemptionRequest, RegistryCall, WalletState};
use crate::tx::OutputScript;
use crate::types::{Address, BitcoinTxInfo, RedemptionKey, Utxo, WalletPubKeyHash};
use crate::wallets;
use bitcoin::{Script, TxIn};
use log::{debug, info, warn};

/// Totals of a settled redemption transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RedemptionSettlement {
    /// Pending requests paid by the transaction.
    pub settled_requests: usize,
    /// Timed-out requests the transaction paid anyway.
    pub timed_out_outputs: usize,
    /// Burned from the bridge balance.
    pub burned: u64,
    /// Transferred to the treasury.
    pub treasury_fee: u64,
    /// Bitcoin transaction fee.
    pub tx_fee: u64,
    /// New main UTXO, if the transaction has a change output.
    pub change: Option<Utxo>,
}

fn treasury_fee(amount: u64, divisor: u64) -> u64 {
    if divisor > 0 {
        amount / divisor
    } else {
        0
    }
}

/// Checks that an outbound wallet transaction spends exactly its main UTXO.
pub fn check_outbound_input(inputs: &[TxIn], main_utxo: &Utxo) -> BridgeResult<()> {
    match inputs {
        [input] if main_utxo.is_spent_by(&input.previous_output) => Ok(()),
        [_] => Err(BridgeError::OutboundTxInputNotMainUtxo),
        _ => Err(BridgeError::OutboundTxMustHaveSingleInput),
    }
}

/// Takes `amount` from the redeemer and records a request paying `script`.
#[allow(clippy::too_many_arguments)]
pub fn request_redemption(
    ledger: &mut Ledger,
    params: &RedemptionParams,
    now: u32,
    redeemer: Address,
    pkh: &WalletPubKeyHash,
    main_utxo: &Utxo,
    redeemer_output_script: &Script,
    amount: u64,
    effects: &mut Effects,
) -> BridgeResult<RedemptionKey> {
    let wallet = ledger.registered_wallet(pkh)?;
    wallet.require_state(pkh, &[WalletState::Live], "Live")?;
    wallet.require_main_utxo(main_utxo)?;

    let script = OutputScript::classify(redeemer_output_script);
    if script.hash20() == Some(pkh.0) {
        return Err(BridgeError::RedeemerOutputScriptPointsToWallet);
    }
    if !script.is_standard_payment() {
        return Err(BridgeError::NonStandardRedeemerOutputScript);
    }

    let fee = treasury_fee(amount, params.treasury_fee_divisor);
    let redeemable = amount - fee;
    if redeemable < params.dust_threshold {
        return Err(BridgeError::RedemptionAmountTooSmall);
    }
    if wallet.pending_redemptions_value.saturating_add(redeemable) > main_utxo.value {
        return Err(BridgeError::InsufficientWalletFunds);
    }

    let key = RedemptionKey::new(pkh, redeemer_output_script.as_bytes());
    if ledger.pending_redemptions.contains_key(&key) {
        return Err(BridgeError::PendingRedemptionExists);
    }

    ledger.pending_redemptions.insert(
        key,
        RedemptionRequest {
            redeemer,
            requested_amount: amount,
            treasury_fee: fee,
            tx_max_fee: params.tx_max_fee,
            requested_at: now,
        },
    );
    ledger.registered_wallet_mut(pkh)?.pending_redemptions_value += redeemable;
    effects.bank(BankCall::TransferFrom {
        from: redeemer,
        amount,
    });

    info!(
        "redemption requested: wallet={pkh} redeemer={redeemer} amount={amount} treasury_fee={fee}"
    );
    Ok(key)
}

/// Settles a proven redemption transaction.
///
/// Outputs are walked in order: the first non-zero payment back to the
/// wallet is its change, every other output must pay a pending or timed-out
/// request within its value band.
pub fn submit_redemption_proof(
    ledger: &mut Ledger,
    params: &RedemptionParams,
    redemption_tx: &BitcoinTxInfo,
    main_utxo: &Utxo,
    pkh: &WalletPubKeyHash,
    effects: &mut Effects,
) -> BridgeResult<RedemptionSettlement> {
    let wallet = ledger.registered_wallet(pkh)?;
    wallet.require_main_utxo(main_utxo)?;
    wallet.require_state(
        pkh,
        &[WalletState::Live, WalletState::MovingFunds],
        "Live or MovingFunds",
    )?;

    let tx = redemption_tx.parse()?;
    check_outbound_input(&tx.inputs, main_utxo)?;

    let mut settlement = RedemptionSettlement::default();
    let mut outputs_total = 0u64;
    for (output_index, output) in tx.outputs.iter().enumerate() {
        let value = output.value.to_sat();
        outputs_total += value;

        let script = OutputScript::classify(&output.script_pubkey);
        if settlement.change.is_none() && value > 0 && script.key_hash() == Some(*pkh) {
            debug!("redemption output {output_index}: change of {value} sat");
            settlement.change = Some(Utxo::new(tx.hash, output_index as u32, value));
            continue;
        }

        let key = RedemptionKey::new(pkh, output.script_pubkey.as_bytes());
        if let Some(request) = ledger.pending_redemptions.remove(&key) {
            if !request.accepts_output(value) {
                return Err(BridgeError::RedemptionOutputOutOfRange { output_index });
            }
            debug!("redemption output {output_index}: pays {value} sat to pending request");
            settlement.burned += request.redeemable();
            settlement.treasury_fee += request.treasury_fee;
            settlement.settled_requests += 1;
        } else if let Some(request) = ledger.timed_out_redemptions.get(&key) {
            if !request.accepts_output(value) {
                return Err(BridgeError::TimedOutRedemptionOutputOutOfRange { output_index });
            }
            debug!("redemption output {output_index}: pays {value} sat to timed out request");
            settlement.timed_out_outputs += 1;
        } else {
            return Err(BridgeError::NonRequestedRedemption { output_index });
        }
    }

    if settlement.settled_requests + settlement.timed_out_outputs == 0 {
        return Err(BridgeError::NoRedemptionProcessed);
    }
    settlement.tx_fee = main_utxo.value.checked_sub(outputs_total).ok_or(
        BridgeError::OutputValueExceedsInputs {
            inputs: main_utxo.value,
            outputs: outputs_total,
        },
    )?;
    if settlement.tx_fee > params.tx_max_total_fee {
        return Err(BridgeError::TransactionFeeTooHigh);
    }

    ledger.mark_main_utxo_spent(main_utxo);
    let wallet = ledger.registered_wallet_mut(pkh)?;
    wallet.pending_redemptions_value = wallet
        .pending_redemptions_value
        .saturating_sub(settlement.burned);
    wallet.main_utxo_hash = settlement.change.map(|c| c.commitment());

    effects.bank(BankCall::DecreaseBalance {
        amount: settlement.burned,
    });
    if settlement.treasury_fee > 0 {
        effects.bank(BankCall::TransferToTreasury {
            amount: settlement.treasury_fee,
        });
    }

    info!(
        "redemptions completed: wallet={pkh} tx={} settled={} burned={} fee={}",
        tx.hash, settlement.settled_requests, settlement.burned, settlement.tx_fee
    );
    Ok(settlement)
}

/// Refunds a request the wallet failed to pay in time and punishes the wallet.
#[allow(clippy::too_many_arguments)]
pub fn notify_redemption_timeout(
    ledger: &mut Ledger,
    params: &RedemptionParams,
    now: u32,
    notifier: Address,
    pkh: &WalletPubKeyHash,
    members: &[u32],
    redeemer_output_script: &Script,
    effects: &mut Effects,
) -> BridgeResult<()> {
    let key = RedemptionKey::new(pkh, redeemer_output_script.as_bytes());
    let request = ledger
        .pending_redemptions
        .get(&key)
        .cloned()
        .ok_or(BridgeError::RedemptionRequestNotFound)?;
    if u64::from(now) <= u64::from(request.requested_at) + u64::from(params.timeout) {
        return Err(BridgeError::RedemptionNotTimedOut);
    }

    let wallet = ledger.registered_wallet_mut(pkh)?;
    wallet.require_state(
        pkh,
        &[
            WalletState::Live,
            WalletState::MovingFunds,
            WalletState::Terminated,
        ],
        "Live, MovingFunds or Terminated",
    )?;
    let state = wallet.state;
    let wallet_id = wallet.ecdsa_wallet_id;
    wallet.pending_redemptions_value = wallet
        .pending_redemptions_value
        .saturating_sub(request.redeemable());

    ledger.pending_redemptions.remove(&key);
    ledger.timed_out_redemptions.insert(key, request.clone());

    if state == WalletState::Live {
        wallets::move_to_moving_funds(ledger, now, pkh, effects)?;
    }
    if matches!(state, WalletState::Live | WalletState::MovingFunds) {
        warn!("wallet {pkh} slashed for redemption timeout, notifier={notifier}");
        effects.registry(RegistryCall::Seize {
            amount: params.timeout_slashing_amount,
            reward_multiplier: params.timeout_notifier_reward_multiplier,
            notifier,
            wallet_id,
            members: members.to_vec(),
        });
    }
    effects.bank(BankCall::Transfer {
        to: request.redeemer,
        amount: request.requested_amount,
    });

    info!(
        "redemption timed out: wallet={pkh} redeemer={} refunded={}",
        request.redeemer, request.requested_amount
    );
    Ok(())
}
