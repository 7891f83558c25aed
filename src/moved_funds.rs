//! Moved funds sweeps: a target wallet merges funds it received through
//! moving funds into its own main UTXO.
use crate::config::MovingFundsParams;
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::{Effects, Ledger, MovedFundsSweepState, RegistryCall, WalletState};
use crate::sweep::wallet_output_pkh;
use crate::types::{Address, BitcoinTxInfo, OutpointKey, Utxo};
use crate::wallets;
use bitcoin::Txid;
use log::{info, warn};

/// Settles a proven moved funds sweep and returns the wallet's new main UTXO.
pub fn submit_moved_funds_sweep_proof(
    ledger: &mut Ledger,
    sweep_tx: &BitcoinTxInfo,
    main_utxo: Option<&Utxo>,
) -> BridgeResult<Utxo> {
    let tx = sweep_tx.parse()?;
    if tx.outputs.len() != 1 {
        return Err(BridgeError::MovedFundsSweepTxMustHaveSingleOutput);
    }
    let output_value = tx.outputs[0].value.to_sat();
    let pkh = wallet_output_pkh(&tx.outputs[0])?;

    let wallet = ledger.registered_wallet(&pkh)?;
    wallet.require_state(
        &pkh,
        &[WalletState::Live, WalletState::MovingFunds],
        "Live or MovingFunds",
    )?;
    let main_utxo = wallet.resolve_main_utxo(main_utxo)?;

    let expected = if main_utxo.is_some() { 2 } else { 1 };
    if tx.inputs.len() != expected {
        return Err(BridgeError::MovedFundsSweepInputsCount {
            expected,
            actual: tx.inputs.len(),
        });
    }

    let key = OutpointKey::from_outpoint(&tx.inputs[0].previous_output);
    let request = ledger
        .moved_funds_sweep_requests
        .get(&key)
        .filter(|r| r.state == MovedFundsSweepState::Pending)
        .ok_or(BridgeError::SweepRequestNotPending)?;
    if request.wallet_pubkey_hash != pkh {
        return Err(BridgeError::SweepRequestBelongsToAnotherWallet);
    }

    let mut inputs_value = request.value;
    if let Some(main) = main_utxo {
        if !main.is_spent_by(&tx.inputs[1].previous_output) {
            return Err(BridgeError::SecondInputNotMainUtxo);
        }
        inputs_value += main.value;
    }
    if output_value != inputs_value {
        return Err(BridgeError::MovedFundsSweepValueMismatch {
            inputs: inputs_value,
            output: output_value,
        });
    }

    if let Some(request) = ledger.moved_funds_sweep_requests.get_mut(&key) {
        request.state = MovedFundsSweepState::Processed;
    }
    if let Some(old) = main_utxo {
        ledger.mark_main_utxo_spent(&old);
    }
    let new_main = Utxo::new(tx.hash, 0, output_value);
    let wallet = ledger.registered_wallet_mut(&pkh)?;
    wallet.pending_moved_funds_sweep_requests_count = wallet
        .pending_moved_funds_sweep_requests_count
        .saturating_sub(1);
    wallet.main_utxo_hash = Some(new_main.commitment());

    info!(
        "moved funds swept: wallet={pkh} tx={} value={output_value}",
        tx.hash
    );
    Ok(new_main)
}

/// Reports a moved funds sweep request its wallet did not sweep in time.
#[allow(clippy::too_many_arguments)]
pub fn notify_moved_funds_sweep_timeout(
    ledger: &mut Ledger,
    params: &MovingFundsParams,
    now: u32,
    notifier: Address,
    moving_funds_tx_hash: &Txid,
    moving_funds_tx_output_index: u32,
    members: &[u32],
    effects: &mut Effects,
) -> BridgeResult<()> {
    let key = OutpointKey::new(moving_funds_tx_hash, moving_funds_tx_output_index);
    let request = ledger
        .moved_funds_sweep_requests
        .get(&key)
        .filter(|r| r.state == MovedFundsSweepState::Pending)
        .ok_or(BridgeError::SweepRequestNotPending)?;
    if u64::from(now) <= u64::from(request.created_at) + u64::from(params.sweep_timeout) {
        return Err(BridgeError::SweepRequestNotTimedOut);
    }
    let pkh = request.wallet_pubkey_hash;

    let wallet = ledger.registered_wallet(&pkh)?;
    wallet.require_state(
        &pkh,
        &[
            WalletState::Live,
            WalletState::MovingFunds,
            WalletState::Terminated,
        ],
        "Live, MovingFunds or Terminated",
    )?;
    let state = wallet.state;
    let wallet_id = wallet.ecdsa_wallet_id;

    if let Some(request) = ledger.moved_funds_sweep_requests.get_mut(&key) {
        request.state = MovedFundsSweepState::TimedOut;
    }
    let wallet = ledger.registered_wallet_mut(&pkh)?;
    wallet.pending_moved_funds_sweep_requests_count = wallet
        .pending_moved_funds_sweep_requests_count
        .saturating_sub(1);

    if state == WalletState::Live {
        wallets::move_to_moving_funds(ledger, now, &pkh, effects)?;
    }
    if matches!(state, WalletState::Live | WalletState::MovingFunds) {
        warn!("wallet {pkh} slashed for moved funds sweep timeout, notifier={notifier}");
        effects.registry(RegistryCall::Seize {
            amount: params.sweep_timeout_slashing_amount,
            reward_multiplier: params.sweep_timeout_notifier_reward_multiplier,
            notifier,
            wallet_id,
            members: members.to_vec(),
        });
    }

    info!(
        "moved funds sweep timed out: wallet={pkh} outpoint={moving_funds_tx_hash}:{moving_funds_tx_output_index}"
    );
    Ok(())
}
