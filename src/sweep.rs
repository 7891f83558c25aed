//! Deposit sweep settlement.
//!
//! A sweep consolidates revealed deposits, and the wallet's main UTXO if it
//! holds one, into a single output that becomes the new main UTXO. Each
//! depositor is credited with the deposit amount less the treasury fee and its
//! share of the Bitcoin transaction fee.
use crate::config::DepositParams;
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::{BankCall, Effects, Ledger, WalletState};
use crate::tx::OutputScript;
use crate::types::{Address, BitcoinTxInfo, OutpointKey, Utxo, WalletPubKeyHash};
use bitcoin::TxOut;
use log::{debug, info};

/// Key hash of an output paying back to a wallet.
///
/// Wallets only ever lock their funds to P2PKH or P2WPKH.
pub fn wallet_output_pkh(output: &TxOut) -> BridgeResult<WalletPubKeyHash> {
    match OutputScript::classify(&output.script_pubkey) {
        OutputScript::P2pkh(h) | OutputScript::P2wpkh(h) => Ok(WalletPubKeyHash(h)),
        OutputScript::P2sh(_) => Err(BridgeError::OutputMustBeP2pkhOrP2wpkh),
        _ => Err(BridgeError::OutputPubKeyHashNot20Bytes),
    }
}

/// Splits `fee` over `n` deposits; the last one also carries the remainder.
pub fn fee_shares(fee: u64, n: usize) -> Vec<u64> {
    if n == 0 {
        return Vec::new();
    }
    let share = fee / n as u64;
    let mut shares = vec![share; n];
    shares[n - 1] += fee % n as u64;
    shares
}

/// True if the even share of `fee` over `n` deposits is at most `max_fee`.
/// The remainder carried by the last deposit is not capped.
pub fn fee_share_within_cap(fee: u64, n: usize, max_fee: u64) -> bool {
    n > 0 && fee / n as u64 <= max_fee
}

/// Settles a proven deposit sweep and returns the wallet's new main UTXO.
pub fn submit_deposit_sweep_proof(
    ledger: &mut Ledger,
    params: &DepositParams,
    now: u32,
    sweep_tx: &BitcoinTxInfo,
    main_utxo: Option<&Utxo>,
    vault: Option<Address>,
    effects: &mut Effects,
) -> BridgeResult<Utxo> {
    let tx = sweep_tx.parse()?;
    if tx.outputs.len() != 1 {
        return Err(BridgeError::SweepTxMustHaveSingleOutput);
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

    let mut swept: Vec<OutpointKey> = Vec::with_capacity(tx.inputs.len());
    let mut main_found = false;
    let mut inputs_value = 0u64;
    for (input_index, input) in tx.inputs.iter().enumerate() {
        let key = OutpointKey::from_outpoint(&input.previous_output);
        if let Some(deposit) = ledger.deposits.get(&key) {
            if deposit.swept_at != 0 {
                return Err(BridgeError::DepositAlreadySwept);
            }
            if deposit.vault != vault {
                return Err(BridgeError::DepositRoutedToAnotherVault);
            }
            if u64::from(now) <= u64::from(deposit.revealed_at) + u64::from(params.min_age) {
                return Err(BridgeError::DepositMinAgeNotAchieved);
            }
            if deposit.wallet_pubkey_hash != pkh {
                return Err(BridgeError::DepositControlledByAnotherWallet);
            }
            if swept.contains(&key) {
                return Err(BridgeError::DepositAlreadySwept);
            }
            debug!("sweep input {input_index}: deposit of {} sat", deposit.amount);
            inputs_value += deposit.amount;
            swept.push(key);
        } else if !main_found
            && main_utxo.is_some_and(|m| m.is_spent_by(&input.previous_output))
        {
            let value = main_utxo.map_or(0, |m| m.value);
            debug!("sweep input {input_index}: main UTXO of {value} sat");
            inputs_value += value;
            main_found = true;
        } else {
            return Err(BridgeError::UnknownInputType { input_index });
        }
    }

    if main_utxo.is_some() && !main_found {
        return Err(BridgeError::ExpectedMainUtxoNotPresent);
    }
    if swept.is_empty() {
        return Err(BridgeError::NoDepositsInSweep);
    }
    if output_value > inputs_value {
        return Err(BridgeError::OutputValueExceedsInputs {
            inputs: inputs_value,
            outputs: output_value,
        });
    }

    let fee = inputs_value - output_value;
    if !fee_share_within_cap(fee, swept.len(), params.tx_max_fee) {
        return Err(BridgeError::TransactionFeeTooHigh);
    }
    let shares = fee_shares(fee, swept.len());

    let mut recipients = Vec::with_capacity(swept.len());
    let mut treasury_fee = 0u64;
    for (key, share) in swept.iter().zip(&shares) {
        let deposit = ledger
            .deposits
            .get_mut(key)
            .ok_or(BridgeError::NoDepositsInSweep)?;
        let credit = deposit
            .amount
            .checked_sub(deposit.treasury_fee)
            .and_then(|v| v.checked_sub(*share))
            .ok_or(BridgeError::FeeExceedsDepositAmount)?;
        deposit.swept_at = now;
        treasury_fee += deposit.treasury_fee;
        recipients.push((deposit.depositor, credit));
    }

    match vault {
        Some(vault) => effects.bank(BankCall::IncreaseBalanceAndCall { vault, recipients }),
        None => effects.bank(BankCall::IncreaseBalances { recipients }),
    }
    if treasury_fee > 0 {
        effects.bank(BankCall::IncreaseTreasuryBalance {
            amount: treasury_fee,
        });
    }

    if let Some(old) = main_utxo {
        ledger.mark_main_utxo_spent(&old);
    }
    let new_main = Utxo::new(tx.hash, 0, output_value);
    ledger.registered_wallet_mut(&pkh)?.main_utxo_hash = Some(new_main.commitment());

    info!(
        "deposits swept: wallet={pkh} tx={} deposits={} value={output_value} fee={fee}",
        tx.hash,
        swept.len()
    );
    Ok(new_main)
}
