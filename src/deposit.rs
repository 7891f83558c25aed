//! Deposit reveal: binds a funding output to the deposit script parameters
//! published by the depositor.
use crate::config::DepositParams;
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::{DepositRequest, Ledger, WalletState};
use crate::tx::OutputScript;
use crate::types::{Address, BitcoinTxInfo, DepositKey, OutpointKey, WalletPubKeyHash};
use bitcoin::hashes::{hash160, sha256, Hash};
use bitcoin::ScriptBuf;
use log::info;
use std::collections::BTreeSet;

/// Lowest value interpreted as a timestamp rather than a block height.
pub const LOCKTIME_TIMESTAMP_THRESHOLD: u32 = 500_000_000;

/// Deposit script parameters revealed alongside the funding transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepositRevealInfo {
    /// Funding output holding the deposit.
    pub funding_output_index: u32,
    /// Depositor-chosen salt.
    pub blinding_factor: [u8; 8],
    /// Wallet that can spend the deposit.
    pub wallet_pubkey_hash: WalletPubKeyHash,
    /// Key hash that can reclaim the deposit after the locktime.
    pub refund_pubkey_hash: [u8; 20],
    /// Refund locktime, 4 bytes little-endian.
    pub refund_locktime: [u8; 4],
    /// Vault to credit, if any.
    pub vault: Option<Address>,
}

/// Builds the P2(W)SH redeem script of a deposit.
pub fn deposit_script(
    depositor: &Address,
    blinding_factor: &[u8; 8],
    wallet_pubkey_hash: &WalletPubKeyHash,
    refund_pubkey_hash: &[u8; 20],
    refund_locktime: &[u8; 4],
) -> ScriptBuf {
    let mut s = Vec::with_capacity(92);
    s.push(0x14);
    s.extend_from_slice(&depositor.0);
    s.extend_from_slice(&[0x75, 0x08]);
    s.extend_from_slice(blinding_factor);
    s.extend_from_slice(&[0x75, 0x76, 0xa9, 0x14]);
    s.extend_from_slice(&wallet_pubkey_hash.0);
    s.extend_from_slice(&[0x87, 0x63, 0xac, 0x67, 0x76, 0xa9, 0x14]);
    s.extend_from_slice(refund_pubkey_hash);
    s.extend_from_slice(&[0x88, 0x04]);
    s.extend_from_slice(refund_locktime);
    s.extend_from_slice(&[0xb1, 0x75, 0xac, 0x68]);
    ScriptBuf::from_bytes(s)
}

/// Checks that `output` locks to `script` as P2SH or P2WSH.
pub fn check_script_hash(output: &OutputScript, script: &[u8]) -> BridgeResult<()> {
    match output {
        OutputScript::P2sh(h) | OutputScript::P2pkh(h) | OutputScript::P2wpkh(h) => {
            if *h == hash160::Hash::hash(script).to_byte_array() {
                Ok(())
            } else {
                Err(BridgeError::WrongScriptHash20)
            }
        }
        OutputScript::P2wsh(h) => {
            if *h == sha256::Hash::hash(script).to_byte_array() {
                Ok(())
            } else {
                Err(BridgeError::WrongScriptHash32)
            }
        }
        _ => Err(BridgeError::WrongScriptHashLength),
    }
}

/// Records a deposit after checking its funding output and script.
#[allow(clippy::too_many_arguments)]
pub fn reveal_deposit(
    ledger: &mut Ledger,
    params: &DepositParams,
    trusted_vaults: &BTreeSet<Address>,
    now: u32,
    depositor: Address,
    funding_tx: &BitcoinTxInfo,
    reveal: &DepositRevealInfo,
) -> BridgeResult<DepositKey> {
    if let Some(vault) = reveal.vault {
        if !trusted_vaults.contains(&vault) {
            return Err(BridgeError::VaultNotTrusted(vault));
        }
    }

    let pkh = reveal.wallet_pubkey_hash;
    if ledger.wallet_state(&pkh) != WalletState::Live {
        return Err(BridgeError::wallet_state(pkh, ledger.wallet_state(&pkh), "Live"));
    }

    let locktime = u32::from_le_bytes(reveal.refund_locktime);
    if locktime < LOCKTIME_TIMESTAMP_THRESHOLD {
        return Err(BridgeError::RefundLocktimeTooLow);
    }
    if u64::from(now) + u64::from(params.reveal_ahead_period) > u64::from(locktime) {
        return Err(BridgeError::RefundLocktimeTooClose);
    }

    let output = funding_tx.output_at(reveal.funding_output_index)?;
    let script = deposit_script(
        &depositor,
        &reveal.blinding_factor,
        &pkh,
        &reveal.refund_pubkey_hash,
        &reveal.refund_locktime,
    );
    check_script_hash(&OutputScript::classify(&output.script_pubkey), script.as_bytes())?;

    let funding_tx_hash = funding_tx.hash();
    let key = OutpointKey::new(&funding_tx_hash, reveal.funding_output_index);
    if ledger.deposits.contains_key(&key) {
        return Err(BridgeError::DepositAlreadyRevealed);
    }

    let amount = output.value.to_sat();
    if amount < params.dust_threshold {
        return Err(BridgeError::DepositAmountTooSmall);
    }

    let treasury_fee = if params.treasury_fee_divisor > 0 {
        amount / params.treasury_fee_divisor
    } else {
        0
    };
    ledger.deposits.insert(
        key,
        DepositRequest {
            depositor,
            amount,
            revealed_at: now,
            vault: reveal.vault,
            treasury_fee,
            swept_at: 0,
            wallet_pubkey_hash: pkh,
            refund_locktime: locktime,
        },
    );
    info!(
        "deposit revealed: {funding_tx_hash}:{} amount={amount} wallet={pkh} depositor={depositor}",
        reveal.funding_output_index
    );
    Ok(key)
}
