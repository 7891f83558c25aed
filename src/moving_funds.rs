//! Moving funds: a retiring wallet commits to a set of live target wallets and
//! splits its main UTXO evenly between them.
use crate::config::{MovingFundsParams, WalletParams};
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::{
    Effects, Ledger, MovedFundsSweepRequest, MovedFundsSweepState, RegistryCall, WalletState,
};
use crate::redemption::check_outbound_input;
use crate::sweep::wallet_output_pkh;
use crate::types::{
    Address, BitcoinTxInfo, OutpointKey, TargetWalletsCommitment, Utxo, WalletPubKeyHash,
};
use crate::wallets;
use log::{debug, info, warn};

/// Number of target wallets a balance must be split between.
pub fn expected_target_wallets_count(
    balance: u64,
    max_btc_transfer: u64,
    live_wallets_count: u32,
) -> usize {
    let needed = if max_btc_transfer == 0 {
        1
    } else {
        balance.div_ceil(max_btc_transfer)
    };
    needed.min(u64::from(live_wallets_count)) as usize
}

/// True if every value lies in `[total / n, total / n + total % n]`.
pub fn is_evenly_distributed(values: &[u64]) -> bool {
    if values.is_empty() {
        return false;
    }
    let total: u64 = values.iter().sum();
    let n = values.len() as u64;
    let floor = total / n;
    let ceiling = floor + total % n;
    values.iter().all(|v| (floor..=ceiling).contains(v))
}

/// Records the ordered target wallets a moving funds transaction must pay.
///
/// Membership of the caller in the source wallet's signing group is checked
/// by the caller of this function.
pub fn submit_moving_funds_commitment(
    ledger: &mut Ledger,
    params: &WalletParams,
    pkh: &WalletPubKeyHash,
    main_utxo: &Utxo,
    target_wallets: &[WalletPubKeyHash],
) -> BridgeResult<TargetWalletsCommitment> {
    let wallet = ledger.registered_wallet(pkh)?;
    wallet.require_state(pkh, &[WalletState::MovingFunds], "MovingFunds")?;
    if wallet.pending_redemptions_value != 0 {
        return Err(BridgeError::PendingRedemptionsNotHandled);
    }
    if wallet.pending_moved_funds_sweep_requests_count != 0 {
        return Err(BridgeError::PendingMovedFundsSweepsNotHandled);
    }
    if wallet.moving_funds_target_wallets_commitment_hash.is_some() {
        return Err(BridgeError::TargetWalletsCommitmentAlreadySubmitted);
    }
    let balance = wallet.btc_balance(Some(main_utxo))?;
    if balance == 0 {
        return Err(BridgeError::WalletBalanceZero);
    }

    let expected = expected_target_wallets_count(
        balance,
        params.max_btc_transfer,
        ledger.live_wallets_count,
    );
    if expected == 0 {
        return Err(BridgeError::NoTargetWalletsAvailable);
    }
    if target_wallets.len() != expected {
        return Err(BridgeError::TargetWalletsCountMismatch {
            expected,
            submitted: target_wallets.len(),
        });
    }

    let mut previous: Option<&WalletPubKeyHash> = None;
    for target in target_wallets {
        if target == pkh {
            return Err(BridgeError::TargetWalletIsSource);
        }
        if previous.is_some_and(|p| target <= p) {
            return Err(BridgeError::TargetWalletsOrderBroken);
        }
        if ledger.wallet_state(target) != WalletState::Live {
            return Err(BridgeError::TargetWalletNotLive(*target));
        }
        previous = Some(target);
    }

    let commitment = TargetWalletsCommitment::new(target_wallets);
    ledger
        .registered_wallet_mut(pkh)?
        .moving_funds_target_wallets_commitment_hash = Some(commitment);
    info!(
        "moving funds commitment submitted: wallet={pkh} targets={}",
        target_wallets.len()
    );
    Ok(commitment)
}

/// Settles a proven moving funds transaction.
///
/// Each output becomes a pending moved funds sweep request of its target
/// wallet and the source wallet starts closing.
pub fn submit_moving_funds_proof(
    ledger: &mut Ledger,
    params: &MovingFundsParams,
    now: u32,
    moving_funds_tx: &BitcoinTxInfo,
    main_utxo: &Utxo,
    pkh: &WalletPubKeyHash,
    effects: &mut Effects,
) -> BridgeResult<Vec<OutpointKey>> {
    let wallet = ledger.registered_wallet(pkh)?;
    wallet.require_main_utxo(main_utxo)?;
    let committed = wallet.moving_funds_target_wallets_commitment_hash;

    let tx = moving_funds_tx.parse()?;
    check_outbound_input(&tx.inputs, main_utxo)?;

    let mut targets = Vec::with_capacity(tx.outputs.len());
    let mut values = Vec::with_capacity(tx.outputs.len());
    for output in &tx.outputs {
        targets.push(wallet_output_pkh(output)?);
        values.push(output.value.to_sat());
    }

    match committed {
        None => return Err(BridgeError::TargetWalletsCommitmentNotSubmitted),
        Some(c) if c != TargetWalletsCommitment::new(&targets) => {
            return Err(BridgeError::TargetWalletsDontCorrespondToCommitment)
        }
        Some(_) => {}
    }
    if !is_evenly_distributed(&values) {
        return Err(BridgeError::AmountNotDistributedEvenly);
    }

    let total: u64 = values.iter().sum();
    let fee = main_utxo
        .value
        .checked_sub(total)
        .ok_or(BridgeError::OutputValueExceedsInputs {
            inputs: main_utxo.value,
            outputs: total,
        })?;
    if fee > params.tx_max_total_fee {
        return Err(BridgeError::TransactionFeeTooHigh);
    }

    ledger.registered_wallet(pkh)?.require_state(
        pkh,
        &[WalletState::MovingFunds],
        "MovingFunds",
    )?;

    let mut keys = Vec::with_capacity(targets.len());
    for (index, (target, value)) in targets.iter().zip(&values).enumerate() {
        let key = OutpointKey::new(&tx.hash, index as u32);
        ledger.moved_funds_sweep_requests.insert(
            key,
            MovedFundsSweepRequest {
                wallet_pubkey_hash: *target,
                value: *value,
                created_at: now,
                state: MovedFundsSweepState::Pending,
            },
        );
        ledger
            .registered_wallet_mut(target)?
            .pending_moved_funds_sweep_requests_count += 1;
        debug!("moved funds output {index}: {value} sat to {target}");
        keys.push(key);
    }

    ledger.mark_main_utxo_spent(main_utxo);
    let wallet = ledger.registered_wallet_mut(pkh)?;
    wallet.main_utxo_hash = None;
    wallets::begin_closing(wallet, pkh, now, effects);

    info!(
        "moving funds completed: wallet={pkh} tx={} targets={} moved={total} fee={fee}",
        tx.hash,
        targets.len()
    );
    Ok(keys)
}

/// Restarts the moving funds timeout when no live wallet could take the funds.
pub fn reset_moving_funds_timeout(
    ledger: &mut Ledger,
    params: &MovingFundsParams,
    now: u32,
    pkh: &WalletPubKeyHash,
) -> BridgeResult<()> {
    let live_wallets_count = ledger.live_wallets_count;
    let wallet = ledger.registered_wallet_mut(pkh)?;
    wallet.require_state(pkh, &[WalletState::MovingFunds], "MovingFunds")?;
    if live_wallets_count != 0 {
        return Err(BridgeError::LiveWalletsCountNotZero);
    }
    if wallet.moving_funds_target_wallets_commitment_hash.is_some() {
        return Err(BridgeError::TargetWalletsCommitmentAlreadySubmitted);
    }
    if u64::from(wallet.moving_funds_requested_at) + u64::from(params.timeout_reset_delay)
        > u64::from(now)
    {
        return Err(BridgeError::MovingFundsTimeoutResetTooEarly);
    }
    wallet.moving_funds_requested_at = now;
    info!("moving funds timeout reset: wallet={pkh}");
    Ok(())
}

/// Terminates and slashes a wallet that did not move its funds in time.
#[allow(clippy::too_many_arguments)]
pub fn notify_moving_funds_timeout(
    ledger: &mut Ledger,
    params: &MovingFundsParams,
    now: u32,
    notifier: Address,
    pkh: &WalletPubKeyHash,
    members: &[u32],
    effects: &mut Effects,
) -> BridgeResult<()> {
    let wallet = ledger.registered_wallet(pkh)?;
    wallet.require_state(pkh, &[WalletState::MovingFunds], "MovingFunds")?;
    if u64::from(now) <= u64::from(wallet.moving_funds_requested_at) + u64::from(params.timeout)
    {
        return Err(BridgeError::MovingFundsNotTimedOut);
    }
    let wallet_id = wallet.ecdsa_wallet_id;

    wallets::terminate(ledger, pkh, effects)?;
    warn!("wallet {pkh} slashed for moving funds timeout, notifier={notifier}");
    effects.registry(RegistryCall::Seize {
        amount: params.timeout_slashing_amount,
        reward_multiplier: params.timeout_notifier_reward_multiplier,
        notifier,
        wallet_id,
        members: members.to_vec(),
    });
    Ok(())
}

/// Lets a wallet whose balance is not worth moving go straight to closing.
pub fn notify_moving_funds_below_dust(
    ledger: &mut Ledger,
    params: &MovingFundsParams,
    now: u32,
    pkh: &WalletPubKeyHash,
    main_utxo: &Utxo,
    effects: &mut Effects,
) -> BridgeResult<()> {
    let wallet = ledger.registered_wallet_mut(pkh)?;
    wallet.require_state(pkh, &[WalletState::MovingFunds], "MovingFunds")?;
    if wallet.btc_balance(Some(main_utxo))? >= params.dust_threshold {
        return Err(BridgeError::WalletBalanceNotBelowDust);
    }
    wallets::begin_closing(wallet, pkh, now, effects);
    info!("moving funds below dust: wallet={pkh}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Wallet;
    use crate::types::EcdsaWalletId;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version;
    use bitcoin::{
        Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, WPubkeyHash,
        Witness,
    };

    const NOW: u32 = 1_700_000_000;

    fn source() -> WalletPubKeyHash {
        WalletPubKeyHash([0x50; 20])
    }

    fn targets() -> Vec<WalletPubKeyHash> {
        vec![
            WalletPubKeyHash([0x10; 20]),
            WalletPubKeyHash([0x20; 20]),
            WalletPubKeyHash([0x30; 20]),
        ]
    }

    fn main_utxo() -> Utxo {
        Utxo::new(Txid::from_byte_array([0xab; 32]), 1, 1_786_853)
    }

    fn wallet_params() -> WalletParams {
        WalletParams {
            max_btc_transfer: 600_000,
            ..WalletParams::default()
        }
    }

    fn ledger() -> Ledger {
        let mut ledger = Ledger::default();
        ledger.wallets.insert(
            source(),
            Wallet {
                ecdsa_wallet_id: EcdsaWalletId([5; 32]),
                main_utxo_hash: Some(main_utxo().commitment()),
                state: WalletState::MovingFunds,
                moving_funds_requested_at: NOW,
                ..Wallet::default()
            },
        );
        for target in targets() {
            ledger.wallets.insert(
                target,
                Wallet {
                    state: WalletState::Live,
                    ..Wallet::default()
                },
            );
        }
        ledger.live_wallets_count = 3;
        ledger
    }

    fn moving_funds_tx(outputs: &[(WalletPubKeyHash, u64)]) -> BitcoinTxInfo {
        let utxo = main_utxo();
        let tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(utxo.tx_hash, utxo.output_index),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: outputs
                .iter()
                .map(|(pkh, value)| TxOut {
                    value: Amount::from_sat(*value),
                    script_pubkey: ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(pkh.0)),
                })
                .collect(),
        };
        BitcoinTxInfo::from(&tx)
    }

    #[test]
    fn target_count_and_distribution() {
        assert_eq!(expected_target_wallets_count(1_786_853, 600_000, 3), 3);
        assert_eq!(expected_target_wallets_count(1_786_853, 600_000, 2), 2);
        assert_eq!(expected_target_wallets_count(600_000, 600_000, 5), 1);
        assert_eq!(expected_target_wallets_count(10, 600_000, 0), 0);

        assert!(is_evenly_distributed(&[595_484, 595_485, 595_484]));
        assert!(is_evenly_distributed(&[595_484, 595_484, 595_485]));
        assert!(!is_evenly_distributed(&[595_483, 595_486, 595_484]));
        assert!(!is_evenly_distributed(&[]));
    }

    #[test]
    fn commitment_checks_targets() {
        let mut ledger = ledger();
        let p = wallet_params();

        let mut two = targets();
        two.pop();
        assert!(matches!(
            submit_moving_funds_commitment(&mut ledger, &p, &source(), &main_utxo(), &two),
            Err(BridgeError::TargetWalletsCountMismatch {
                expected: 3,
                submitted: 2
            })
        ));

        let mut unordered = targets();
        unordered.swap(0, 1);
        assert!(matches!(
            submit_moving_funds_commitment(&mut ledger, &p, &source(), &main_utxo(), &unordered),
            Err(BridgeError::TargetWalletsOrderBroken)
        ));

        let mut with_source = targets();
        with_source[2] = source();
        assert!(matches!(
            submit_moving_funds_commitment(&mut ledger, &p, &source(), &main_utxo(), &with_source),
            Err(BridgeError::TargetWalletIsSource)
        ));

        ledger.wallets.get_mut(&targets()[1]).unwrap().state = WalletState::Closing;
        assert!(matches!(
            submit_moving_funds_commitment(&mut ledger, &p, &source(), &main_utxo(), &targets()),
            Err(BridgeError::TargetWalletNotLive(_))
        ));
        ledger.wallets.get_mut(&targets()[1]).unwrap().state = WalletState::Live;

        let commitment =
            submit_moving_funds_commitment(&mut ledger, &p, &source(), &main_utxo(), &targets())
                .unwrap();
        assert_eq!(commitment, TargetWalletsCommitment::new(&targets()));
        assert!(matches!(
            submit_moving_funds_commitment(&mut ledger, &p, &source(), &main_utxo(), &targets()),
            Err(BridgeError::TargetWalletsCommitmentAlreadySubmitted)
        ));
    }

    #[test]
    fn commitment_requires_handled_obligations() {
        let mut ledger = ledger();
        ledger
            .wallets
            .get_mut(&source())
            .unwrap()
            .pending_redemptions_value = 1;
        assert!(matches!(
            submit_moving_funds_commitment(
                &mut ledger,
                &wallet_params(),
                &source(),
                &main_utxo(),
                &targets()
            ),
            Err(BridgeError::PendingRedemptionsNotHandled)
        ));

        let mut ledger = self::ledger();
        ledger.live_wallets_count = 0;
        assert!(matches!(
            submit_moving_funds_commitment(
                &mut ledger,
                &wallet_params(),
                &source(),
                &main_utxo(),
                &targets()
            ),
            Err(BridgeError::NoTargetWalletsAvailable)
        ));
    }

    #[test]
    fn splits_indivisible_amount_between_three_targets() {
        let mut ledger = ledger();
        submit_moving_funds_commitment(
            &mut ledger,
            &wallet_params(),
            &source(),
            &main_utxo(),
            &targets(),
        )
        .unwrap();

        let t = targets();
        let tx = moving_funds_tx(&[(t[0], 595_484), (t[1], 595_485), (t[2], 595_484)]);
        let mut effects = Effects::new();
        let keys = submit_moving_funds_proof(
            &mut ledger,
            &MovingFundsParams::default(),
            NOW + 10,
            &tx,
            &main_utxo(),
            &source(),
            &mut effects,
        )
        .unwrap();

        assert_eq!(keys.len(), 3);
        let moved: u64 = keys
            .iter()
            .map(|k| ledger.moved_funds_sweep_requests[k].value)
            .sum();
        assert_eq!(moved + 400, main_utxo().value);
        for (key, target) in keys.iter().zip(&t) {
            let request = &ledger.moved_funds_sweep_requests[key];
            assert_eq!(request.wallet_pubkey_hash, *target);
            assert_eq!(request.state, MovedFundsSweepState::Pending);
            assert_eq!(
                ledger.wallet(target).unwrap().pending_moved_funds_sweep_requests_count,
                1
            );
        }

        let source_wallet = ledger.wallet(&source()).unwrap();
        assert_eq!(source_wallet.state, WalletState::Closing);
        assert_eq!(source_wallet.main_utxo_hash, None);
        assert_eq!(source_wallet.closing_started_at, NOW + 10);
        assert!(ledger.is_main_utxo_spent(&main_utxo()));
        assert_eq!(
            effects.registry,
            vec![RegistryCall::CloseWallet {
                wallet_id: EcdsaWalletId([5; 32])
            }]
        );
    }

    #[test]
    fn commitment_needs_a_balance() {
        let mut ledger = ledger();
        ledger.wallets.get_mut(&source()).unwrap().main_utxo_hash = None;
        assert!(matches!(
            submit_moving_funds_commitment(
                &mut ledger,
                &wallet_params(),
                &source(),
                &main_utxo(),
                &targets(),
            ),
            Err(BridgeError::WalletBalanceZero)
        ));

        let mut ledger = self::ledger();
        let mut wrong = main_utxo();
        wrong.value -= 1;
        assert!(matches!(
            submit_moving_funds_commitment(
                &mut ledger,
                &wallet_params(),
                &source(),
                &wrong,
                &targets(),
            ),
            Err(BridgeError::InvalidMainUtxo)
        ));
    }

    #[test]
    fn proof_spends_only_the_main_utxo() {
        let t = targets();
        let mut ledger = ledger();
        submit_moving_funds_commitment(
            &mut ledger,
            &wallet_params(),
            &source(),
            &main_utxo(),
            &t,
        )
        .unwrap();

        let single = moving_funds_tx(&[(t[0], 595_484), (t[1], 595_485), (t[2], 595_484)]);
        let mut tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: single.inputs().unwrap(),
            output: single.outputs().unwrap(),
        };
        tx.input.push(TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([0xcd; 32]), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        });
        let before = ledger.clone();
        assert!(matches!(
            submit_moving_funds_proof(
                &mut ledger,
                &MovingFundsParams::default(),
                NOW,
                &BitcoinTxInfo::from(&tx),
                &main_utxo(),
                &source(),
                &mut Effects::new(),
            ),
            Err(BridgeError::OutboundTxMustHaveSingleInput)
        ));
        assert_eq!(ledger, before);
    }

    #[test]
    fn proof_rejects_uneven_or_uncommitted_outputs() {
        let t = targets();
        let mut ledger = ledger();
        let even = moving_funds_tx(&[(t[0], 595_484), (t[1], 595_485), (t[2], 595_484)]);
        assert!(matches!(
            submit_moving_funds_proof(
                &mut ledger,
                &MovingFundsParams::default(),
                NOW,
                &even,
                &main_utxo(),
                &source(),
                &mut Effects::new(),
            ),
            Err(BridgeError::TargetWalletsCommitmentNotSubmitted)
        ));

        submit_moving_funds_commitment(
            &mut ledger,
            &wallet_params(),
            &source(),
            &main_utxo(),
            &t,
        )
        .unwrap();

        let reordered = moving_funds_tx(&[(t[1], 595_484), (t[0], 595_485), (t[2], 595_484)]);
        assert!(matches!(
            submit_moving_funds_proof(
                &mut ledger,
                &MovingFundsParams::default(),
                NOW,
                &reordered,
                &main_utxo(),
                &source(),
                &mut Effects::new(),
            ),
            Err(BridgeError::TargetWalletsDontCorrespondToCommitment)
        ));

        let uneven = moving_funds_tx(&[(t[0], 595_000), (t[1], 595_969), (t[2], 595_484)]);
        assert!(matches!(
            submit_moving_funds_proof(
                &mut ledger,
                &MovingFundsParams::default(),
                NOW,
                &uneven,
                &main_utxo(),
                &source(),
                &mut Effects::new(),
            ),
            Err(BridgeError::AmountNotDistributedEvenly)
        ));

        let expensive = moving_funds_tx(&[(t[0], 500_000), (t[1], 500_000), (t[2], 500_000)]);
        assert!(matches!(
            submit_moving_funds_proof(
                &mut ledger,
                &MovingFundsParams::default(),
                NOW,
                &expensive,
                &main_utxo(),
                &source(),
                &mut Effects::new(),
            ),
            Err(BridgeError::TransactionFeeTooHigh)
        ));
    }

    #[test]
    fn timeout_reset_and_termination() {
        let p = MovingFundsParams::default();
        let mut ledger = ledger();

        assert!(matches!(
            reset_moving_funds_timeout(&mut ledger, &p, NOW + p.timeout_reset_delay, &source()),
            Err(BridgeError::LiveWalletsCountNotZero)
        ));
        ledger.live_wallets_count = 0;
        assert!(matches!(
            reset_moving_funds_timeout(&mut ledger, &p, NOW + p.timeout_reset_delay - 1, &source()),
            Err(BridgeError::MovingFundsTimeoutResetTooEarly)
        ));
        let reset_at = NOW + p.timeout_reset_delay;
        reset_moving_funds_timeout(&mut ledger, &p, reset_at, &source()).unwrap();
        assert_eq!(
            ledger.wallet(&source()).unwrap().moving_funds_requested_at,
            reset_at
        );

        let mut effects = Effects::new();
        let notifier = Address([0xee; 20]);
        assert!(matches!(
            notify_moving_funds_timeout(
                &mut ledger,
                &p,
                reset_at + p.timeout,
                notifier,
                &source(),
                &[7],
                &mut effects
            ),
            Err(BridgeError::MovingFundsNotTimedOut)
        ));
        notify_moving_funds_timeout(
            &mut ledger,
            &p,
            reset_at + p.timeout + 1,
            notifier,
            &source(),
            &[7],
            &mut effects,
        )
        .unwrap();
        assert_eq!(
            ledger.wallet(&source()).unwrap().state,
            WalletState::Terminated
        );
        assert_eq!(
            effects.registry,
            vec![
                RegistryCall::CloseWallet {
                    wallet_id: EcdsaWalletId([5; 32])
                },
                RegistryCall::Seize {
                    amount: p.timeout_slashing_amount,
                    reward_multiplier: p.timeout_notifier_reward_multiplier,
                    notifier,
                    wallet_id: EcdsaWalletId([5; 32]),
                    members: vec![7],
                },
            ]
        );
    }

    #[test]
    fn below_dust_wallet_starts_closing() {
        let p = MovingFundsParams::default();
        let mut ledger = ledger();
        let mut effects = Effects::new();
        assert!(matches!(
            notify_moving_funds_below_dust(&mut ledger, &p, NOW, &source(), &main_utxo(), &mut effects),
            Err(BridgeError::WalletBalanceNotBelowDust)
        ));

        let small = Utxo::new(Txid::from_byte_array([0xcd; 32]), 0, p.dust_threshold - 1);
        ledger.wallets.get_mut(&source()).unwrap().main_utxo_hash = Some(small.commitment());
        notify_moving_funds_below_dust(&mut ledger, &p, NOW, &source(), &small, &mut effects)
            .unwrap();
        assert_eq!(ledger.wallet(&source()).unwrap().state, WalletState::Closing);
        assert_eq!(effects.registry.len(), 1);
    }
}
