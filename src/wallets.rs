//! Wallet lifecycle: registration, moving funds, closing and termination.
use crate::config::WalletParams;
use crate::error::{BridgeError, BridgeResult};
use crate::ledger::{Effects, Ledger, RegistryCall, Wallet, WalletState};
use crate::types::{EcdsaWalletId, Utxo, WalletPubKeyHash};
use log::{info, warn};

/// Checks whether a new wallet may be requested, and requests it.
///
/// With an active wallet, its balance must reach the creation maximum, or it
/// must be older than the creation period and hold at least the minimum.
pub fn request_new_wallet(
    ledger: &Ledger,
    params: &WalletParams,
    now: u32,
    active_main_utxo: Option<&Utxo>,
    effects: &mut Effects,
) -> BridgeResult<()> {
    if let Some(active) = ledger.active_wallet {
        let wallet = ledger.registered_wallet(&active)?;
        let balance = wallet.btc_balance(active_main_utxo)?;
        let old_enough =
            u64::from(now) >= u64::from(wallet.created_at) + u64::from(params.creation_period);
        let allowed = (old_enough && balance >= params.creation_min_btc_balance)
            || balance >= params.creation_max_btc_balance;
        if !allowed {
            return Err(BridgeError::WalletCreationConditionsNotMet);
        }
    }
    effects.registry(RegistryCall::RequestNewWallet);
    Ok(())
}

/// Registers a wallet created by the registry and makes it the active wallet.
pub fn register_new_wallet(
    ledger: &mut Ledger,
    now: u32,
    ecdsa_wallet_id: EcdsaWalletId,
    pkh: WalletPubKeyHash,
) -> BridgeResult<()> {
    if ledger.wallet_state(&pkh) != WalletState::Unknown {
        return Err(BridgeError::WalletAlreadyRegistered(pkh));
    }
    ledger.wallets.insert(
        pkh,
        Wallet {
            ecdsa_wallet_id,
            created_at: now,
            state: WalletState::Live,
            ..Wallet::default()
        },
    );
    ledger.active_wallet = Some(pkh);
    ledger.live_wallets_count += 1;
    info!("wallet {pkh} registered and active");
    Ok(())
}

/// Heartbeat failure of a live wallet forces it to move its funds.
pub fn notify_heartbeat_failed(
    ledger: &mut Ledger,
    now: u32,
    pkh: &WalletPubKeyHash,
    effects: &mut Effects,
) -> BridgeResult<()> {
    ledger
        .registered_wallet(pkh)?
        .require_state(pkh, &[WalletState::Live], "Live")?;
    move_to_moving_funds(ledger, now, pkh, effects)
}

/// Retires a live, non-active wallet that is too old or too small.
pub fn notify_closeable(
    ledger: &mut Ledger,
    params: &WalletParams,
    now: u32,
    pkh: &WalletPubKeyHash,
    main_utxo: Option<&Utxo>,
    effects: &mut Effects,
) -> BridgeResult<()> {
    if ledger.active_wallet == Some(*pkh) {
        return Err(BridgeError::ActiveWalletCannotBeClosed);
    }
    let wallet = ledger.registered_wallet(pkh)?;
    wallet.require_state(pkh, &[WalletState::Live], "Live")?;

    let old = u64::from(now) >= u64::from(wallet.created_at) + u64::from(params.max_age);
    let small = wallet.btc_balance(main_utxo)? < params.closure_min_btc_balance;
    if !old && !small {
        return Err(BridgeError::WalletNotCloseable);
    }
    move_to_moving_funds(ledger, now, pkh, effects)
}

/// Closes a wallet whose closing period is over.
pub fn notify_closing_period_elapsed(
    ledger: &mut Ledger,
    params: &WalletParams,
    now: u32,
    pkh: &WalletPubKeyHash,
) -> BridgeResult<()> {
    let wallet = ledger.registered_wallet_mut(pkh)?;
    wallet.require_state(pkh, &[WalletState::Closing], "Closing")?;
    if u64::from(now) <= u64::from(wallet.closing_started_at) + u64::from(params.closing_period) {
        return Err(BridgeError::ClosingPeriodNotElapsed);
    }
    wallet.state = WalletState::Closed;
    info!("wallet {pkh} closed");
    Ok(())
}

/// Terminates a wallet proven fraudulent.
pub fn terminate(
    ledger: &mut Ledger,
    pkh: &WalletPubKeyHash,
    effects: &mut Effects,
) -> BridgeResult<()> {
    let state = ledger.registered_wallet(pkh)?.state;
    match state {
        WalletState::Live => {
            ledger.live_wallets_count = ledger.live_wallets_count.saturating_sub(1);
            if ledger.active_wallet == Some(*pkh) {
                ledger.active_wallet = None;
            }
        }
        WalletState::MovingFunds | WalletState::Closing => {}
        other => {
            return Err(BridgeError::wallet_state(
                *pkh,
                other,
                "Live, MovingFunds or Closing",
            ))
        }
    }

    let wallet = ledger.registered_wallet_mut(pkh)?;
    wallet.state = WalletState::Terminated;
    if state != WalletState::Closing {
        effects.registry(RegistryCall::CloseWallet {
            wallet_id: wallet.ecdsa_wallet_id,
        });
    }
    warn!("wallet {pkh} terminated from {state:?}");
    Ok(())
}

/// Takes a live wallet out of service.
///
/// A wallet with funds enters MovingFunds; an empty one starts closing.
pub fn move_to_moving_funds(
    ledger: &mut Ledger,
    now: u32,
    pkh: &WalletPubKeyHash,
    effects: &mut Effects,
) -> BridgeResult<()> {
    if ledger.active_wallet == Some(*pkh) {
        ledger.active_wallet = None;
    }
    ledger.live_wallets_count = ledger.live_wallets_count.saturating_sub(1);

    let wallet = ledger.registered_wallet_mut(pkh)?;
    if wallet.main_utxo_hash.is_none() {
        begin_closing(wallet, pkh, now, effects);
    } else {
        wallet.state = WalletState::MovingFunds;
        wallet.moving_funds_requested_at = now;
        info!("wallet {pkh} moving funds");
    }
    Ok(())
}

/// Starts the closing period and retires the signing group.
pub fn begin_closing(
    wallet: &mut Wallet,
    pkh: &WalletPubKeyHash,
    now: u32,
    effects: &mut Effects,
) {
    wallet.state = WalletState::Closing;
    wallet.closing_started_at = now;
    effects.registry(RegistryCall::CloseWallet {
        wallet_id: wallet.ecdsa_wallet_id,
    });
    info!("wallet {pkh} closing");
}
