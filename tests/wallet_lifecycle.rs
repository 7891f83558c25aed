mod common;

use bridge_settlement::ledger::RegistryCall;
use bridge_settlement::prelude::*;
use common::*;

const NOW: u32 = 1_700_000_000;
const DAY: u32 = 86_400;
const REGISTRY: Address = Address([0x12; 20]);

type Group = (EcdsaWalletId, [u8; 32], [u8; 32]);

const FIRST: Group = (EcdsaWalletId([1; 32]), [0x11; 32], [0x22; 32]);
const SECOND: Group = (EcdsaWalletId([2; 32]), [0x33; 32], [0x45; 32]);

#[tokio::test]
async fn wallets_are_created_retired_and_closed() -> anyhow::Result<()> {
    init_logging();
    let h = Harness::new(Ledger::default());
    let bridge = h.bridge(MockRelay::at(1), BridgeParams::default())?;
    let ctx = |now| CallContext::new(REGISTRY, now);

    // Nothing active yet: a wallet can always be requested.
    bridge.request_new_wallet(ctx(NOW), None).await?;
    assert_eq!(h.registry.calls(), vec![RegistryCall::RequestNewWallet]);

    let (id, x, y) = FIRST;
    let first = bridge.on_new_wallet_created(ctx(NOW), id, x, y).await?;
    assert_eq!(first, WalletPubKeyHash::from_ecdsa_coordinates(&x, &y));
    assert_eq!(bridge.active_wallet().await?, Some(first));
    assert_eq!(bridge.live_wallets_count().await?, 1);

    let err = bridge.on_new_wallet_created(ctx(NOW), id, x, y).await.unwrap_err();
    assert!(matches!(err, BridgeError::WalletAlreadyRegistered(p) if p == first));

    // An empty, fresh active wallet blocks new requests.
    let err = bridge
        .request_new_wallet(ctx(NOW + DAY), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::WalletCreationConditionsNotMet));

    let err = bridge
        .notify_wallet_closeable(ctx(NOW + DAY), first, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ActiveWalletCannotBeClosed));

    let (id, x, y) = SECOND;
    let second = bridge.on_new_wallet_created(ctx(NOW + DAY), id, x, y).await?;
    assert_eq!(bridge.active_wallet().await?, Some(second));
    assert_eq!(bridge.live_wallets_count().await?, 2);

    // The first wallet holds nothing, so it may be closed right away.
    bridge
        .notify_wallet_closeable(ctx(NOW + 2 * DAY), first, None)
        .await?;
    let w = bridge.wallet(&first).await?.unwrap();
    assert_eq!(w.state, WalletState::Closing);
    assert_eq!(w.closing_started_at, NOW + 2 * DAY);
    assert_eq!(bridge.live_wallets_count().await?, 1);

    let closing_period = bridge.params().wallet.closing_period;
    let err = bridge
        .notify_wallet_closing_period_elapsed(ctx(NOW + 2 * DAY + closing_period), first)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::ClosingPeriodNotElapsed));
    bridge
        .notify_wallet_closing_period_elapsed(ctx(NOW + 2 * DAY + closing_period + 1), first)
        .await?;
    assert_eq!(bridge.wallet(&first).await?.unwrap().state, WalletState::Closed);

    // A failed heartbeat retires the active wallet.
    bridge
        .notify_wallet_heartbeat_failed(ctx(NOW + 3 * DAY), x, y)
        .await?;
    assert_eq!(bridge.active_wallet().await?, None);
    assert_eq!(bridge.live_wallets_count().await?, 0);
    assert_eq!(
        bridge.wallet(&second).await?.unwrap().state,
        WalletState::Closing
    );

    let err = bridge
        .notify_wallet_heartbeat_failed(ctx(NOW + 3 * DAY), x, y)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnexpectedWalletState { .. }));

    // Fraud during closing terminates without closing the group twice.
    bridge.terminate_wallet(ctx(NOW + 4 * DAY), second).await?;
    assert_eq!(
        bridge.wallet(&second).await?.unwrap().state,
        WalletState::Terminated
    );
    assert_eq!(
        h.registry.calls(),
        vec![
            RegistryCall::RequestNewWallet,
            RegistryCall::CloseWallet {
                wallet_id: FIRST.0
            },
            RegistryCall::CloseWallet {
                wallet_id: SECOND.0
            },
        ]
    );

    let err = bridge
        .terminate_wallet(ctx(NOW + 4 * DAY), first)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnexpectedWalletState { .. }));
    Ok(())
}

#[tokio::test]
async fn unknown_wallets_are_rejected() -> anyhow::Result<()> {
    let h = Harness::new(Ledger::default());
    let bridge = h.bridge(MockRelay::at(1), BridgeParams::default())?;
    let stranger = WalletPubKeyHash([0x99; 20]);

    let err = bridge
        .notify_wallet_closeable(CallContext::new(REGISTRY, NOW), stranger, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::UnexpectedWalletState {
            wallet,
            actual: WalletState::Unknown,
            ..
        } if wallet == stranger
    ));
    assert!(h.registry.calls().is_empty());
    assert_eq!(h.store.snapshot(), Ledger::default());
    Ok(())
}
