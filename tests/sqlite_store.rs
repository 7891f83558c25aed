use bitcoin::hashes::Hash;
use bitcoin::Txid;
use bridge_settlement::ledger::{Ledger, Wallet, WalletState};
use bridge_settlement::store::{sqlite_store::SqliteStore, Store}; // bring trait methods into scope
use bridge_settlement::types::{Utxo, WalletPubKeyHash};

use tempfile::NamedTempFile;

fn sample_ledger() -> Ledger {
    let pkh = WalletPubKeyHash([0x7a; 20]);
    let main = Utxo::new(Txid::from_byte_array([0x42; 32]), 1, 1_177_424);
    let mut ledger = Ledger::default();
    ledger.wallets.insert(
        pkh,
        Wallet {
            state: WalletState::Live,
            main_utxo_hash: Some(main.commitment()),
            created_at: 1_650_000_000,
            ..Wallet::default()
        },
    );
    ledger.active_wallet = Some(pkh);
    ledger.live_wallets_count = 1;
    ledger.mark_main_utxo_spent(&Utxo::new(Txid::from_byte_array([0x41; 32]), 0, 10));
    ledger
}

#[tokio::test]
async fn sqlite_store_roundtrips() -> anyhow::Result<()> {
    // temp file for each run
    let tmp = NamedTempFile::new()?;
    let path = tmp.path().to_string_lossy().to_string();

    let store = SqliteStore::new(&path)?;

    // Defaults on a fresh DB
    let ledger = store.load_ledger().await?;
    assert_eq!(ledger, Ledger::default(), "fresh DB starts with an empty ledger");

    let ledger = sample_ledger();
    store.save_ledger(&ledger).await?;
    assert_eq!(store.load_ledger().await?, ledger);

    // Survives reopening the file
    drop(store);
    let reopened = SqliteStore::new(&path)?;
    assert_eq!(reopened.load_ledger().await?, ledger);

    // Overwrites, does not append
    let mut next = ledger.clone();
    next.live_wallets_count = 0;
    next.active_wallet = None;
    reopened.save_ledger(&next).await?;
    assert_eq!(reopened.load_ledger().await?, next);

    Ok(())
}

#[tokio::test]
async fn in_memory_store_keeps_state_across_calls() -> anyhow::Result<()> {
    let store = SqliteStore::new_in_memory()?;
    let ledger = sample_ledger();
    store.save_ledger(&ledger).await?;

    let clone = store.clone();
    assert_eq!(clone.load_ledger().await?, ledger);
    Ok(())
}
