//! Orchestrator for the bridge settlement flows:
//! 1) check the caller and, for proofs, verify SPV inclusion against the relay,
//! 2) run the settlement engine on a freshly loaded ledger,
//! 3) replay the produced registry calls and one atomic bank batch, then persist the ledger.
//!
//! A call that fails at any step leaves the stored ledger untouched.
use crate::{
    bank::{BalanceOp, Bank},
    config::BridgeParams,
    deposit::{self, DepositRevealInfo},
    error::{BridgeError, BridgeResult},
    ledger::{
        DepositRequest, Effects, Ledger, MovedFundsSweepRequest, RedemptionRequest,
        RegistryCall, Wallet,
    },
    moved_funds, moving_funds,
    redemption::{self, RedemptionSettlement},
    registry::EcdsaWalletRegistry,
    relay::Relay,
    spv::{self, EpochDifficulty},
    store::Store,
    sweep,
    types::{
        Address, BitcoinTxInfo, CallContext, DepositKey, EcdsaWalletId, OutpointKey,
        RedemptionKey, SpvProof, TargetWalletsCommitment, Utxo, WalletPubKeyHash,
    },
    validator::{
        self, DepositExtraInfo, DepositSweepProposal, HeartbeatProposal, MovingFundsProposal,
        RedemptionProposal,
    },
    wallets,
};
use bitcoin::{Script, Txid};
use log::debug;
use std::collections::BTreeSet;
use tokio::sync::Mutex;

/// Bridge core. `S` = ledger store, `B` = bank, `R` = ECDSA wallet registry, `D` = difficulty relay.
pub struct Bridge<S, B, R, D> {
    store: S,
    bank: B,
    registry: R,
    relay: D,
    treasury: Address,
    params: BridgeParams,
    spv_maintainers: BTreeSet<Address>,
    trusted_vaults: BTreeSet<Address>,
    lock: Mutex<()>,
}

impl<S, B, R, D> Bridge<S, B, R, D>
where
    S: Store + 'static,
    B: Bank + 'static,
    R: EcdsaWalletRegistry + 'static,
    D: Relay + 'static,
{
    /// Create a bridge with default parameters and no SPV maintainers.
    pub fn new(store: S, bank: B, registry: R, relay: D, treasury: Address) -> Self {
        Self {
            store,
            bank,
            registry,
            relay,
            treasury,
            params: BridgeParams::default(),
            spv_maintainers: BTreeSet::new(),
            trusted_vaults: BTreeSet::new(),
            lock: Mutex::new(()),
        }
    }

    /// Replace the parameters. Fails if they break a parameter rule.
    pub fn with_params(mut self, params: BridgeParams) -> BridgeResult<Self> {
        params.validate()?;
        self.params = params;
        Ok(self)
    }

    /// Accounts allowed to submit SPV proofs.
    pub fn with_spv_maintainers(mut self, maintainers: impl IntoIterator<Item = Address>) -> Self {
        self.spv_maintainers = maintainers.into_iter().collect();
        self
    }

    /// Vaults deposits may be routed to.
    pub fn with_trusted_vaults(mut self, vaults: impl IntoIterator<Item = Address>) -> Self {
        self.trusted_vaults = vaults.into_iter().collect();
        self
    }

    /// Current parameters.
    pub fn params(&self) -> &BridgeParams {
        &self.params
    }

    async fn load(&self) -> BridgeResult<Ledger> {
        self.store.load_ledger().await.map_err(BridgeError::Store)
    }

    /// Replays `effects` on the collaborators, then persists `ledger`.
    ///
    /// Registry calls go first with seizures leading, so a refused seizure
    /// stops the call before any balance moves. Bank calls are then sent as a
    /// single batch the bank applies whole or not at all.
    async fn commit(&self, ledger: &Ledger, mut effects: Effects) -> BridgeResult<()> {
        effects
            .registry
            .sort_by_key(|call| !matches!(call, RegistryCall::Seize { .. }));
        for call in effects.registry {
            debug!("registry call: {call:?}");
            let res = match call {
                RegistryCall::RequestNewWallet => self.registry.request_new_wallet().await,
                RegistryCall::Seize {
                    amount,
                    reward_multiplier,
                    notifier,
                    wallet_id,
                    members,
                } => {
                    self.registry
                        .seize(amount, reward_multiplier, notifier, wallet_id, &members)
                        .await
                }
                RegistryCall::CloseWallet { wallet_id } => {
                    self.registry.close_wallet(wallet_id).await
                }
            };
            res.map_err(BridgeError::Registry)?;
        }

        let ops: Vec<BalanceOp> = effects
            .bank
            .into_iter()
            .map(|call| BalanceOp::from_call(call, self.treasury))
            .collect();
        if !ops.is_empty() {
            debug!("bank batch: {ops:?}");
            self.bank.apply(&ops).await.map_err(BridgeError::Bank)?;
        }

        self.store.save_ledger(ledger).await.map_err(BridgeError::Store)
    }

    /// Runs `op` on the stored ledger under the bridge lock and commits its
    /// effects if it succeeds.
    async fn execute<T, F>(&self, op: F) -> BridgeResult<T>
    where
        F: FnOnce(&mut Ledger, &mut Effects) -> BridgeResult<T> + Send,
    {
        let _guard = self.lock.lock().await;
        let mut ledger = self.load().await?;
        let mut effects = Effects::new();
        let out = op(&mut ledger, &mut effects)?;
        self.commit(&ledger, effects).await?;
        Ok(out)
    }

    /// Checks the sender is an SPV maintainer and that `proof` buries `tx`
    /// deep enough at the relay's difficulty.
    async fn verify_proof(
        &self,
        ctx: &CallContext,
        tx: &BitcoinTxInfo,
        proof: &SpvProof,
    ) -> BridgeResult<Txid> {
        if !self.spv_maintainers.contains(&ctx.sender) {
            return Err(BridgeError::NotSpvMaintainer(ctx.sender));
        }
        let difficulty = EpochDifficulty {
            current: self
                .relay
                .current_epoch_difficulty()
                .await
                .map_err(BridgeError::Relay)?,
            previous: self
                .relay
                .prev_epoch_difficulty()
                .await
                .map_err(BridgeError::Relay)?,
        };
        let tx_hash = tx.hash();
        spv::verify_proof(
            &tx_hash,
            proof,
            difficulty,
            self.params.tx_proof_difficulty_factor,
        )?;
        debug!("SPV proof accepted for {tx_hash}");
        Ok(tx_hash)
    }

    // ---------------------------------------------------------------- wallets

    /// Ask the registry for a new signing group if the active wallet allows it.
    pub async fn request_new_wallet(
        &self,
        ctx: CallContext,
        active_main_utxo: Option<Utxo>,
    ) -> BridgeResult<()> {
        let params = &self.params.wallet;
        self.execute(|ledger, effects| {
            wallets::request_new_wallet(ledger, params, ctx.now, active_main_utxo.as_ref(), effects)
        })
        .await
    }

    /// Registry callback: a signing group with public key `(x, y)` exists.
    pub async fn on_new_wallet_created(
        &self,
        ctx: CallContext,
        ecdsa_wallet_id: EcdsaWalletId,
        x: [u8; 32],
        y: [u8; 32],
    ) -> BridgeResult<WalletPubKeyHash> {
        let pkh = WalletPubKeyHash::from_ecdsa_coordinates(&x, &y);
        self.execute(|ledger, _| wallets::register_new_wallet(ledger, ctx.now, ecdsa_wallet_id, pkh))
            .await?;
        Ok(pkh)
    }

    /// Registry callback: the signing group with public key `(x, y)` failed a heartbeat.
    pub async fn notify_wallet_heartbeat_failed(
        &self,
        ctx: CallContext,
        x: [u8; 32],
        y: [u8; 32],
    ) -> BridgeResult<()> {
        let pkh = WalletPubKeyHash::from_ecdsa_coordinates(&x, &y);
        self.execute(|ledger, effects| {
            wallets::notify_heartbeat_failed(ledger, ctx.now, &pkh, effects)
        })
        .await
    }

    /// Report a wallet as too old or too small to keep.
    pub async fn notify_wallet_closeable(
        &self,
        ctx: CallContext,
        pkh: WalletPubKeyHash,
        main_utxo: Option<Utxo>,
    ) -> BridgeResult<()> {
        let params = &self.params.wallet;
        self.execute(|ledger, effects| {
            wallets::notify_closeable(ledger, params, ctx.now, &pkh, main_utxo.as_ref(), effects)
        })
        .await
    }

    /// Close a wallet whose closing period is over.
    pub async fn notify_wallet_closing_period_elapsed(
        &self,
        ctx: CallContext,
        pkh: WalletPubKeyHash,
    ) -> BridgeResult<()> {
        let params = &self.params.wallet;
        self.execute(|ledger, _| {
            wallets::notify_closing_period_elapsed(ledger, params, ctx.now, &pkh)
        })
        .await
    }

    /// Fraud callback: terminate a wallet.
    pub async fn terminate_wallet(
        &self,
        _ctx: CallContext,
        pkh: WalletPubKeyHash,
    ) -> BridgeResult<()> {
        self.execute(|ledger, effects| wallets::terminate(ledger, &pkh, effects))
            .await
    }

    // --------------------------------------------------------------- deposits

    /// Register a deposit funded by `funding_tx`. The sender is the depositor.
    pub async fn reveal_deposit(
        &self,
        ctx: CallContext,
        funding_tx: &BitcoinTxInfo,
        reveal: &DepositRevealInfo,
    ) -> BridgeResult<DepositKey> {
        let params = &self.params.deposit;
        let trusted = &self.trusted_vaults;
        self.execute(|ledger, _| {
            deposit::reveal_deposit(ledger, params, trusted, ctx.now, ctx.sender, funding_tx, reveal)
        })
        .await
    }

    /// Settle a sweep of revealed deposits. Returns the wallet's new main UTXO.
    pub async fn submit_deposit_sweep_proof(
        &self,
        ctx: CallContext,
        sweep_tx: &BitcoinTxInfo,
        proof: &SpvProof,
        main_utxo: Option<Utxo>,
        vault: Option<Address>,
    ) -> BridgeResult<Utxo> {
        self.verify_proof(&ctx, sweep_tx, proof).await?;
        let params = &self.params.deposit;
        self.execute(|ledger, effects| {
            sweep::submit_deposit_sweep_proof(
                ledger,
                params,
                ctx.now,
                sweep_tx,
                main_utxo.as_ref(),
                vault,
                effects,
            )
        })
        .await
    }

    // ------------------------------------------------------------ redemptions

    /// Request `amount` to be paid to `output_script` by wallet `pkh`. The
    /// sender is the redeemer.
    pub async fn request_redemption(
        &self,
        ctx: CallContext,
        pkh: WalletPubKeyHash,
        main_utxo: &Utxo,
        output_script: &Script,
        amount: u64,
    ) -> BridgeResult<RedemptionKey> {
        let params = &self.params.redemption;
        self.execute(|ledger, effects| {
            redemption::request_redemption(
                ledger,
                params,
                ctx.now,
                ctx.sender,
                &pkh,
                main_utxo,
                output_script,
                amount,
                effects,
            )
        })
        .await
    }

    /// Settle a redemption transaction paid from `main_utxo`.
    pub async fn submit_redemption_proof(
        &self,
        ctx: CallContext,
        redemption_tx: &BitcoinTxInfo,
        proof: &SpvProof,
        main_utxo: &Utxo,
        pkh: WalletPubKeyHash,
    ) -> BridgeResult<RedemptionSettlement> {
        self.verify_proof(&ctx, redemption_tx, proof).await?;
        let params = &self.params.redemption;
        self.execute(|ledger, effects| {
            redemption::submit_redemption_proof(ledger, params, redemption_tx, main_utxo, &pkh, effects)
        })
        .await
    }

    /// Report a redemption request the wallet did not pay in time.
    pub async fn notify_redemption_timeout(
        &self,
        ctx: CallContext,
        pkh: WalletPubKeyHash,
        members: &[u32],
        output_script: &Script,
    ) -> BridgeResult<()> {
        let params = &self.params.redemption;
        self.execute(|ledger, effects| {
            redemption::notify_redemption_timeout(
                ledger,
                params,
                ctx.now,
                ctx.sender,
                &pkh,
                members,
                output_script,
                effects,
            )
        })
        .await
    }

    // ----------------------------------------------------------- moving funds

    /// Commit to the wallets a MovingFunds wallet transfers to. The sender
    /// must be the member at `member_index` of `members`.
    pub async fn submit_moving_funds_commitment(
        &self,
        ctx: CallContext,
        pkh: WalletPubKeyHash,
        main_utxo: &Utxo,
        members: &[u32],
        member_index: usize,
        target_wallets: &[WalletPubKeyHash],
    ) -> BridgeResult<TargetWalletsCommitment> {
        let _guard = self.lock.lock().await;
        let mut ledger = self.load().await?;

        let wallet_id = ledger.registered_wallet(&pkh)?.ecdsa_wallet_id;
        let is_member = self
            .registry
            .is_wallet_member(wallet_id, members, ctx.sender, member_index)
            .await
            .map_err(BridgeError::Registry)?;
        if !is_member {
            return Err(BridgeError::NotWalletMember);
        }

        let commitment = moving_funds::submit_moving_funds_commitment(
            &mut ledger,
            &self.params.wallet,
            &pkh,
            main_utxo,
            target_wallets,
        )?;
        self.commit(&ledger, Effects::new()).await?;
        Ok(commitment)
    }

    /// Restart the moving funds timeout of a wallet with no live wallets to move to.
    pub async fn reset_moving_funds_timeout(
        &self,
        ctx: CallContext,
        pkh: WalletPubKeyHash,
    ) -> BridgeResult<()> {
        let params = &self.params.moving_funds;
        self.execute(|ledger, _| {
            moving_funds::reset_moving_funds_timeout(ledger, params, ctx.now, &pkh)
        })
        .await
    }

    /// Settle a moving funds transaction. The proof must carry a coinbase
    /// proof. Returns the keys of the created moved funds sweep requests.
    pub async fn submit_moving_funds_proof(
        &self,
        ctx: CallContext,
        moving_funds_tx: &BitcoinTxInfo,
        proof: &SpvProof,
        main_utxo: &Utxo,
        pkh: WalletPubKeyHash,
    ) -> BridgeResult<Vec<OutpointKey>> {
        self.verify_proof(&ctx, moving_funds_tx, proof).await?;
        if proof.coinbase.is_none() {
            return Err(BridgeError::CoinbaseProofRequired);
        }
        let params = &self.params.moving_funds;
        self.execute(|ledger, effects| {
            moving_funds::submit_moving_funds_proof(
                ledger,
                params,
                ctx.now,
                moving_funds_tx,
                main_utxo,
                &pkh,
                effects,
            )
        })
        .await
    }

    /// Report a wallet that did not move its funds in time.
    pub async fn notify_moving_funds_timeout(
        &self,
        ctx: CallContext,
        pkh: WalletPubKeyHash,
        members: &[u32],
    ) -> BridgeResult<()> {
        let params = &self.params.moving_funds;
        self.execute(|ledger, effects| {
            moving_funds::notify_moving_funds_timeout(
                ledger, params, ctx.now, ctx.sender, &pkh, members, effects,
            )
        })
        .await
    }

    /// Close a MovingFunds wallet whose balance is too small to move.
    pub async fn notify_moving_funds_below_dust(
        &self,
        ctx: CallContext,
        pkh: WalletPubKeyHash,
        main_utxo: &Utxo,
    ) -> BridgeResult<()> {
        let params = &self.params.moving_funds;
        self.execute(|ledger, effects| {
            moving_funds::notify_moving_funds_below_dust(
                ledger, params, ctx.now, &pkh, main_utxo, effects,
            )
        })
        .await
    }

    /// Settle a target wallet's sweep of a moved funds output. Returns the
    /// wallet's new main UTXO.
    pub async fn submit_moved_funds_sweep_proof(
        &self,
        ctx: CallContext,
        sweep_tx: &BitcoinTxInfo,
        proof: &SpvProof,
        main_utxo: Option<Utxo>,
    ) -> BridgeResult<Utxo> {
        self.verify_proof(&ctx, sweep_tx, proof).await?;
        self.execute(|ledger, _| {
            moved_funds::submit_moved_funds_sweep_proof(ledger, sweep_tx, main_utxo.as_ref())
        })
        .await
    }

    /// Report a moved funds output the target wallet did not sweep in time.
    pub async fn notify_moved_funds_sweep_timeout(
        &self,
        ctx: CallContext,
        moving_funds_tx_hash: Txid,
        moving_funds_tx_output_index: u32,
        members: &[u32],
    ) -> BridgeResult<()> {
        let params = &self.params.moving_funds;
        self.execute(|ledger, effects| {
            moved_funds::notify_moved_funds_sweep_timeout(
                ledger,
                params,
                ctx.now,
                ctx.sender,
                &moving_funds_tx_hash,
                moving_funds_tx_output_index,
                members,
                effects,
            )
        })
        .await
    }

    // -------------------------------------------------------------- proposals

    /// Check a deposit sweep proposal before signing.
    pub async fn validate_deposit_sweep_proposal(
        &self,
        now: u32,
        proposal: &DepositSweepProposal,
        extra_info: &[DepositExtraInfo],
    ) -> BridgeResult<()> {
        let ledger = self.load().await?;
        validator::validate_deposit_sweep_proposal(&ledger, &self.params, now, proposal, extra_info)?;
        Ok(())
    }

    /// Check a redemption proposal before signing.
    pub async fn validate_redemption_proposal(
        &self,
        now: u32,
        proposal: &RedemptionProposal,
    ) -> BridgeResult<()> {
        let ledger = self.load().await?;
        validator::validate_redemption_proposal(&ledger, &self.params, now, proposal)?;
        Ok(())
    }

    /// Check a moving funds proposal before signing.
    pub async fn validate_moving_funds_proposal(
        &self,
        proposal: &MovingFundsProposal,
        main_utxo: &Utxo,
    ) -> BridgeResult<()> {
        let ledger = self.load().await?;
        validator::validate_moving_funds_proposal(&ledger, &self.params, proposal, main_utxo)?;
        Ok(())
    }

    /// Check a heartbeat proposal before signing.
    pub fn validate_heartbeat_proposal(&self, proposal: &HeartbeatProposal) -> BridgeResult<()> {
        validator::validate_heartbeat_proposal(proposal)?;
        Ok(())
    }

    // ------------------------------------------------------------------ views

    /// Snapshot of the stored ledger.
    pub async fn ledger(&self) -> BridgeResult<Ledger> {
        self.load().await
    }

    /// Wallet record, if registered.
    pub async fn wallet(&self, pkh: &WalletPubKeyHash) -> BridgeResult<Option<Wallet>> {
        Ok(self.load().await?.wallets.remove(pkh))
    }

    /// Wallet currently receiving deposits.
    pub async fn active_wallet(&self) -> BridgeResult<Option<WalletPubKeyHash>> {
        Ok(self.load().await?.active_wallet)
    }

    /// Number of Live wallets.
    pub async fn live_wallets_count(&self) -> BridgeResult<u32> {
        Ok(self.load().await?.live_wallets_count)
    }

    /// Revealed deposit, swept or not.
    pub async fn deposit(&self, key: &DepositKey) -> BridgeResult<Option<DepositRequest>> {
        Ok(self.load().await?.deposits.remove(key))
    }

    /// Pending redemption request.
    pub async fn pending_redemption(
        &self,
        key: &RedemptionKey,
    ) -> BridgeResult<Option<RedemptionRequest>> {
        Ok(self.load().await?.pending_redemptions.remove(key))
    }

    /// Timed-out redemption request.
    pub async fn timed_out_redemption(
        &self,
        key: &RedemptionKey,
    ) -> BridgeResult<Option<RedemptionRequest>> {
        Ok(self.load().await?.timed_out_redemptions.remove(key))
    }

    /// Moved funds sweep request for a moving funds output.
    pub async fn moved_funds_sweep_request(
        &self,
        moving_funds_tx_hash: &Txid,
        output_index: u32,
    ) -> BridgeResult<Option<MovedFundsSweepRequest>> {
        let key = OutpointKey::new(moving_funds_tx_hash, output_index);
        Ok(self.load().await?.moved_funds_sweep_requests.remove(&key))
    }

    /// True if `utxo` was a main UTXO and has been spent.
    pub async fn is_main_utxo_spent(&self, utxo: &Utxo) -> BridgeResult<bool> {
        Ok(self.load().await?.is_main_utxo_spent(utxo))
    }
}
