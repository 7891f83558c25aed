#![allow(dead_code)]

use async_trait::async_trait;
use bitcoin::{
    absolute::LockTime,
    block::{Header as BlockHeader, Version as BlockVersion},
    consensus,
    hash_types::TxMerkleNode,
    hashes::{sha256, sha256d, Hash},
    pow::CompactTarget,
    transaction::Version,
    Amount, BlockHash, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};
use bridge_settlement::ledger::RegistryCall;
use bridge_settlement::prelude::*;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const TREASURY: Address = Address([0xee; 20]);
pub const MAINTAINER: Address = Address([0x5b; 20]);

pub type TestBridge = Bridge<MemStore, MockBank, MockRegistry, MockRelay>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// ------- Minimal in-memory Store -------
#[derive(Clone, Default)]
pub struct MemStore {
    ledger: Arc<Mutex<Ledger>>,
}

impl MemStore {
    pub fn with_ledger(ledger: Ledger) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(ledger)),
        }
    }

    pub fn snapshot(&self) -> Ledger {
        self.ledger.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn load_ledger(&self) -> anyhow::Result<Ledger> {
        Ok(self.ledger.lock().unwrap().clone())
    }
    async fn save_ledger(&self, ledger: &Ledger) -> anyhow::Result<()> {
        *self.ledger.lock().unwrap() = ledger.clone();
        Ok(())
    }
}

/// ------- Bank keeping plain balances; the bridge holds `BRIDGE` -------
pub const BRIDGE: Address = Address([0xb0; 20]);

#[derive(Clone, Default)]
pub struct MockBank {
    balances: Arc<Mutex<BTreeMap<Address, u64>>>,
    vault_calls: Arc<Mutex<Vec<(Address, Vec<(Address, u64)>)>>>,
}

impl MockBank {
    pub fn fund(&self, who: Address, amount: u64) {
        *self.balances.lock().unwrap().entry(who).or_default() += amount;
    }

    pub fn balance(&self, who: Address) -> u64 {
        self.balances.lock().unwrap().get(&who).copied().unwrap_or(0)
    }

    pub fn vault_calls(&self) -> Vec<(Address, Vec<(Address, u64)>)> {
        self.vault_calls.lock().unwrap().clone()
    }
}

fn debit(balances: &mut BTreeMap<Address, u64>, who: Address, amount: u64) -> anyhow::Result<()> {
    let balance = balances.entry(who).or_default();
    anyhow::ensure!(*balance >= amount, "{who} holds {balance}, needs {amount}");
    *balance -= amount;
    Ok(())
}

fn credit(balances: &mut BTreeMap<Address, u64>, who: Address, amount: u64) {
    *balances.entry(who).or_default() += amount;
}

#[async_trait]
impl Bank for MockBank {
    async fn apply(&self, ops: &[BalanceOp]) -> anyhow::Result<()> {
        let mut next = self.balances.lock().unwrap().clone();
        let mut notified = Vec::new();
        for op in ops {
            match op {
                BalanceOp::TransferFrom { from, amount } => {
                    debit(&mut next, *from, *amount)?;
                    credit(&mut next, BRIDGE, *amount);
                }
                BalanceOp::Transfer { to, amount } => {
                    debit(&mut next, BRIDGE, *amount)?;
                    credit(&mut next, *to, *amount);
                }
                BalanceOp::Decrease { amount } => debit(&mut next, BRIDGE, *amount)?,
                BalanceOp::Increase { recipients } => {
                    for (who, amount) in recipients {
                        credit(&mut next, *who, *amount);
                    }
                }
                BalanceOp::IncreaseAndCall { vault, depositors } => {
                    let total = depositors.iter().map(|(_, a)| a).sum();
                    credit(&mut next, *vault, total);
                    notified.push((*vault, depositors.clone()));
                }
            }
        }
        *self.balances.lock().unwrap() = next;
        self.vault_calls.lock().unwrap().extend(notified);
        Ok(())
    }
}

/// ------- Registry recording calls; operators map to member ids -------
#[derive(Clone, Default)]
pub struct MockRegistry {
    calls: Arc<Mutex<Vec<RegistryCall>>>,
    operators: Arc<Mutex<BTreeMap<Address, u32>>>,
    refuse_seize: Arc<Mutex<bool>>,
}

impl MockRegistry {
    pub fn add_operator(&self, operator: Address, member_id: u32) {
        self.operators.lock().unwrap().insert(operator, member_id);
    }

    /// Makes every following `seize` fail until called again with `false`.
    pub fn refuse_seize(&self, refuse: bool) {
        *self.refuse_seize.lock().unwrap() = refuse;
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EcdsaWalletRegistry for MockRegistry {
    async fn request_new_wallet(&self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(RegistryCall::RequestNewWallet);
        Ok(())
    }
    async fn seize(
        &self,
        amount: u128,
        reward_multiplier: u32,
        notifier: Address,
        wallet_id: EcdsaWalletId,
        members: &[u32],
    ) -> anyhow::Result<()> {
        anyhow::ensure!(!*self.refuse_seize.lock().unwrap(), "seize refused");
        self.calls.lock().unwrap().push(RegistryCall::Seize {
            amount,
            reward_multiplier,
            notifier,
            wallet_id,
            members: members.to_vec(),
        });
        Ok(())
    }
    async fn close_wallet(&self, wallet_id: EcdsaWalletId) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(RegistryCall::CloseWallet { wallet_id });
        Ok(())
    }
    async fn is_wallet_member(
        &self,
        _wallet_id: EcdsaWalletId,
        members: &[u32],
        operator: Address,
        member_index: usize,
    ) -> anyhow::Result<bool> {
        let id = self.operators.lock().unwrap().get(&operator).copied();
        Ok(id.is_some() && members.get(member_index).copied() == id)
    }
}

/// ------- Relay with fixed epoch difficulties -------
#[derive(Clone, Copy, Default)]
pub struct MockRelay {
    pub current: u128,
    pub previous: u128,
}

impl MockRelay {
    pub fn at(difficulty: u128) -> Self {
        Self {
            current: difficulty,
            previous: difficulty,
        }
    }
}

#[async_trait]
impl Relay for MockRelay {
    async fn current_epoch_difficulty(&self) -> anyhow::Result<u128> {
        Ok(self.current)
    }
    async fn prev_epoch_difficulty(&self) -> anyhow::Result<u128> {
        Ok(self.previous)
    }
}

pub struct Harness {
    pub store: MemStore,
    pub bank: MockBank,
    pub registry: MockRegistry,
}

impl Harness {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            store: MemStore::with_ledger(ledger),
            bank: MockBank::default(),
            registry: MockRegistry::default(),
        }
    }

    pub fn bridge(&self, relay: MockRelay, params: BridgeParams) -> anyhow::Result<TestBridge> {
        Ok(Bridge::new(
            self.store.clone(),
            self.bank.clone(),
            self.registry.clone(),
            relay,
            TREASURY,
        )
        .with_params(params)?
        .with_spv_maintainers([MAINTAINER]))
    }
}

pub fn unhex(s: &str) -> Vec<u8> {
    hex::decode(s.trim_start_matches("0x")).unwrap()
}

/// ------- Regtest-difficulty blocks built at runtime -------

/// A transaction spending `prev` into `outputs`.
pub fn spend(prev: OutPoint, outputs: Vec<TxOut>) -> Transaction {
    spend_many(vec![prev], outputs)
}

pub fn spend_many(prevs: Vec<OutPoint>, outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: prevs
            .into_iter()
            .map(|previous_output| TxIn {
                previous_output,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs,
    }
}

pub fn p2wpkh_out(pkh: &WalletPubKeyHash, value: u64) -> TxOut {
    TxOut {
        value: Amount::from_sat(value),
        script_pubkey: ScriptBuf::new_p2wpkh(&bitcoin::WPubkeyHash::from_byte_array(pkh.0)),
    }
}

pub fn p2pkh_out(pkh: &WalletPubKeyHash, value: u64) -> TxOut {
    TxOut {
        value: Amount::from_sat(value),
        script_pubkey: ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array(pkh.0)),
    }
}

fn coinbase(height: u8) -> Transaction {
    let mut cb = spend(
        OutPoint::null(),
        vec![TxOut {
            value: Amount::from_sat(50 * 100_000_000),
            script_pubkey: ScriptBuf::new(),
        }],
    );
    cb.input[0].script_sig = ScriptBuf::from_bytes(vec![0x01, height]);
    cb
}

fn mine(prev: BlockHash, merkle_root: [u8; 32], time: u32) -> BlockHeader {
    let mut header = BlockHeader {
        version: BlockVersion::TWO,
        prev_blockhash: prev,
        merkle_root: TxMerkleNode::from_byte_array(merkle_root),
        time,
        bits: CompactTarget::from_consensus(0x207f_ffff),
        nonce: 0,
    };
    while !bridge_settlement::spv::hash_below_target(&header.block_hash(), header.target()) {
        header.nonce += 1;
    }
    header
}

/// Proof of `tx` mined as the second transaction of a fresh regtest block,
/// buried under `confirmations - 1` more blocks, with a coinbase proof.
/// Regtest headers have zero mainnet difficulty, so the relay must report 0.
pub fn regtest_proof(tx: &Transaction, confirmations: usize) -> SpvProof {
    let cb = coinbase(1);
    let cb_txid = cb.compute_txid().to_byte_array();
    let txid = tx.compute_txid().to_byte_array();

    let mut pair = [0u8; 64];
    pair[..32].copy_from_slice(&cb_txid);
    pair[32..].copy_from_slice(&txid);
    let root = sha256d::Hash::hash(&pair).to_byte_array();

    let mut headers = vec![mine(BlockHash::all_zeros(), root, 1_700_000_000)];
    for i in 1..confirmations {
        let prev = headers[i - 1].block_hash();
        headers.push(mine(prev, [i as u8; 32], 1_700_000_000 + i as u32 * 600));
    }

    SpvProof {
        merkle_proof: cb_txid.to_vec(),
        tx_index_in_block: 1,
        bitcoin_headers: headers.iter().flat_map(|h| consensus::serialize(h)).collect(),
        coinbase: Some(CoinbaseProof {
            preimage: sha256::Hash::hash(&consensus::serialize(&cb)).to_byte_array(),
            merkle_proof: txid.to_vec(),
        }),
    }
}
