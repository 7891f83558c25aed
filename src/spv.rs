//! SPV proof verification: merkle inclusion of a transaction and the proof of
//! work of the header chain that buries it.
//!
//! Everything here is pure. The relay's epoch difficulties come in as an
//! [`EpochDifficulty`] value fetched by the caller.
use crate::error::SpvError;
use crate::types::SpvProof;
use bitcoin::{
    block::Header,
    consensus,
    hashes::{sha256, sha256d, Hash},
    pow::Target,
    BlockHash, Network, Txid,
};
use bitcoin::params::Params;

/// Size of a serialized block header.
pub const HEADER_LEN: usize = 80;

/// Difficulties reported by the relay for the current and previous epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct EpochDifficulty {
    /// Current epoch difficulty.
    pub current: u128,
    /// Previous epoch difficulty.
    pub previous: u128,
}

/// Verifies that `tx_hash` is included in the first block of `proof` and that
/// the header chain carries at least `factor` blocks worth of work at the
/// relay difficulty.
pub fn verify_proof(
    tx_hash: &Txid,
    proof: &SpvProof,
    difficulty: EpochDifficulty,
    factor: u64,
) -> Result<(), SpvError> {
    let headers = decode_headers(&proof.bitcoin_headers)?;
    let merkle_root = headers[0].merkle_root.to_byte_array();

    if let Some(coinbase) = &proof.coinbase {
        if coinbase.merkle_proof.len() != proof.merkle_proof.len() {
            return Err(SpvError::TxNotOnSameLevelAsCoinbase);
        }
    }

    if !prove(
        tx_hash.to_byte_array(),
        merkle_root,
        &proof.merkle_proof,
        proof.tx_index_in_block,
    ) {
        return Err(SpvError::InvalidMerkleProof);
    }

    if let Some(coinbase) = &proof.coinbase {
        let coinbase_hash = sha256::Hash::hash(&coinbase.preimage).to_byte_array();
        if !prove(coinbase_hash, merkle_root, &coinbase.merkle_proof, 0) {
            return Err(SpvError::InvalidCoinbaseMerkleProof);
        }
    }

    evaluate_proof_difficulty(&headers, difficulty, factor).map(|_| ())
}

/// Splits a concatenated header chain into headers.
pub fn decode_headers(raw: &[u8]) -> Result<Vec<Header>, SpvError> {
    let length = raw.len();
    if length == 0 || length % HEADER_LEN != 0 {
        return Err(SpvError::InvalidHeaderChainLength { length });
    }
    raw.chunks_exact(HEADER_LEN)
        .map(|chunk| {
            consensus::deserialize::<Header>(chunk)
                .map_err(|_| SpvError::InvalidHeaderChainLength { length })
        })
        .collect()
}

/// Difficulty of a header relative to the mainnet difficulty-1 target.
pub fn header_difficulty(header: &Header) -> u128 {
    let target = header.target();
    if target == Target::ZERO {
        return 0;
    }
    target.difficulty(Params::new(Network::Bitcoin))
}

/// True if `hash`, read as a little-endian integer, is strictly below `target`.
pub fn hash_below_target(hash: &BlockHash, target: Target) -> bool {
    Target::from_le_bytes(hash.to_byte_array()) < target
}

/// Checks chain continuity and per-header work, returning the summed difficulty.
pub fn validate_header_chain(headers: &[Header]) -> Result<u128, SpvError> {
    let mut total: u128 = 0;
    for (index, header) in headers.iter().enumerate() {
        if index > 0 && header.prev_blockhash != headers[index - 1].block_hash() {
            return Err(SpvError::InvalidHeaderChain { index });
        }
        if !hash_below_target(&header.block_hash(), header.target()) {
            return Err(SpvError::InsufficientWorkInHeader { index });
        }
        total = total.saturating_add(header_difficulty(header));
    }
    Ok(total)
}

/// Checks the chain against the relay and returns the observed accumulated difficulty.
pub fn evaluate_proof_difficulty(
    headers: &[Header],
    difficulty: EpochDifficulty,
    factor: u64,
) -> Result<u128, SpvError> {
    let requested = headers
        .first()
        .map(header_difficulty)
        .ok_or(SpvError::InvalidHeaderChainLength { length: 0 })?;

    if requested != difficulty.current && requested != difficulty.previous {
        return Err(SpvError::NotAtCurrentOrPreviousDifficulty {
            observed: requested,
            current: difficulty.current,
            previous: difficulty.previous,
        });
    }

    let observed = validate_header_chain(headers)?;
    let required = requested.saturating_mul(u128::from(factor));
    if observed < required {
        return Err(SpvError::InsufficientAccumulatedDifficulty { observed, required });
    }
    Ok(observed)
}

/// Folds `leaf` up a merkle path of 32-byte nodes and compares with `root`.
///
/// Hashes are in internal byte order. At each level the low bit of `index`
/// says whether the running hash is the right (1) or left (0) child.
pub fn prove(leaf: [u8; 32], root: [u8; 32], path: &[u8], index: u32) -> bool {
    if path.is_empty() {
        return index == 0 && leaf == root;
    }
    if path.len() % 32 != 0 {
        return false;
    }

    let mut current = leaf;
    let mut index = index;
    let mut buf = [0u8; 64];
    for node in path.chunks_exact(32) {
        if index & 1 == 1 {
            buf[..32].copy_from_slice(node);
            buf[32..].copy_from_slice(&current);
        } else {
            buf[..32].copy_from_slice(&current);
            buf[32..].copy_from_slice(node);
        }
        current = sha256d::Hash::hash(&buf).to_byte_array();
        index >>= 1;
    }
    current == root
}
