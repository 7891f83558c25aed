//! Identifiers, hash keys and the wire-level parameter shapes shared by all engines.
//!
//! Every fixed-size byte identifier is a newtype that prints and serializes as a
//! `0x`-prefixed hex string, so the ledger can be persisted as JSON with these
//! types as map keys.
use bitcoin::hashes::{hash160, sha256, Hash};
use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

macro_rules! hex_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// All-zero value.
            pub const ZERO: Self = Self([0u8; $len]);

            /// Builds the value from a slice of exactly the right length.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                <[u8; $len]>::try_from(bytes).ok().map(Self)
            }

            /// Raw bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let mut out = [0u8; $len];
                hex::decode_to_slice(s, &mut out)?;
                Ok(Self(out))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_newtype!(
    /// Host-chain account address (depositor, redeemer, vault, treasury, maintainer).
    Address,
    20
);

hex_newtype!(
    /// 20-byte hash160 of a wallet's compressed ECDSA public key.
    WalletPubKeyHash,
    20
);

hex_newtype!(
    /// Identifier of the signing group in the ECDSA wallet registry.
    EcdsaWalletId,
    32
);

hex_newtype!(
    /// Key of a redemption request: `sha256(sha256(script) || wallet_pkh)`.
    RedemptionKey,
    32
);

hex_newtype!(
    /// Key derived from a Bitcoin outpoint: `sha256(txid || index_be)`.
    ///
    /// Identifies deposits, spent main UTXOs and moved funds sweep requests.
    OutpointKey,
    32
);

hex_newtype!(
    /// Commitment to a main UTXO: `sha256(txid || index_be || value_be)`.
    UtxoCommitment,
    32
);

hex_newtype!(
    /// Commitment to an ordered list of moving funds target wallets.
    TargetWalletsCommitment,
    32
);

/// Deposits are looked up by their funding outpoint.
pub type DepositKey = OutpointKey;

/// Moved funds sweep requests are looked up by the moving funds outpoint.
pub type MovedFundsSweepKey = OutpointKey;

impl WalletPubKeyHash {
    /// Derives the wallet PKH from the affine coordinates of its ECDSA public key.
    pub fn from_ecdsa_coordinates(x: &[u8; 32], y: &[u8; 32]) -> Self {
        let mut compressed = [0u8; 33];
        compressed[0] = 0x02 | (y[31] & 1);
        compressed[1..].copy_from_slice(x);
        Self(hash160::Hash::hash(&compressed).to_byte_array())
    }
}

impl OutpointKey {
    /// Key for `txid:index`.
    pub fn new(txid: &Txid, index: u32) -> Self {
        let mut buf = Vec::with_capacity(36);
        buf.extend_from_slice(txid.as_byte_array());
        buf.extend_from_slice(&index.to_be_bytes());
        Self(sha256::Hash::hash(&buf).to_byte_array())
    }

    /// Key for a consensus outpoint.
    pub fn from_outpoint(outpoint: &OutPoint) -> Self {
        Self::new(&outpoint.txid, outpoint.vout)
    }
}

impl RedemptionKey {
    /// Key of the request paying `script` out of `wallet`.
    pub fn new(wallet: &WalletPubKeyHash, script: &[u8]) -> Self {
        let script_hash = sha256::Hash::hash(script);
        let mut buf = Vec::with_capacity(52);
        buf.extend_from_slice(script_hash.as_byte_array());
        buf.extend_from_slice(&wallet.0);
        Self(sha256::Hash::hash(&buf).to_byte_array())
    }
}

impl TargetWalletsCommitment {
    /// Commitment over the concatenated target wallet PKHs, order preserved.
    pub fn new(targets: &[WalletPubKeyHash]) -> Self {
        let buf: Vec<u8> = targets.iter().flat_map(|t| t.0).collect();
        Self(sha256::Hash::hash(&buf).to_byte_array())
    }
}

/// A wallet's main UTXO as claimed by a caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Transaction hash in internal byte order.
    pub tx_hash: Txid,
    /// Output index within that transaction.
    pub output_index: u32,
    /// Output value in satoshi.
    pub value: u64,
}

impl Utxo {
    /// Creates a UTXO.
    pub fn new(tx_hash: Txid, output_index: u32, value: u64) -> Self {
        Self {
            tx_hash,
            output_index,
            value,
        }
    }

    /// Hash commitment stored in the wallet record.
    pub fn commitment(&self) -> UtxoCommitment {
        let mut buf = Vec::with_capacity(44);
        buf.extend_from_slice(self.tx_hash.as_byte_array());
        buf.extend_from_slice(&self.output_index.to_be_bytes());
        buf.extend_from_slice(&self.value.to_be_bytes());
        UtxoCommitment(sha256::Hash::hash(&buf).to_byte_array())
    }

    /// Key used by the spent main UTXO set.
    pub fn outpoint_key(&self) -> OutpointKey {
        OutpointKey::new(&self.tx_hash, self.output_index)
    }

    /// True if `outpoint` spends this UTXO.
    pub fn is_spent_by(&self, outpoint: &OutPoint) -> bool {
        outpoint.txid == self.tx_hash && outpoint.vout == self.output_index
    }
}

/// Raw transaction parts as they are submitted with a proof.
///
/// The input and output vectors carry their compact-size count prefix and no
/// witness data, so the transaction hash is the legacy txid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitcoinTxInfo {
    /// 4-byte little-endian version.
    pub version: [u8; 4],
    /// Count-prefixed inputs.
    pub input_vector: Vec<u8>,
    /// Count-prefixed outputs.
    pub output_vector: Vec<u8>,
    /// 4-byte little-endian locktime.
    pub locktime: [u8; 4],
}

/// Proof that the coinbase of the proven block commits to a known preimage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoinbaseProof {
    /// `sha256` preimage of the coinbase transaction hash.
    pub preimage: [u8; 32],
    /// Merkle path of the coinbase, concatenated 32-byte nodes.
    pub merkle_proof: Vec<u8>,
}

/// SPV inclusion proof of a transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpvProof {
    /// Merkle path of the transaction, concatenated 32-byte nodes.
    pub merkle_proof: Vec<u8>,
    /// Position of the transaction in its block.
    pub tx_index_in_block: u32,
    /// Concatenated 80-byte headers, starting with the block holding the transaction.
    pub bitcoin_headers: Vec<u8>,
    /// Coinbase commitment, required by moving funds proofs.
    pub coinbase: Option<CoinbaseProof>,
}

/// Caller and block timestamp of one bridge call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    /// Account that submitted the call.
    pub sender: Address,
    /// Block timestamp, seconds since the epoch.
    pub now: u32,
}

impl CallContext {
    /// Context for `sender` at time `now`.
    pub fn new(sender: Address, now: u32) -> Self {
        Self { sender, now }
    }
}
