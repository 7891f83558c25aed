//! Bitcoin transaction codec: vector parsing, transaction hash and output
//! script classification.
use crate::error::TxError;
use crate::types::{BitcoinTxInfo, WalletPubKeyHash};
use bitcoin::{
    consensus,
    hashes::{sha256d, Hash},
    Script, TxIn, TxOut, Txid,
};

/// A submitted transaction with decoded vectors.
#[derive(Clone, Debug)]
pub struct ParsedTx {
    /// Legacy transaction hash, internal byte order.
    pub hash: Txid,
    /// Decoded inputs, without witnesses.
    pub inputs: Vec<TxIn>,
    /// Decoded outputs.
    pub outputs: Vec<TxOut>,
}

impl BitcoinTxInfo {
    /// `sha256d(version || inputs || outputs || locktime)`.
    pub fn hash(&self) -> Txid {
        let mut raw =
            Vec::with_capacity(8 + self.input_vector.len() + self.output_vector.len());
        raw.extend_from_slice(&self.version);
        raw.extend_from_slice(&self.input_vector);
        raw.extend_from_slice(&self.output_vector);
        raw.extend_from_slice(&self.locktime);
        Txid::from_raw_hash(sha256d::Hash::hash(&raw))
    }

    /// Decodes the input vector. It must hold at least one input and no trailing bytes.
    pub fn inputs(&self) -> Result<Vec<TxIn>, TxError> {
        let inputs: Vec<TxIn> = consensus::deserialize(&self.input_vector)
            .map_err(|_| TxError::InvalidInputVector)?;
        if inputs.is_empty() {
            return Err(TxError::InvalidInputVector);
        }
        Ok(inputs)
    }

    /// Decodes the output vector. It must hold at least one output and no trailing bytes.
    pub fn outputs(&self) -> Result<Vec<TxOut>, TxError> {
        let outputs: Vec<TxOut> = consensus::deserialize(&self.output_vector)
            .map_err(|_| TxError::InvalidOutputVector)?;
        if outputs.is_empty() {
            return Err(TxError::InvalidOutputVector);
        }
        Ok(outputs)
    }

    /// Decodes both vectors and computes the hash.
    pub fn parse(&self) -> Result<ParsedTx, TxError> {
        Ok(ParsedTx {
            inputs: self.inputs()?,
            outputs: self.outputs()?,
            hash: self.hash(),
        })
    }

    /// Output at `index`.
    pub fn output_at(&self, index: u32) -> Result<TxOut, TxError> {
        let outputs = self.outputs()?;
        let count = outputs.len();
        outputs
            .into_iter()
            .nth(index as usize)
            .ok_or(TxError::OutputIndexOutOfRange { index, count })
    }
}

impl From<&bitcoin::Transaction> for BitcoinTxInfo {
    fn from(tx: &bitcoin::Transaction) -> Self {
        Self {
            version: tx.version.0.to_le_bytes(),
            input_vector: consensus::serialize(&tx.input),
            output_vector: consensus::serialize(&tx.output),
            locktime: tx.lock_time.to_consensus_u32().to_le_bytes(),
        }
    }
}

/// Standard output script types, with the hash each one pays to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputScript {
    /// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
    P2pkh([u8; 20]),
    /// `OP_0 <20>`
    P2wpkh([u8; 20]),
    /// `OP_HASH160 <20> OP_EQUAL`
    P2sh([u8; 20]),
    /// `OP_0 <32>`
    P2wsh([u8; 32]),
    /// Provably unspendable data carrier.
    OpReturn,
    /// Anything else.
    NonStandard,
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

impl OutputScript {
    /// Classifies a locking script.
    pub fn classify(script: &Script) -> Self {
        let bytes = script.as_bytes();
        if script.is_p2pkh() {
            Self::P2pkh(array(&bytes[3..23]))
        } else if script.is_p2wpkh() {
            Self::P2wpkh(array(&bytes[2..22]))
        } else if script.is_p2sh() {
            Self::P2sh(array(&bytes[2..22]))
        } else if script.is_p2wsh() {
            Self::P2wsh(array(&bytes[2..34]))
        } else if script.is_op_return() {
            Self::OpReturn
        } else {
            Self::NonStandard
        }
    }

    /// True for the four types a redeemer may be paid to.
    pub fn is_standard_payment(&self) -> bool {
        matches!(
            self,
            Self::P2pkh(_) | Self::P2wpkh(_) | Self::P2sh(_) | Self::P2wsh(_)
        )
    }

    /// The 20-byte hash for P2PKH, P2WPKH and P2SH.
    pub fn hash20(&self) -> Option<[u8; 20]> {
        match self {
            Self::P2pkh(h) | Self::P2wpkh(h) | Self::P2sh(h) => Some(*h),
            _ => None,
        }
    }

    /// The wallet this output pays to as a key hash, if it is P2PKH or P2WPKH.
    pub fn key_hash(&self) -> Option<WalletPubKeyHash> {
        match self {
            Self::P2pkh(h) | Self::P2wpkh(h) => Some(WalletPubKeyHash(*h)),
            _ => None,
        }
    }
}
