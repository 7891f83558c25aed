//! # Error types
//!
//! Every precondition of every bridge operation has its own variant, so callers
//! can tell failures apart without matching on messages. [`BridgeError::kind`]
//! groups the variants into the failure classes a maintainer reacts to.

use crate::ledger::WalletState;
use crate::types::{Address, WalletPubKeyHash};
use thiserror::Error;

/// Failures decoding the raw transaction vectors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    /// Empty, truncated or over-long input vector.
    #[error("Invalid input vector provided")]
    InvalidInputVector,

    /// Empty, truncated or over-long output vector.
    #[error("Invalid output vector provided")]
    InvalidOutputVector,

    /// An output index points past the end of the output vector.
    #[error("Output index {index} out of range, transaction has {count} outputs")]
    OutputIndexOutOfRange {
        /// Requested index.
        index: u32,
        /// Number of outputs in the transaction.
        count: usize,
    },
}

/// Failures of the SPV proof verifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpvError {
    /// Header chain is empty or not a multiple of 80 bytes.
    #[error("Invalid length of the headers chain: {length} bytes")]
    InvalidHeaderChainLength {
        /// Byte length of the submitted chain.
        length: usize,
    },

    /// A header does not point to its predecessor.
    #[error("Invalid headers chain at header {index}")]
    InvalidHeaderChain {
        /// Position of the offending header.
        index: usize,
    },

    /// A header hash is above its own target.
    #[error("Insufficient work in header {index}")]
    InsufficientWorkInHeader {
        /// Position of the offending header.
        index: usize,
    },

    /// The first header is not at the relay's current or previous epoch difficulty.
    #[error("Not at current or previous difficulty: header {observed}, current {current}, previous {previous}")]
    NotAtCurrentOrPreviousDifficulty {
        /// Difficulty of the first header.
        observed: u128,
        /// Relay's current epoch difficulty.
        current: u128,
        /// Relay's previous epoch difficulty.
        previous: u128,
    },

    /// The chain does not bury the transaction deep enough.
    #[error("Insufficient accumulated difficulty in header chain: observed {observed}, required {required}")]
    InsufficientAccumulatedDifficulty {
        /// Sum of the header difficulties.
        observed: u128,
        /// Requested difficulty times the proof factor.
        required: u128,
    },

    /// The merkle path does not reach the block's merkle root.
    #[error("Tx merkle proof is not valid for provided header and tx hash")]
    InvalidMerkleProof,

    /// Transaction and coinbase paths have different depths.
    #[error("Tx not on same level of merkle tree as coinbase")]
    TxNotOnSameLevelAsCoinbase,

    /// The coinbase path does not reach the block's merkle root.
    #[error("Coinbase merkle proof is not valid for provided header and hash")]
    InvalidCoinbaseMerkleProof,
}

/// Reasons an off-chain proposal is rejected. The message is the reason.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposalError {
    #[error("Wallet is not in Live state")]
    WalletNotLive,
    #[error("Sweep below the min size")]
    SweepBelowMinSize,
    #[error("Sweep exceeds the max size")]
    SweepExceedsMaxSize,
    #[error("Each deposit key must have matching extra data")]
    DepositExtraDataMismatch,
    #[error("Proposed transaction fee cannot be zero")]
    ZeroFee,
    #[error("Proposed transaction fee is too high")]
    FeeTooHigh,
    #[error("Deposit not revealed")]
    DepositNotRevealed,
    #[error("Deposit min age not achieved yet")]
    DepositMinAgeNotAchieved,
    #[error("Deposit already swept")]
    DepositAlreadySwept,
    #[error("Extra info funding tx hash does not match")]
    FundingTxHashMismatch,
    #[error("Extra info funding output script does not match")]
    FundingOutputScriptMismatch,
    #[error("Deposit refund safety margin is not preserved")]
    RefundSafetyMarginNotPreserved,
    #[error("Deposit controlled by different wallet")]
    DepositControlledByDifferentWallet,
    #[error("Deposit targets different vault")]
    DepositTargetsDifferentVault,
    #[error("Duplicated deposit")]
    DuplicatedDeposit,
    #[error("Redemption below the min size")]
    RedemptionBelowMinSize,
    #[error("Redemption exceeds the max size")]
    RedemptionExceedsMaxSize,
    #[error("Not a pending redemption request")]
    NotPendingRedemption,
    #[error("Redemption request min age not achieved yet")]
    RedemptionMinAgeNotAchieved,
    #[error("Redemption request timeout safety margin is not preserved")]
    RedemptionTimeoutSafetyMarginNotPreserved,
    #[error("Proposed transaction per-request fee share is too high")]
    PerRequestFeeShareTooHigh,
    #[error("Duplicated request")]
    DuplicatedRequest,
    #[error("Source wallet is not in MovingFunds state")]
    SourceWalletNotMovingFunds,
    #[error("Target wallets commitment is not submitted")]
    TargetWalletsCommitmentNotSubmitted,
    #[error("Target wallets do not match target wallets commitment hash")]
    TargetWalletsMismatch,
    #[error("Invalid wallet main UTXO data")]
    InvalidMainUtxo,
    #[error("Source wallet BTC balance is below the moving funds dust threshold")]
    BalanceBelowMovingFundsDust,
    #[error("Not a valid heartbeat message")]
    InvalidHeartbeatMessage,
    #[error("Funding transaction is malformed: {0}")]
    MalformedFundingTx(#[from] TxError),
}

/// Failure class of a [`BridgeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed transaction vectors, scripts or header chains.
    Structural,
    /// Valid shape but not enough proof; may pass once more blocks accrue.
    ProofInsufficiency,
    /// Ledger state does not allow the call right now.
    StatePrecondition,
    /// Amounts, fees or value bands are wrong.
    Economic,
    /// Caller may not perform the call.
    Authorization,
    /// A collaborator (bank, registry, relay, store) failed.
    Collaborator,
}

/// Every way a bridge operation can fail.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Tx(#[from] TxError),

    #[error(transparent)]
    Spv(#[from] SpvError),

    #[error(transparent)]
    Proposal(#[from] ProposalError),

    #[error("Moving funds proof must carry a coinbase proof")]
    CoinbaseProofRequired,

    // -- authorization --
    #[error("Caller {0} is not an authorized SPV maintainer")]
    NotSpvMaintainer(Address),

    #[error("Caller is not a member of the source wallet")]
    NotWalletMember,

    #[error("Vault {0} is not trusted")]
    VaultNotTrusted(Address),

    // -- wallet state --
    #[error("Wallet {wallet} must be in {expected} state, found {actual:?}")]
    UnexpectedWalletState {
        wallet: WalletPubKeyHash,
        actual: WalletState,
        expected: &'static str,
    },

    #[error("Wallet {0} is already registered")]
    WalletAlreadyRegistered(WalletPubKeyHash),

    #[error("Wallet creation conditions are not met")]
    WalletCreationConditionsNotMet,

    #[error("Active wallet cannot be considered closeable")]
    ActiveWalletCannotBeClosed,

    #[error("Wallet needs to be old enough or have too few satoshis")]
    WalletNotCloseable,

    #[error("Closing period has not elapsed yet")]
    ClosingPeriodNotElapsed,

    #[error("No main UTXO for the given wallet")]
    NoMainUtxo,

    #[error("Invalid main UTXO data")]
    InvalidMainUtxo,

    // -- outbound transaction shape --
    #[error("Outbound transaction must have a single input")]
    OutboundTxMustHaveSingleInput,

    #[error("Outbound transaction input must point to the wallet's main UTXO")]
    OutboundTxInputNotMainUtxo,

    #[error("Output's public key hash must have 20 bytes")]
    OutputPubKeyHashNot20Bytes,

    #[error("Output must be P2PKH or P2WPKH")]
    OutputMustBeP2pkhOrP2wpkh,

    #[error("Outputs value {outputs} exceeds inputs value {inputs}")]
    OutputValueExceedsInputs { inputs: u64, outputs: u64 },

    // -- redemption --
    #[error("Redeemer output script must not point to the wallet PKH")]
    RedeemerOutputScriptPointsToWallet,

    #[error("Redeemer output script must be a standard type")]
    NonStandardRedeemerOutputScript,

    #[error("Redemption amount too small")]
    RedemptionAmountTooSmall,

    #[error("Insufficient wallet funds")]
    InsufficientWalletFunds,

    #[error("There is a pending redemption request from this wallet to the same address")]
    PendingRedemptionExists,

    #[error("Output value is not within the acceptable range of the pending request")]
    RedemptionOutputOutOfRange { output_index: usize },

    #[error("Output value is not within the acceptable range of the timed out request")]
    TimedOutRedemptionOutputOutOfRange { output_index: usize },

    #[error("Output is a non-requested redemption")]
    NonRequestedRedemption { output_index: usize },

    #[error("Redemption transaction must process at least one redemption")]
    NoRedemptionProcessed,

    #[error("Redemption request does not exist")]
    RedemptionRequestNotFound,

    #[error("Redemption request has not timed out")]
    RedemptionNotTimedOut,

    #[error("Transaction fee is too high")]
    TransactionFeeTooHigh,

    // -- deposits --
    #[error("Refund locktime must be a value >= 500M")]
    RefundLocktimeTooLow,

    #[error("Deposit refund locktime is too close")]
    RefundLocktimeTooClose,

    #[error("Wrong 20-byte script hash")]
    WrongScriptHash20,

    #[error("Wrong 32-byte script hash")]
    WrongScriptHash32,

    #[error("Wrong script hash length")]
    WrongScriptHashLength,

    #[error("Deposit already revealed")]
    DepositAlreadyRevealed,

    #[error("Deposit amount too small")]
    DepositAmountTooSmall,

    #[error("Sweep transaction must have a single output")]
    SweepTxMustHaveSingleOutput,

    #[error("Deposit already swept")]
    DepositAlreadySwept,

    #[error("Deposit should be routed to another vault")]
    DepositRoutedToAnotherVault,

    #[error("Deposit min age not achieved yet")]
    DepositMinAgeNotAchieved,

    #[error("Deposit controlled by different wallet")]
    DepositControlledByAnotherWallet,

    #[error("Unknown input type")]
    UnknownInputType { input_index: usize },

    #[error("Expected main UTXO not present in sweep transaction inputs")]
    ExpectedMainUtxoNotPresent,

    #[error("Sweep transaction must process at least one deposit")]
    NoDepositsInSweep,

    #[error("Deposit fee share exceeds deposit amount")]
    FeeExceedsDepositAmount,

    // -- moving funds --
    #[error("Source wallet must handle all pending redemptions first")]
    PendingRedemptionsNotHandled,

    #[error("Source wallet must handle all pending moved funds sweep requests first")]
    PendingMovedFundsSweepsNotHandled,

    #[error("Target wallets commitment already submitted")]
    TargetWalletsCommitmentAlreadySubmitted,

    #[error("Wallet BTC balance is zero")]
    WalletBalanceZero,

    #[error("No target wallets available")]
    NoTargetWalletsAvailable,

    #[error("Submitted target wallets count is other than expected")]
    TargetWalletsCountMismatch { expected: usize, submitted: usize },

    #[error("Submitted target wallet cannot be equal to the source wallet")]
    TargetWalletIsSource,

    #[error("Submitted target wallet breaks the expected order")]
    TargetWalletsOrderBroken,

    #[error("Submitted target wallet must be in Live state")]
    TargetWalletNotLive(WalletPubKeyHash),

    #[error("Target wallets commitment is not submitted")]
    TargetWalletsCommitmentNotSubmitted,

    #[error("Target wallets don't correspond to the commitment")]
    TargetWalletsDontCorrespondToCommitment,

    #[error("Transaction amount is not distributed evenly")]
    AmountNotDistributedEvenly,

    #[error("Wallet BTC balance must be below the moving funds dust threshold")]
    WalletBalanceNotBelowDust,

    #[error("Moving funds has not timed out yet")]
    MovingFundsNotTimedOut,

    #[error("Live wallets count must be zero")]
    LiveWalletsCountNotZero,

    #[error("Moving funds timeout cannot be reset yet")]
    MovingFundsTimeoutResetTooEarly,

    // -- moved funds sweep --
    #[error("Moved funds sweep transaction must have a single output")]
    MovedFundsSweepTxMustHaveSingleOutput,

    #[error("Moved funds sweep transaction must have a proper inputs count")]
    MovedFundsSweepInputsCount { expected: usize, actual: usize },

    #[error("Sweep request must be in Pending state")]
    SweepRequestNotPending,

    #[error("Sweep request belongs to another wallet")]
    SweepRequestBelongsToAnotherWallet,

    #[error("Second input must point to the wallet's main UTXO")]
    SecondInputNotMainUtxo,

    #[error("Moved funds sweep output {output} does not equal inputs {inputs}")]
    MovedFundsSweepValueMismatch { inputs: u64, output: u64 },

    #[error("Sweep request has not timed out yet")]
    SweepRequestNotTimedOut,

    // -- configuration --
    #[error("Invalid bridge parameters: {0}")]
    InvalidParams(&'static str),

    // -- collaborators --
    #[error("Bank call failed: {0:#}")]
    Bank(#[source] anyhow::Error),

    #[error("Wallet registry call failed: {0:#}")]
    Registry(#[source] anyhow::Error),

    #[error("Relay call failed: {0:#}")]
    Relay(#[source] anyhow::Error),

    #[error("Ledger store failed: {0:#}")]
    Store(#[source] anyhow::Error),
}

/// Result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

impl SpvError {
    /// Failure class of this verifier error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpvError::InvalidHeaderChainLength { .. } => ErrorKind::Structural,
            _ => ErrorKind::ProofInsufficiency,
        }
    }
}

impl BridgeError {
    /// Shorthand for a wallet in the wrong lifecycle state.
    pub fn wallet_state(
        wallet: WalletPubKeyHash,
        actual: WalletState,
        expected: &'static str,
    ) -> Self {
        Self::UnexpectedWalletState {
            wallet,
            actual,
            expected,
        }
    }

    /// Failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        use BridgeError::*;
        match self {
            Tx(_) | CoinbaseProofRequired | OutputPubKeyHashNot20Bytes
            | OutputMustBeP2pkhOrP2wpkh | NonStandardRedeemerOutputScript
            | RedeemerOutputScriptPointsToWallet | OutboundTxMustHaveSingleInput
            | OutboundTxInputNotMainUtxo | SweepTxMustHaveSingleOutput
            | MovedFundsSweepTxMustHaveSingleOutput | MovedFundsSweepInputsCount { .. }
            | UnknownInputType { .. } | SecondInputNotMainUtxo | WrongScriptHash20
            | WrongScriptHash32 | WrongScriptHashLength | NonRequestedRedemption { .. }
            | TargetWalletsDontCorrespondToCommitment | InvalidParams(_) => {
                ErrorKind::Structural
            }
            Spv(e) => e.kind(),
            NotSpvMaintainer(_) | NotWalletMember | VaultNotTrusted(_) => {
                ErrorKind::Authorization
            }
            RedemptionAmountTooSmall
            | InsufficientWalletFunds
            | RedemptionOutputOutOfRange { .. }
            | TimedOutRedemptionOutputOutOfRange { .. }
            | TransactionFeeTooHigh
            | OutputValueExceedsInputs { .. }
            | DepositAmountTooSmall
            | FeeExceedsDepositAmount
            | AmountNotDistributedEvenly
            | MovedFundsSweepValueMismatch { .. }
            | WalletBalanceZero
            | WalletBalanceNotBelowDust
            | RefundLocktimeTooLow
            | RefundLocktimeTooClose => ErrorKind::Economic,
            Bank(_) | Registry(_) | Relay(_) | Store(_) => ErrorKind::Collaborator,
            _ => ErrorKind::StatePrecondition,
        }
    }

    /// True if resubmitting the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProofInsufficiency | ErrorKind::Collaborator
        )
    }

    /// True if the caller lacked permission.
    pub fn is_authorization(&self) -> bool {
        self.kind() == ErrorKind::Authorization
    }
}
