use thiserror::Error;

use crate::state::TxStatus;

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before any side effect (bad amount, insufficient principal, ...)
    Validation,
    /// Fee payment could not be verified; nothing was recorded
    FeeVerification,
    /// Store contention that outlived the retry budget
    Concurrency,
    /// Store, math or configuration failure
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Zero amount not allowed")]
    ZeroAmount,

    #[error("Stake amount below minimum of {minimum}")]
    BelowMinimumStake { minimum: u64 },

    #[error("Insufficient stake balance: requested {requested}, available {available}")]
    InsufficientStakeBalance { requested: u64, available: u64 },

    #[error("No rewards to claim")]
    NothingToClaim,

    #[error("No staking position for user {0}")]
    PositionNotFound(String),

    #[error("Invalid user id")]
    InvalidUserId,

    #[error("Wallet does not match the wallet bound to this position")]
    WalletMismatch,

    #[error("Stake is locked - lock duration has not elapsed")]
    StakeLocked,

    #[error("Fee signature has already been used")]
    FeeSignatureReused,

    #[error("Fee verification failed: {0}")]
    FeeVerification(String),

    #[error("Price unavailable: {0}")]
    PriceUnavailable(String),

    #[error("Booster lookup failed: {0}")]
    BoosterUnavailable(String),

    #[error("Concurrent modification detected")]
    ConcurrencyConflict,

    #[error("Concurrent modification persisted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Pool not initialized")]
    NotInitialized,

    #[error("Pool already initialized")]
    AlreadyInitialized,

    #[error("Math overflow")]
    MathOverflow,

    #[error("Math underflow")]
    MathUnderflow,

    #[error("Transaction {0} not found")]
    TransactionNotFound(u64),

    #[error("Invalid status transition from {from:?} to {to:?}")]
    InvalidStatusTransition { from: TxStatus, to: TxStatus },

    #[error("Immutable transaction field changed: {0}")]
    ImmutableField(&'static str),

    #[error("Store failure: {0}")]
    Store(String),

    #[error("Setting value exceeds maximum allowed: {0}")]
    SettingExceedsMaximum(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LedgerError {
    /// Stable reason code reported to bot commands and admin tools
    pub fn reason_code(&self) -> &'static str {
        match self {
            LedgerError::ZeroAmount => "ZERO_AMOUNT",
            LedgerError::BelowMinimumStake { .. } => "BELOW_MINIMUM_STAKE",
            LedgerError::InsufficientStakeBalance { .. } => "INSUFFICIENT_STAKE",
            LedgerError::NothingToClaim => "NOTHING_TO_CLAIM",
            LedgerError::PositionNotFound(_) => "POSITION_NOT_FOUND",
            LedgerError::InvalidUserId => "INVALID_USER",
            LedgerError::WalletMismatch => "WALLET_MISMATCH",
            LedgerError::StakeLocked => "STAKE_LOCKED",
            LedgerError::FeeSignatureReused => "FEE_SIGNATURE_REUSED",
            LedgerError::FeeVerification(_) => "FEE_VERIFICATION_FAILED",
            LedgerError::PriceUnavailable(_) => "PRICE_UNAVAILABLE",
            LedgerError::BoosterUnavailable(_) => "BOOSTER_UNAVAILABLE",
            LedgerError::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            LedgerError::RetriesExhausted { .. } => "CONCURRENCY_RETRIES_EXHAUSTED",
            LedgerError::NotInitialized => "POOL_NOT_INITIALIZED",
            LedgerError::AlreadyInitialized => "POOL_ALREADY_INITIALIZED",
            LedgerError::MathOverflow => "MATH_OVERFLOW",
            LedgerError::MathUnderflow => "MATH_UNDERFLOW",
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            LedgerError::ImmutableField(_) => "IMMUTABLE_FIELD",
            LedgerError::Store(_) => "STORE_FAILURE",
            LedgerError::SettingExceedsMaximum(_) => "SETTING_EXCEEDS_MAXIMUM",
            LedgerError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::ZeroAmount
            | LedgerError::BelowMinimumStake { .. }
            | LedgerError::InsufficientStakeBalance { .. }
            | LedgerError::NothingToClaim
            | LedgerError::PositionNotFound(_)
            | LedgerError::InvalidUserId
            | LedgerError::WalletMismatch
            | LedgerError::StakeLocked
            | LedgerError::FeeSignatureReused => ErrorClass::Validation,
            LedgerError::FeeVerification(_) | LedgerError::PriceUnavailable(_) => {
                ErrorClass::FeeVerification
            }
            LedgerError::ConcurrencyConflict | LedgerError::RetriesExhausted { .. } => {
                ErrorClass::Concurrency
            }
            _ => ErrorClass::Internal,
        }
    }
}

/// Failure reported by an external collaborator (chain, oracle, booster registry).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExternalError {
    #[error("Timed out")]
    Timeout,

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected: {0}")]
    Rejected(String),
}
