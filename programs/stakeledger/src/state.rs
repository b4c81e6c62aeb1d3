//! Persisted record structures for the ledger

use borsh::{BorshDeserialize, BorshSerialize};
use solana_program::{clock::UnixTimestamp, pubkey::Pubkey};

use crate::error::LedgerError;
use crate::math::{annual_emission, boosted_shares, mul_u256, U256, WAD};

/// Record discriminators
pub const POOL_DISCRIMINATOR: [u8; 8] = [0x52, 0x77, 0x9a, 0x0c, 0x3e, 0xd1, 0x6b, 0x24];
pub const POSITION_DISCRIMINATOR: [u8; 8] = [0x8e, 0x14, 0x5b, 0xc2, 0x71, 0x0f, 0xa9, 0x3d];
pub const TRANSACTION_DISCRIMINATOR: [u8; 8] = [0x1f, 0xb8, 0x46, 0xe3, 0x92, 0x5c, 0x07, 0xda];

/// Global reward pool (singleton)
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct RewardPool {
    /// Discriminator for record type identification
    pub discriminator: [u8; 8],

    /// Sum of all positions' staked principal (token base units)
    pub total_principal: u128,

    /// Sum of all positions' boosted reward shares
    pub total_shares: u128,

    /// Accumulated WAD-lamports per reward share since inception
    pub acc_reward_per_share: u128,

    /// Remaining emission budget (WAD-lamports)
    pub reward_budget: u128,

    /// Everything ever funded into the budget (WAD-lamports)
    pub total_funded: u128,

    /// Everything credited to the accumulator so far (WAD-lamports)
    pub total_distributed: u128,

    /// Last time emission was applied
    pub last_update_time: UnixTimestamp,

    /// Pool creation time
    pub created_at: UnixTimestamp,
}

impl RewardPool {
    /// Size of the record in bytes
    pub const LEN: usize = 8 + // discriminator
        16 + // total_principal
        16 + // total_shares
        16 + // acc_reward_per_share
        16 + // reward_budget
        16 + // total_funded
        16 + // total_distributed
        8 +  // last_update_time
        8;   // created_at

    pub fn new(initial_budget: u128, now: UnixTimestamp) -> Self {
        Self {
            discriminator: POOL_DISCRIMINATOR,
            total_principal: 0,
            total_shares: 0,
            acc_reward_per_share: 0,
            reward_budget: initial_budget,
            total_funded: initial_budget,
            total_distributed: 0,
            last_update_time: now,
            created_at: now,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.discriminator == POOL_DISCRIMINATOR
    }

    /// Apply emission up to `now`. Returns the WAD-lamports credited to the
    /// accumulator.
    ///
    /// With no shares staked the clock moves forward and nothing is emitted, so
    /// idle time is never banked for later stakers. The budget is charged exactly
    /// `increment × total_shares`, leaving the division remainder in the budget.
    pub fn tick(&mut self, now: UnixTimestamp) -> Result<u128, LedgerError> {
        let dt = now.saturating_sub(self.last_update_time);
        if dt <= 0 {
            return Ok(0);
        }
        if self.total_shares == 0 || self.reward_budget == 0 {
            self.last_update_time = now;
            return Ok(0);
        }

        let emitted = annual_emission(self.reward_budget, dt)?;
        let increment = emitted / self.total_shares;
        if increment == 0 {
            // Leave last_update_time so short intervals accumulate; a share
            // change closes the window (close_window)
            return Ok(0);
        }
        let distributed = increment
            .checked_mul(self.total_shares)
            .ok_or(LedgerError::MathOverflow)?;

        self.acc_reward_per_share = self
            .acc_reward_per_share
            .checked_add(increment)
            .ok_or(LedgerError::MathOverflow)?;
        self.reward_budget = self
            .reward_budget
            .checked_sub(distributed)
            .ok_or(LedgerError::MathUnderflow)?;
        self.total_distributed = self
            .total_distributed
            .checked_add(distributed)
            .ok_or(LedgerError::MathOverflow)?;
        self.last_update_time = now;

        Ok(distributed)
    }

    /// Close a window that `tick` left open because it was too short to move
    /// the accumulator. Called when the share distribution changes, so the
    /// open window is never credited at the new distribution; its emission
    /// stays in the budget.
    pub fn close_window(&mut self, now: UnixTimestamp) {
        if now > self.last_update_time {
            self.last_update_time = now;
        }
    }

    /// Apply a position's principal/share change to the pool totals
    pub fn apply_delta(
        &mut self,
        old_principal: u64,
        new_principal: u64,
        old_shares: u128,
        new_shares: u128,
    ) -> Result<(), LedgerError> {
        self.total_principal = self
            .total_principal
            .checked_sub(old_principal as u128)
            .ok_or(LedgerError::MathUnderflow)?
            .checked_add(new_principal as u128)
            .ok_or(LedgerError::MathOverflow)?;
        self.total_shares = self
            .total_shares
            .checked_sub(old_shares)
            .ok_or(LedgerError::MathUnderflow)?
            .checked_add(new_shares)
            .ok_or(LedgerError::MathOverflow)?;
        Ok(())
    }
}

/// An active booster category and its WAD-scaled multiplier
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct Booster {
    pub category: String,
    pub multiplier: u128,
}

/// Per-user staking position
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Discriminator for record type identification
    pub discriminator: [u8; 8],

    /// Caller-facing user id (record key)
    pub user_id: String,

    /// Payout recipient, bound on first stake
    pub wallet: Pubkey,

    /// Staked amount (token base units)
    pub principal: u64,

    /// Boosted reward shares: principal × booster_multiplier / WAD
    pub shares: u128,

    /// shares × acc_reward_per_share at last settlement, stored as U256 bytes
    pub reward_debt: [u8; 32],

    /// Settled but unclaimed rewards (WAD-lamports)
    pub pending_rewards: u128,

    /// Everything ever credited by settlement (WAD-lamports)
    pub total_accrued: u128,

    /// Everything moved out of pending by claims (WAD-lamports)
    pub total_claimed: u128,

    /// Fees charged on applied operations (lamports)
    pub total_fees_paid: u64,

    /// Combined WAD-scaled booster multiplier (WAD = no boost)
    pub booster_multiplier: u128,

    /// Booster categories behind `booster_multiplier`
    pub active_boosters: Vec<Booster>,

    /// When the booster cache was last resolved (0 = never)
    pub booster_cache_time: UnixTimestamp,

    /// Start of the current staking period (0 = never staked)
    pub stake_start_time: UnixTimestamp,

    /// Timestamp of most recent stake deposit
    pub last_stake_time: UnixTimestamp,

    /// Sequence of the last ledger entry applied to this position
    pub last_sequence: u64,
}

impl Position {
    pub fn new(user_id: String, wallet: Pubkey) -> Self {
        Self {
            discriminator: POSITION_DISCRIMINATOR,
            user_id,
            wallet,
            principal: 0,
            shares: 0,
            reward_debt: [0u8; 32],
            pending_rewards: 0,
            total_accrued: 0,
            total_claimed: 0,
            total_fees_paid: 0,
            booster_multiplier: WAD,
            active_boosters: Vec::new(),
            booster_cache_time: 0,
            stake_start_time: 0,
            last_stake_time: 0,
            last_sequence: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.discriminator == POSITION_DISCRIMINATOR
    }

    pub fn get_reward_debt(&self) -> U256 {
        U256::from_le_bytes(&self.reward_debt)
    }

    pub fn set_reward_debt(&mut self, value: U256) {
        self.reward_debt = value.to_le_bytes();
    }

    /// Rewards earned since the last settlement, without mutating anything
    pub fn unsettled_rewards(&self, pool: &RewardPool) -> Result<u128, LedgerError> {
        if self.shares == 0 {
            return Ok(0);
        }
        let accumulated = mul_u256(self.shares, pool.acc_reward_per_share)?;
        let pending = accumulated
            .checked_sub(self.get_reward_debt())
            .ok_or(LedgerError::MathUnderflow)?;
        pending.to_u128().ok_or(LedgerError::MathOverflow)
    }

    /// Credit rewards earned since the last settlement into `pending_rewards`
    /// and reset the debt to the current accumulator. A second call with no
    /// share change in between credits nothing.
    pub fn settle(&mut self, pool: &RewardPool) -> Result<u128, LedgerError> {
        let pending = self.unsettled_rewards(pool)?;
        if pending > 0 {
            self.pending_rewards = self
                .pending_rewards
                .checked_add(pending)
                .ok_or(LedgerError::MathOverflow)?;
            self.total_accrued = self
                .total_accrued
                .checked_add(pending)
                .ok_or(LedgerError::MathOverflow)?;
        }
        self.reset_debt(pool)?;
        Ok(pending)
    }

    /// Recompute shares from principal and the current multiplier, returning
    /// the previous share count.
    pub fn recompute_shares(&mut self) -> Result<u128, LedgerError> {
        let old = self.shares;
        self.shares = boosted_shares(self.principal, self.booster_multiplier)?;
        Ok(old)
    }

    /// reward_debt = shares × acc_reward_per_share
    pub fn reset_debt(&mut self, pool: &RewardPool) -> Result<(), LedgerError> {
        let debt = mul_u256(self.shares, pool.acc_reward_per_share)?;
        self.set_reward_debt(debt);
        Ok(())
    }
}

/// Ledger entry kind
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    Stake,
    Unstake,
    Claim,
}

/// Settlement status of a ledger entry. Statuses only move forward.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxStatus {
    PendingFee,
    FeeConfirmed,
    PayoutFailed,
    Settled,
    Recovered,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Settled | TxStatus::Recovered)
    }

    /// Needs the reconciliation sweep
    pub fn awaits_settlement(&self) -> bool {
        matches!(self, TxStatus::FeeConfirmed | TxStatus::PayoutFailed)
    }

    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        use TxStatus::*;
        matches!(
            (self, next),
            (PendingFee, FeeConfirmed)
                | (FeeConfirmed, Settled)
                | (FeeConfirmed, PayoutFailed)
                | (FeeConfirmed, Recovered)
                | (PayoutFailed, PayoutFailed)
                | (PayoutFailed, Recovered)
        )
    }
}

/// Why a payout (or the local mutation before it) did not complete
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub enum PayoutFailure {
    /// Vault cannot cover the payout; needs funding, not a retry
    InsufficientVaultLiquidity { available: u64, required: u64 },
    /// No answer from the chain within the bound
    Timeout,
    /// Chain rejected or could not execute the transfer
    Rejected(String),
    /// Fee was collected but the position mutation never committed
    LocalCommitFailed(String),
}

impl std::fmt::Display for PayoutFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayoutFailure::InsufficientVaultLiquidity { available, required } => write!(
                f,
                "insufficient vault liquidity (available {}, required {})",
                available, required
            ),
            PayoutFailure::Timeout => write!(f, "payout timed out"),
            PayoutFailure::Rejected(reason) => write!(f, "payout rejected: {}", reason),
            PayoutFailure::LocalCommitFailed(reason) => {
                write!(f, "position update failed after fee collection: {}", reason)
            }
        }
    }
}

/// Append-only ledger entry
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionEntry {
    /// Discriminator for record type identification
    pub discriminator: [u8; 8],

    /// Store-assigned monotonic sequence
    pub id: u64,

    pub user_id: String,

    /// Payout recipient at the time the entry was opened
    pub wallet: Pubkey,

    pub kind: TxKind,

    /// Token base units for STAKE/UNSTAKE, lamports for CLAIM
    pub amount: u64,

    pub fee_signature: String,

    pub fee_lamports: u64,

    pub payout_signature: Option<String>,

    pub status: TxStatus,

    pub timestamp: UnixTimestamp,

    /// Position mutation committed (set atomically with the commit)
    pub applied: bool,

    pub payout_attempts: u32,

    pub last_failure: Option<PayoutFailure>,

    /// Operator has been alerted; no further automatic retries
    pub escalated: bool,
}

/// Fields of a new ledger entry; the store assigns the id
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: String,
    pub wallet: Pubkey,
    pub kind: TxKind,
    pub amount: u64,
    pub fee_signature: String,
    pub fee_lamports: u64,
    pub status: TxStatus,
    pub timestamp: UnixTimestamp,
}

impl NewTransaction {
    pub fn into_entry(self, id: u64) -> TransactionEntry {
        TransactionEntry {
            discriminator: TRANSACTION_DISCRIMINATOR,
            id,
            user_id: self.user_id,
            wallet: self.wallet,
            kind: self.kind,
            amount: self.amount,
            fee_signature: self.fee_signature,
            fee_lamports: self.fee_lamports,
            payout_signature: None,
            status: self.status,
            timestamp: self.timestamp,
            applied: false,
            payout_attempts: 0,
            last_failure: None,
            escalated: false,
        }
    }
}

/// Mutable part of a ledger entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionUpdate {
    pub status: TxStatus,
    pub payout_signature: Option<String>,
    pub payout_attempts: u32,
    pub last_failure: Option<PayoutFailure>,
    pub escalated: bool,
}

impl TransactionEntry {
    pub fn is_initialized(&self) -> bool {
        self.discriminator == TRANSACTION_DISCRIMINATOR
    }

    /// Start an update from the entry's current mutable fields
    pub fn update(&self) -> TransactionUpdate {
        TransactionUpdate {
            status: self.status,
            payout_signature: self.payout_signature.clone(),
            payout_attempts: self.payout_attempts,
            last_failure: self.last_failure.clone(),
            escalated: self.escalated,
        }
    }

    /// Apply an update, enforcing forward-only status and a write-once payout
    /// signature. Settled/recovered UNSTAKE and CLAIM entries need a signature;
    /// PAYOUT_FAILED entries must not have one.
    pub fn apply_update(&mut self, update: TransactionUpdate) -> Result<(), LedgerError> {
        if update.status != self.status && !self.status.can_transition_to(update.status) {
            return Err(LedgerError::InvalidStatusTransition {
                from: self.status,
                to: update.status,
            });
        }
        if self.status.is_terminal() && update != self.update() {
            return Err(LedgerError::InvalidStatusTransition {
                from: self.status,
                to: update.status,
            });
        }
        if self.payout_signature.is_some() && update.payout_signature != self.payout_signature {
            return Err(LedgerError::ImmutableField("payout_signature"));
        }
        if update.status.is_terminal()
            && self.kind != TxKind::Stake
            && update.payout_signature.is_none()
        {
            return Err(LedgerError::ImmutableField("payout_signature"));
        }
        if update.status == TxStatus::PayoutFailed && update.payout_signature.is_some() {
            return Err(LedgerError::ImmutableField("payout_signature"));
        }
        if update.payout_attempts < self.payout_attempts || (self.escalated && !update.escalated) {
            return Err(LedgerError::ImmutableField("payout bookkeeping"));
        }

        self.status = update.status;
        self.payout_signature = update.payout_signature;
        self.payout_attempts = update.payout_attempts;
        self.last_failure = update.last_failure;
        self.escalated = update.escalated;
        Ok(())
    }
}
