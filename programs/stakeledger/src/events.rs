//! Structured binary log events emitted via sol_log_data, and the operator
//! alert channel used by reconciliation

use solana_program::{clock::UnixTimestamp, log::sol_log_data, msg};

use crate::state::{PayoutFailure, TransactionEntry, TxKind, TxStatus};

/// sha256("event:Settlement")[..8]
pub const SETTLEMENT_DISCRIMINATOR: [u8; 8] = [0x3c, 0x5e, 0xa1, 0x07, 0xd4, 0x62, 0xf8, 0x19];

/// sha256("event:PoolTick")[..8]
pub const POOL_TICK_DISCRIMINATOR: [u8; 8] = [0xb0, 0x4a, 0x1d, 0x93, 0x2e, 0xc7, 0x55, 0x08];

fn kind_byte(kind: TxKind) -> u8 {
    match kind {
        TxKind::Stake => 0,
        TxKind::Unstake => 1,
        TxKind::Claim => 2,
    }
}

fn status_byte(status: TxStatus) -> u8 {
    match status {
        TxStatus::PendingFee => 0,
        TxStatus::FeeConfirmed => 1,
        TxStatus::PayoutFailed => 2,
        TxStatus::Settled => 3,
        TxStatus::Recovered => 4,
    }
}

/// Emit a structured Settlement event (42 bytes) whenever a ledger entry
/// changes status.
///
/// Layout: 8 discriminator + 8 entry id + 1 kind + 8 amount + 8 fee + 1 status
/// + 8 timestamp
pub fn emit_settlement(entry: &TransactionEntry, now: UnixTimestamp) {
    let mut data = [0u8; 42];
    data[..8].copy_from_slice(&SETTLEMENT_DISCRIMINATOR);
    data[8..16].copy_from_slice(&entry.id.to_le_bytes());
    data[16] = kind_byte(entry.kind);
    data[17..25].copy_from_slice(&entry.amount.to_le_bytes());
    data[25..33].copy_from_slice(&entry.fee_lamports.to_le_bytes());
    data[33] = status_byte(entry.status);
    data[34..42].copy_from_slice(&now.to_le_bytes());
    sol_log_data(&[&data]);
}

/// Emit a PoolTick event (48 bytes) when emission is credited.
///
/// Layout: 8 discriminator + 16 distributed + 16 acc_reward_per_share + 8 time
pub fn emit_pool_tick(distributed: u128, acc_reward_per_share: u128, now: UnixTimestamp) {
    let mut data = [0u8; 48];
    data[..8].copy_from_slice(&POOL_TICK_DISCRIMINATOR);
    data[8..24].copy_from_slice(&distributed.to_le_bytes());
    data[24..40].copy_from_slice(&acc_reward_per_share.to_le_bytes());
    data[40..48].copy_from_slice(&now.to_le_bytes());
    sol_log_data(&[&data]);
}

/// Everything an operator needs to settle an entry by hand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorAlert {
    pub transaction_id: u64,
    pub user_id: String,
    pub kind: TxKind,
    pub amount: u64,
    pub fee_signature: String,
    pub fee_lamports: u64,
    /// Seconds since the entry was opened
    pub elapsed_seconds: i64,
    pub attempts: u32,
    pub reason: Option<PayoutFailure>,
}

impl OperatorAlert {
    pub fn for_entry(entry: &TransactionEntry, now: UnixTimestamp) -> Self {
        Self {
            transaction_id: entry.id,
            user_id: entry.user_id.clone(),
            kind: entry.kind,
            amount: entry.amount,
            fee_signature: entry.fee_signature.clone(),
            fee_lamports: entry.fee_lamports,
            elapsed_seconds: now.saturating_sub(entry.timestamp),
            attempts: entry.payout_attempts,
            reason: entry.last_failure.clone(),
        }
    }
}

impl std::fmt::Display for OperatorAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "tx {} {:?} user={} amount={} fee_sig={} fee={} elapsed={}s attempts={}",
            self.transaction_id,
            self.kind,
            self.user_id,
            self.amount,
            self.fee_signature,
            self.fee_lamports,
            self.elapsed_seconds,
            self.attempts
        )?;
        if let Some(reason) = &self.reason {
            write!(f, " reason: {}", reason)?;
        }
        Ok(())
    }
}

/// A position the drift check could not reconcile on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftAlert {
    pub user_id: String,
    pub reason: String,
}

impl std::fmt::Display for DriftAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "position {}: {}", self.user_id, self.reason)
    }
}

/// Operator escalation channel
pub trait OperatorAlerts: Send + Sync {
    fn alert(&self, alert: OperatorAlert);

    fn drift_alert(&self, alert: DriftAlert) {
        msg!("OPERATOR ALERT: drift {}", alert);
    }
}

/// Writes alerts to the program log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerts;

impl OperatorAlerts for LogAlerts {
    fn alert(&self, alert: OperatorAlert) {
        msg!("OPERATOR ALERT: {}", alert);
    }
}
