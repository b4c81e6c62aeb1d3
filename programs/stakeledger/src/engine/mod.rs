//! Settlement engine
//!
//! Every mutating operation runs the same two-phase flow under the user's
//! lock:
//!
//! 1. pre-checks (no side effects)
//! 2. fee quote and verification (no side effects on failure)
//! 3. ledger entry opened as FEE_CONFIRMED
//! 4. atomic pool + position commit, retried on contention
//! 5. payout through the chain adapter
//! 6. entry moved to SETTLED, or PAYOUT_FAILED for the reconciliation sweep
//!
//! Once step 3 has committed the operation always reaches a recorded outcome.

use std::sync::Arc;

use solana_program::{msg, pubkey::Pubkey};

use crate::booster::{BoosterResolver, ResolvedBoosters};
use crate::chain::{bounded, ChainAdapter};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::LedgerError;
use crate::events::emit_settlement;
use crate::fee::{quote_fee, PriceOracle};
use crate::state::{NewTransaction, PayoutFailure, TransactionEntry, TxKind, TxStatus};
use crate::store::LedgerStore;

pub mod admin;
pub mod apply;
pub mod claim;
pub mod locks;
pub mod overview;
pub mod payout;
pub mod stake;
pub mod unstake;

pub use locks::UserLocks;
pub use overview::{PoolOverview, PositionOverview};

/// How an accepted operation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Fully applied; UNSTAKE and CLAIM carry the payout signature
    Settled { payout_signature: Option<String> },
    /// Fee collected and recorded; the payout (or the local update) will be
    /// completed by reconciliation
    PendingRecovery { reason: PayoutFailure },
}

/// Result of an accepted Stake/Unstake/Claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    pub transaction_id: u64,
    pub kind: TxKind,
    pub amount: u64,
    pub fee_lamports: u64,
    pub outcome: SettlementOutcome,
}

impl SettlementReceipt {
    fn from_entry(entry: &TransactionEntry) -> Self {
        let outcome = match (&entry.status, &entry.last_failure) {
            (TxStatus::PayoutFailed, Some(reason)) | (TxStatus::FeeConfirmed, Some(reason)) => {
                SettlementOutcome::PendingRecovery {
                    reason: reason.clone(),
                }
            }
            _ => SettlementOutcome::Settled {
                payout_signature: entry.payout_signature.clone(),
            },
        };
        Self {
            transaction_id: entry.id,
            kind: entry.kind,
            amount: entry.amount,
            fee_lamports: entry.fee_lamports,
            outcome,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.outcome, SettlementOutcome::PendingRecovery { .. })
    }

    /// Text safe to show the user: a pending payout is neither a loss nor a
    /// completed transfer
    pub fn user_message(&self) -> String {
        let action = match self.kind {
            TxKind::Stake => "Stake",
            TxKind::Unstake => "Unstake",
            TxKind::Claim => "Claim",
        };
        match &self.outcome {
            SettlementOutcome::Settled { .. } => format!("{} of {} completed", action, self.amount),
            SettlementOutcome::PendingRecovery { .. } => format!(
                "{} of {} accepted. Your balance is updated and the transfer is pending; \
                 it will be completed automatically (reference #{})",
                action, self.amount, self.transaction_id
            ),
        }
    }
}

/// Parameters of a verified-fee operation after pre-checks
#[derive(Debug, Clone)]
pub(crate) struct Request<'a> {
    pub user_id: &'a str,
    pub wallet: Pubkey,
    pub kind: TxKind,
    pub amount: u64,
    pub fee_signature: &'a str,
    pub boosters: Option<ResolvedBoosters>,
}

pub struct SettlementEngine<S, C, P, B> {
    store: Arc<S>,
    chain: Arc<C>,
    oracle: Arc<P>,
    boosters: Arc<B>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    locks: UserLocks,
}

impl<S, C, P, B> Clone for SettlementEngine<S, C, P, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            chain: Arc::clone(&self.chain),
            oracle: Arc::clone(&self.oracle),
            boosters: Arc::clone(&self.boosters),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S, C, P, B> SettlementEngine<S, C, P, B>
where
    S: LedgerStore,
    C: ChainAdapter,
    P: PriceOracle,
    B: BoosterResolver,
{
    pub fn new(
        store: Arc<S>,
        chain: Arc<C>,
        oracle: Arc<P>,
        boosters: Arc<B>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self, LedgerError> {
        config.validate()?;
        Ok(Self {
            store,
            chain,
            oracle,
            boosters,
            clock,
            config,
            locks: UserLocks::new(),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.unix_timestamp()
    }

    /// Steps 2-6. Caller holds the user lock and has run the pre-checks.
    pub(crate) async fn run_two_phase(
        &self,
        request: Request<'_>,
    ) -> Result<SettlementReceipt, LedgerError> {
        if request.fee_signature.trim().is_empty() {
            return Err(LedgerError::FeeVerification("missing fee signature".into()));
        }
        if self.store.fee_signature_used(request.fee_signature)? {
            return Err(LedgerError::FeeSignatureReused);
        }

        // Fee phase
        let fee_lamports = quote_fee(
            self.oracle.as_ref(),
            &self.config,
            request.kind,
            request.amount,
        )
        .await?;
        let verified = bounded(
            self.config.chain_timeout,
            self.chain.verify_fee(request.fee_signature, fee_lamports),
        )
        .await
        .map_err(|e| LedgerError::FeeVerification(e.to_string()))?;
        if !verified {
            return Err(LedgerError::FeeVerification(format!(
                "no confirmed payment of {} lamports for signature",
                fee_lamports
            )));
        }

        // Ledger-open
        let now = self.now();
        let entry = self.store.append_transaction(NewTransaction {
            user_id: request.user_id.to_string(),
            wallet: request.wallet,
            kind: request.kind,
            amount: request.amount,
            fee_signature: request.fee_signature.to_string(),
            fee_lamports,
            status: TxStatus::FeeConfirmed,
            timestamp: now,
        })?;
        emit_settlement(&entry, now);
        msg!(
            "Opened {:?} #{} for {}: amount {}, fee {} lamports",
            entry.kind,
            entry.id,
            entry.user_id,
            entry.amount,
            fee_lamports
        );

        // From here on every path ends in a recorded status
        if let Err(err) = self.apply_entry(&entry, request.boosters.as_ref()).await {
            msg!("Position update for #{} failed after fee collection: {}", entry.id, err);
            let entry =
                self.record_failure(&entry, PayoutFailure::LocalCommitFailed(err.to_string()))?;
            return Ok(SettlementReceipt::from_entry(&entry));
        }

        let result = self.execute_payout(&entry).await;
        let entry = self.finalize(&entry, result, TxStatus::Settled)?;
        Ok(SettlementReceipt::from_entry(&entry))
    }
}
