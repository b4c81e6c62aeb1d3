//! Failed-payout sweep
//!
//! Picks up entries whose fee was collected but whose payout never completed,
//! finishes them, and escalates the ones that keep failing.

use solana_program::msg;

use crate::booster::BoosterResolver;
use crate::chain::ChainAdapter;
use crate::error::{ErrorClass, LedgerError};
use crate::events::{OperatorAlert, OperatorAlerts};
use crate::fee::PriceOracle;
use crate::state::{PayoutFailure, TransactionEntry, TxStatus};
use crate::store::LedgerStore;

use super::{scan_all, ReconcileScope, ReconciliationJob};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries old enough to be swept
    pub examined: usize,
    pub recovered: Vec<u64>,
    pub still_failing: Vec<u64>,
    pub escalated: Vec<u64>,
}

enum SweepOutcome {
    Recovered,
    StillFailing,
    Escalated,
    /// Finished or escalated elsewhere in the meantime
    Skipped,
}

/// Entry is unfinished, not yet handed to an operator, and past the grace
/// period
pub fn is_sweep_candidate(entry: &TransactionEntry, now: i64, grace_period_seconds: u64) -> bool {
    entry.status.awaits_settlement()
        && !entry.escalated
        && now.saturating_sub(entry.timestamp) >= grace_period_seconds as i64
}

impl<S, C, P, B, A> ReconciliationJob<S, C, P, B, A>
where
    S: LedgerStore,
    C: ChainAdapter,
    P: PriceOracle,
    B: BoosterResolver,
    A: OperatorAlerts,
{
    pub(crate) async fn sweep_failed_payouts(
        &self,
        scope: &ReconcileScope,
    ) -> Result<SweepReport, LedgerError> {
        let config = &self.engine.config().reconcile;
        let now = self.engine.now();
        let candidates: Vec<TransactionEntry> =
            scan_all(self.engine.store().as_ref(), config.scan_page_size)?
                .into_iter()
                .filter(|e| scope.includes(&e.user_id))
                .filter(|e| is_sweep_candidate(e, now, config.grace_period_seconds))
                .collect();

        let mut report = SweepReport {
            examined: candidates.len(),
            ..SweepReport::default()
        };
        for candidate in candidates {
            let id = candidate.id;
            match self.sweep_entry(candidate).await? {
                SweepOutcome::Recovered => report.recovered.push(id),
                SweepOutcome::StillFailing => report.still_failing.push(id),
                SweepOutcome::Escalated => report.escalated.push(id),
                SweepOutcome::Skipped => {}
            }
        }
        if report.examined > 0 {
            msg!(
                "Sweep: {} examined, {} recovered, {} still failing, {} escalated",
                report.examined,
                report.recovered.len(),
                report.still_failing.len(),
                report.escalated.len()
            );
        }
        Ok(report)
    }

    async fn sweep_entry(&self, candidate: TransactionEntry) -> Result<SweepOutcome, LedgerError> {
        let _guard = self.engine.locks().lock(&candidate.user_id).await;
        let store = self.engine.store();
        let config = &self.engine.config().reconcile;
        let now = self.engine.now();

        // Another run may have finished it while we waited for the lock
        let mut entry = store
            .load_transaction(candidate.id)?
            .ok_or(LedgerError::TransactionNotFound(candidate.id))?;
        if !is_sweep_candidate(&entry, now, config.grace_period_seconds) {
            return Ok(SweepOutcome::Skipped);
        }
        if entry.payout_attempts >= config.max_payout_attempts {
            self.escalate(&entry)?;
            return Ok(SweepOutcome::Escalated);
        }

        if !entry.applied {
            if let Err(err) = self.engine.apply_entry(&entry, None).await {
                msg!("Re-applying #{} failed: {}", entry.id, err);
                let failed = self
                    .engine
                    .record_failure(&entry, PayoutFailure::LocalCommitFailed(err.to_string()))?;
                // A mutation the ledger no longer permits needs a person
                if err.class() == ErrorClass::Validation
                    || failed.payout_attempts >= config.max_payout_attempts
                {
                    self.escalate(&failed)?;
                    return Ok(SweepOutcome::Escalated);
                }
                return Ok(SweepOutcome::StillFailing);
            }
            entry = store
                .load_transaction(entry.id)?
                .ok_or(LedgerError::TransactionNotFound(entry.id))?;
        }

        let result = self.engine.execute_payout(&entry).await;
        let updated = self.engine.finalize(&entry, result, TxStatus::Recovered)?;
        if updated.status == TxStatus::Recovered {
            msg!("Recovered #{} for {}", updated.id, updated.user_id);
            return Ok(SweepOutcome::Recovered);
        }
        if updated.payout_attempts >= config.max_payout_attempts {
            self.escalate(&updated)?;
            return Ok(SweepOutcome::Escalated);
        }
        Ok(SweepOutcome::StillFailing)
    }

    fn escalate(&self, entry: &TransactionEntry) -> Result<(), LedgerError> {
        let mut update = entry.update();
        update.escalated = true;
        let escalated = self.engine.store().update_transaction(entry.id, update)?;
        let alert = OperatorAlert::for_entry(&escalated, self.engine.now());
        msg!("Escalating #{} after {} attempts", escalated.id, escalated.payout_attempts);
        self.alerts.alert(alert);
        Ok(())
    }
}
