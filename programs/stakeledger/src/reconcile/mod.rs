//! Reconciliation job
//!
//! Idempotent checks that run on demand or on an interval:
//! - failed-payout sweep: finish entries whose fee was collected but whose
//!   payout never completed, escalating the ones that keep failing
//! - drift check: replay the ledger and repair positions that disagree
//! - pool totals: recompute pool totals from positions and measure the
//!   reward conservation gap
//!
//! Every check scans the whole ledger in pages.

use std::sync::Arc;
use std::time::Duration;

use solana_program::msg;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::booster::BoosterResolver;
use crate::chain::ChainAdapter;
use crate::engine::SettlementEngine;
use crate::error::LedgerError;
use crate::events::OperatorAlerts;
use crate::fee::PriceOracle;
use crate::state::TransactionEntry;
use crate::store::LedgerStore;

pub mod drift;
pub mod pool_totals;
pub mod sweep;

pub use drift::{replay, DriftFailure, DriftRepair, LedgerView};
pub use pool_totals::PoolTotalsReport;
pub use sweep::SweepReport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileScope {
    All,
    User(String),
}

impl ReconcileScope {
    pub fn includes(&self, user_id: &str) -> bool {
        match self {
            ReconcileScope::All => true,
            ReconcileScope::User(id) => id == user_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub sweep: SweepReport,
    pub drift: Vec<DriftRepair>,
    /// Users whose ledger could not be replayed or whose repair failed
    pub drift_failures: Vec<DriftFailure>,
    /// Present for `All`, or whenever a drift repair touched pool totals
    pub pool_totals: Option<PoolTotalsReport>,
}

impl ReconcileReport {
    /// Nothing needed fixing and nothing is left for an operator
    pub fn is_clean(&self) -> bool {
        self.sweep.examined == 0
            && self.drift.is_empty()
            && self.drift_failures.is_empty()
            && self
                .pool_totals
                .as_ref()
                .map_or(true, |p| !p.repaired && p.conservation_gap() == 0)
    }
}

/// Every ledger entry, in sequence order
pub(crate) fn scan_all<S: LedgerStore>(
    store: &S,
    page_size: usize,
) -> Result<Vec<TransactionEntry>, LedgerError> {
    let mut entries = Vec::new();
    let mut cursor = None;
    loop {
        let page = store.scan_transactions(cursor, page_size)?;
        let Some(last) = page.last() else { break };
        cursor = Some(last.id);
        let full = page.len() == page_size;
        entries.extend(page);
        if !full {
            break;
        }
    }
    Ok(entries)
}

pub struct ReconciliationJob<S, C, P, B, A> {
    engine: SettlementEngine<S, C, P, B>,
    alerts: Arc<A>,
}

impl<S, C, P, B, A> ReconciliationJob<S, C, P, B, A>
where
    S: LedgerStore,
    C: ChainAdapter,
    P: PriceOracle,
    B: BoosterResolver,
    A: OperatorAlerts,
{
    /// Shares the engine's store, collaborators and user locks
    pub fn new(engine: SettlementEngine<S, C, P, B>, alerts: Arc<A>) -> Self {
        Self { engine, alerts }
    }

    pub fn engine(&self) -> &SettlementEngine<S, C, P, B> {
        &self.engine
    }

    /// Sweep first so re-applied entries are visible to the drift replay
    pub async fn run(&self, scope: ReconcileScope) -> Result<ReconcileReport, LedgerError> {
        let sweep = self.sweep_failed_payouts(&scope).await?;
        let (drift, drift_failures) = self.check_drift(&scope).await?;
        let pool_totals = if scope == ReconcileScope::All || !drift.is_empty() {
            Some(self.check_pool_totals().await?)
        } else {
            None
        };

        let report = ReconcileReport {
            sweep,
            drift,
            drift_failures,
            pool_totals,
        };
        msg!(
            "Reconciliation {:?}: {} recovered, {} escalated, {} positions repaired, {} failed",
            scope,
            report.sweep.recovered.len(),
            report.sweep.escalated.len(),
            report.drift.len(),
            report.drift_failures.len()
        );
        Ok(report)
    }

    /// Run over everything every `period` until `shutdown` turns true or its
    /// sender is dropped. A failed run is logged and retried next period.
    pub async fn run_every(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run(ReconcileScope::All).await {
                        msg!("Reconciliation failed: {}", err);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        msg!("Reconciliation loop stopped");
    }
}
