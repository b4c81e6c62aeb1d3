//! Pool-totals check
//!
//! Recomputes the pool's principal and share totals from every position and
//! repairs the pool record if they disagree. Also measures how far the
//! rewards credited to positions are from what the pool has distributed.

use solana_program::msg;

use crate::booster::BoosterResolver;
use crate::chain::ChainAdapter;
use crate::error::LedgerError;
use crate::events::{emit_pool_tick, OperatorAlerts};
use crate::fee::PriceOracle;
use crate::state::{Position, RewardPool};
use crate::store::LedgerStore;

use super::ReconciliationJob;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTotalsReport {
    pub positions: usize,
    pub recorded_principal: u128,
    pub actual_principal: u128,
    pub recorded_shares: u128,
    pub actual_shares: u128,
    pub repaired: bool,
    /// total_funded − reward_budget (WAD-lamports)
    pub distributed: u128,
    /// Σ(pending + claimed + unsettled) over all positions (WAD-lamports)
    pub accounted: u128,
}

impl PoolTotalsReport {
    /// distributed − accounted. Zero when every emitted unit is attributed.
    pub fn conservation_gap(&self) -> i128 {
        let distributed = i128::try_from(self.distributed).unwrap_or(i128::MAX);
        let accounted = i128::try_from(self.accounted).unwrap_or(i128::MAX);
        distributed.saturating_sub(accounted)
    }
}

/// Sum principal, shares and credited rewards across `positions`
pub fn sum_positions<'a, I>(pool: &RewardPool, positions: I) -> Result<(u128, u128, u128), LedgerError>
where
    I: IntoIterator<Item = &'a Position>,
{
    let mut principal: u128 = 0;
    let mut shares: u128 = 0;
    let mut accounted: u128 = 0;
    for position in positions {
        principal = principal
            .checked_add(position.principal as u128)
            .ok_or(LedgerError::MathOverflow)?;
        shares = shares
            .checked_add(position.shares)
            .ok_or(LedgerError::MathOverflow)?;
        // Corrupt debt counts as nothing unsettled; drift repair fixes it
        let unsettled = position.unsettled_rewards(pool).unwrap_or(0);
        accounted = accounted
            .checked_add(position.pending_rewards)
            .and_then(|v| v.checked_add(position.total_claimed))
            .and_then(|v| v.checked_add(unsettled))
            .ok_or(LedgerError::MathOverflow)?;
    }
    Ok((principal, shares, accounted))
}

impl<S, C, P, B, A> ReconciliationJob<S, C, P, B, A>
where
    S: LedgerStore,
    C: ChainAdapter,
    P: PriceOracle,
    B: BoosterResolver,
    A: OperatorAlerts,
{
    pub(crate) async fn check_pool_totals(&self) -> Result<PoolTotalsReport, LedgerError> {
        let store = self.engine.store();
        let attempts = self.engine.config().max_commit_retries;

        for attempt in 1..=attempts {
            // Pool first: any position commit after this bumps its version
            let stored = store.load_pool()?.ok_or(LedgerError::NotInitialized)?;
            let positions: Vec<Position> =
                store.list_positions()?.into_iter().map(|p| p.record).collect();

            let mut pool = stored.record.clone();
            let now = self.engine.now();
            let distributed_now = pool.tick(now)?;
            let (actual_principal, actual_shares, accounted) = sum_positions(&pool, &positions)?;

            let report = PoolTotalsReport {
                positions: positions.len(),
                recorded_principal: pool.total_principal,
                actual_principal,
                recorded_shares: pool.total_shares,
                actual_shares,
                repaired: pool.total_principal != actual_principal
                    || pool.total_shares != actual_shares,
                distributed: pool.total_funded.saturating_sub(pool.reward_budget),
                accounted,
            };
            if !report.repaired {
                if report.conservation_gap() != 0 {
                    msg!("Pool conservation gap: {} WAD-lamports", report.conservation_gap());
                }
                return Ok(report);
            }

            msg!(
                "Pool totals mismatch: principal {} (actual {}), shares {} (actual {})",
                pool.total_principal,
                actual_principal,
                pool.total_shares,
                actual_shares
            );
            if pool.total_shares != actual_shares {
                pool.close_window(now);
            }
            pool.total_principal = actual_principal;
            pool.total_shares = actual_shares;

            match store.save_pool(stored.version, &pool) {
                Ok(_) => {
                    if distributed_now > 0 {
                        emit_pool_tick(distributed_now, pool.acc_reward_per_share, now);
                    }
                    msg!("Fixed pool totals");
                    return Ok(report);
                }
                Err(LedgerError::ConcurrencyConflict) if attempt < attempts => {
                    tokio::time::sleep(self.engine.config().commit_backoff).await;
                }
                Err(LedgerError::ConcurrencyConflict) => break,
                Err(e) => return Err(e),
            }
        }
        Err(LedgerError::RetriesExhausted { attempts })
    }
}
