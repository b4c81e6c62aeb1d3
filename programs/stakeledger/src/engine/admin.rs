//! Admin operations: pool setup, funding and forced booster refresh

use solana_program::msg;

use crate::booster::{apply_boosters, BoosterResolver};
use crate::chain::ChainAdapter;
use crate::error::LedgerError;
use crate::events::emit_pool_tick;
use crate::fee::PriceOracle;
use crate::math::lamports_to_wad;
use crate::state::{Position, RewardPool};
use crate::store::LedgerStore;

use super::SettlementEngine;

impl<S, C, P, B> SettlementEngine<S, C, P, B>
where
    S: LedgerStore,
    C: ChainAdapter,
    P: PriceOracle,
    B: BoosterResolver,
{
    /// Create the reward pool with an initial emission budget
    pub fn initialize_pool(&self, initial_budget_lamports: u64) -> Result<RewardPool, LedgerError> {
        let pool = RewardPool::new(lamports_to_wad(initial_budget_lamports)?, self.now());
        self.store.create_pool(&pool)?;
        msg!(
            "Pool initialized with {} lamports reward budget",
            initial_budget_lamports
        );
        Ok(pool)
    }

    /// Add `lamports` to the reward budget. Emission up to now is applied at
    /// the old budget first.
    pub async fn fund_rewards(&self, lamports: u64) -> Result<RewardPool, LedgerError> {
        if lamports == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let added = lamports_to_wad(lamports)?;

        let attempts = self.config.max_commit_retries;
        for attempt in 1..=attempts {
            let stored = self.store.load_pool()?.ok_or(LedgerError::NotInitialized)?;
            let mut pool = stored.record;
            let now = self.now();
            let distributed = pool.tick(now)?;
            pool.reward_budget = pool
                .reward_budget
                .checked_add(added)
                .ok_or(LedgerError::MathOverflow)?;
            pool.total_funded = pool
                .total_funded
                .checked_add(added)
                .ok_or(LedgerError::MathOverflow)?;

            match self.store.save_pool(stored.version, &pool) {
                Ok(_) => {
                    if distributed > 0 {
                        emit_pool_tick(distributed, pool.acc_reward_per_share, now);
                    }
                    msg!("Funded {} lamports into reward budget", lamports);
                    return Ok(pool);
                }
                Err(LedgerError::ConcurrencyConflict) if attempt < attempts => {
                    tokio::time::sleep(self.config.commit_backoff).await;
                }
                Err(LedgerError::ConcurrencyConflict) => break,
                Err(e) => return Err(e),
            }
        }
        Err(LedgerError::RetriesExhausted { attempts })
    }

    /// Re-resolve a position's boosters regardless of cache age.
    ///
    /// Rewards up to now are settled at the old multiplier before the new one
    /// takes effect.
    pub async fn refresh_boosters(&self, user_id: &str) -> Result<Position, LedgerError> {
        let _guard = self.locks.lock(user_id).await;

        let wallet = self
            .store
            .load_position(user_id)?
            .ok_or_else(|| LedgerError::PositionNotFound(user_id.to_string()))?
            .record
            .wallet;
        let resolved = self.resolve_boosters(&wallet).await?;

        let committed = self
            .commit_with_retry(user_id, None, None, |pool, position| {
                position.settle(pool)?;
                apply_boosters(position, &resolved);
                let old_shares = position.recompute_shares()?;
                pool.apply_delta(
                    position.principal,
                    position.principal,
                    old_shares,
                    position.shares,
                )?;
                position.reset_debt(pool)
            })
            .await?
            .ok_or(LedgerError::ConcurrencyConflict)?;

        msg!(
            "Refreshed boosters for {}: {} categories, multiplier {}",
            user_id,
            committed.position.active_boosters.len(),
            committed.position.booster_multiplier
        );
        Ok(committed.position)
    }
}
