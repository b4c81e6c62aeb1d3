//! Read-only views projected to the current time

use solana_program::{clock::UnixTimestamp, pubkey::Pubkey};

use crate::booster::BoosterResolver;
use crate::chain::ChainAdapter;
use crate::error::LedgerError;
use crate::fee::PriceOracle;
use crate::math::{annual_emission, wad_to_lamports};
use crate::state::Booster;
use crate::store::LedgerStore;

use super::SettlementEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionOverview {
    pub user_id: String,
    pub wallet: Pubkey,
    pub principal: u64,
    pub shares: u128,
    /// Settled plus unsettled rewards as of now (WAD-lamports)
    pub pending_rewards: u128,
    /// Whole lamports a claim would pay right now
    pub claimable_lamports: u64,
    pub total_accrued: u128,
    pub total_claimed: u128,
    pub total_fees_paid: u64,
    pub booster_multiplier: u128,
    pub active_boosters: Vec<Booster>,
    pub booster_cache_time: UnixTimestamp,
    pub stake_start_time: UnixTimestamp,
    pub last_stake_time: UnixTimestamp,
    /// When unstaking becomes possible, if a lock applies
    pub unlock_time: Option<UnixTimestamp>,
    /// Ledger entries for this user still awaiting settlement
    pub awaiting_settlement: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOverview {
    pub total_principal: u128,
    pub total_shares: u128,
    pub acc_reward_per_share: u128,
    pub reward_budget: u128,
    pub total_funded: u128,
    pub total_distributed: u128,
    /// Lamports emitted per day at the current budget
    pub daily_emission_lamports: u64,
    pub last_update_time: UnixTimestamp,
    pub created_at: UnixTimestamp,
}

impl<S, C, P, B> SettlementEngine<S, C, P, B>
where
    S: LedgerStore,
    C: ChainAdapter,
    P: PriceOracle,
    B: BoosterResolver,
{
    pub fn get_overview(&self, user_id: &str) -> Result<PositionOverview, LedgerError> {
        let now = self.now();
        let mut pool = self
            .store
            .load_pool()?
            .ok_or(LedgerError::NotInitialized)?
            .record;
        let position = self
            .store
            .load_position(user_id)?
            .ok_or_else(|| LedgerError::PositionNotFound(user_id.to_string()))?
            .record;

        pool.tick(now)?;
        let pending_rewards = position
            .pending_rewards
            .checked_add(position.unsettled_rewards(&pool)?)
            .ok_or(LedgerError::MathOverflow)?;

        let lock = self.config.lock_duration_seconds;
        let unlock_time = if lock > 0 && position.principal > 0 {
            let unlock = position.last_stake_time.saturating_add(lock as i64);
            (unlock > now).then_some(unlock)
        } else {
            None
        };

        let awaiting_settlement = self
            .store
            .user_transactions(user_id)?
            .iter()
            .filter(|e| e.status.awaits_settlement())
            .count();

        Ok(PositionOverview {
            user_id: position.user_id,
            wallet: position.wallet,
            principal: position.principal,
            shares: position.shares,
            pending_rewards,
            claimable_lamports: wad_to_lamports(pending_rewards)?,
            total_accrued: position.total_accrued,
            total_claimed: position.total_claimed,
            total_fees_paid: position.total_fees_paid,
            booster_multiplier: position.booster_multiplier,
            active_boosters: position.active_boosters,
            booster_cache_time: position.booster_cache_time,
            stake_start_time: position.stake_start_time,
            last_stake_time: position.last_stake_time,
            unlock_time,
            awaiting_settlement,
        })
    }

    pub fn pool_overview(&self) -> Result<PoolOverview, LedgerError> {
        let mut pool = self
            .store
            .load_pool()?
            .ok_or(LedgerError::NotInitialized)?
            .record;
        pool.tick(self.now())?;

        Ok(PoolOverview {
            total_principal: pool.total_principal,
            total_shares: pool.total_shares,
            acc_reward_per_share: pool.acc_reward_per_share,
            reward_budget: pool.reward_budget,
            total_funded: pool.total_funded,
            total_distributed: pool.total_distributed,
            daily_emission_lamports: wad_to_lamports(annual_emission(pool.reward_budget, 86_400)?)?,
            last_update_time: pool.last_update_time,
            created_at: pool.created_at,
        })
    }
}
