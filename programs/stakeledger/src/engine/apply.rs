//! Atomic local mutation (step 4) and its retry loop

use std::time::Duration;

use solana_program::{msg, pubkey::Pubkey};

use crate::booster::{
    apply_boosters, cache_is_invalid, cache_is_stale, combined_multiplier, BoosterResolver,
    ResolvedBoosters,
};
use crate::chain::{bounded, ChainAdapter};
use crate::error::LedgerError;
use crate::events::emit_pool_tick;
use crate::fee::PriceOracle;
use crate::math::lamports_to_wad;
use crate::state::{Position, RewardPool, TransactionEntry, TxKind};
use crate::store::{LedgerStore, PositionCommit};

use super::SettlementEngine;

/// Largest backoff exponent (base × 1024)
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Records written by a successful commit
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub pool: RewardPool,
    pub position: Position,
    pub value: T,
}

/// Apply a ledger entry's effect to the pool and position.
///
/// The pool must already be ticked to the commit time. Rewards are settled at
/// the position's current shares before the principal or multiplier changes.
pub fn apply_mutation(
    pool: &mut RewardPool,
    position: &mut Position,
    entry: &TransactionEntry,
    boosters: Option<&ResolvedBoosters>,
) -> Result<(), LedgerError> {
    position.settle(pool)?;
    if let Some(resolved) = boosters {
        apply_boosters(position, resolved);
    }

    let old_principal = position.principal;
    match entry.kind {
        TxKind::Stake => {
            position.principal = old_principal
                .checked_add(entry.amount)
                .ok_or(LedgerError::MathOverflow)?;
            if old_principal == 0 {
                position.stake_start_time = entry.timestamp;
            }
            position.last_stake_time = entry.timestamp;
        }
        TxKind::Unstake => {
            position.principal = old_principal.checked_sub(entry.amount).ok_or(
                LedgerError::InsufficientStakeBalance {
                    requested: entry.amount,
                    available: old_principal,
                },
            )?;
            if position.principal == 0 {
                position.stake_start_time = 0;
            }
        }
        TxKind::Claim => {
            // Whole lamports only; the sub-lamport remainder stays pending
            let claimed = lamports_to_wad(entry.amount)?;
            position.pending_rewards = position
                .pending_rewards
                .checked_sub(claimed)
                .ok_or(LedgerError::NothingToClaim)?;
            position.total_claimed = position
                .total_claimed
                .checked_add(claimed)
                .ok_or(LedgerError::MathOverflow)?;
        }
    }

    let old_shares = position.recompute_shares()?;
    pool.apply_delta(old_principal, position.principal, old_shares, position.shares)?;
    position.reset_debt(pool)?;

    position.total_fees_paid = position
        .total_fees_paid
        .checked_add(entry.fee_lamports)
        .ok_or(LedgerError::MathOverflow)?;
    position.last_sequence = entry.id;
    Ok(())
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    base.saturating_mul(1u32 << shift)
}

impl<S, C, P, B> SettlementEngine<S, C, P, B>
where
    S: LedgerStore,
    C: ChainAdapter,
    P: PriceOracle,
    B: BoosterResolver,
{
    /// Tick the pool, run `mutate`, and commit pool + position atomically.
    /// Conflicts restart from a fresh read with exponential backoff.
    ///
    /// With `applied_entry` set, returns `Ok(None)` if that entry was already
    /// applied. A missing position is created only when `create_with` names
    /// its wallet.
    pub(crate) async fn commit_with_retry<T, F>(
        &self,
        user_id: &str,
        create_with: Option<Pubkey>,
        applied_entry: Option<u64>,
        mut mutate: F,
    ) -> Result<Option<Committed<T>>, LedgerError>
    where
        F: FnMut(&mut RewardPool, &mut Position) -> Result<T, LedgerError> + Send,
        T: Send,
    {
        let attempts = self.config.max_commit_retries;
        for attempt in 1..=attempts {
            if let Some(id) = applied_entry {
                let entry = self
                    .store
                    .load_transaction(id)?
                    .ok_or(LedgerError::TransactionNotFound(id))?;
                if entry.applied {
                    return Ok(None);
                }
            }

            let pool = self.store.load_pool()?.ok_or(LedgerError::NotInitialized)?;
            let (position_version, mut position) = match self.store.load_position(user_id)? {
                Some(stored) => (Some(stored.version), stored.record),
                None => match create_with {
                    Some(wallet) => (None, Position::new(user_id.to_string(), wallet)),
                    None => return Err(LedgerError::PositionNotFound(user_id.to_string())),
                },
            };

            let now = self.now();
            let mut next_pool = pool.record.clone();
            let distributed = next_pool.tick(now)?;
            let value = mutate(&mut next_pool, &mut position)?;
            if next_pool.total_shares != pool.record.total_shares {
                next_pool.close_window(now);
            }

            match self.store.commit(PositionCommit {
                pool_version: pool.version,
                pool: &next_pool,
                position_version,
                position: &position,
                applied_entry,
            }) {
                Ok(()) => {
                    if distributed > 0 {
                        emit_pool_tick(distributed, next_pool.acc_reward_per_share, now);
                    }
                    return Ok(Some(Committed {
                        pool: next_pool,
                        position,
                        value,
                    }));
                }
                Err(LedgerError::ConcurrencyConflict) if attempt < attempts => {
                    let delay = backoff(self.config.commit_backoff, attempt);
                    msg!(
                        "Commit conflict for {} (attempt {}/{}), retrying in {:?}",
                        user_id,
                        attempt,
                        attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(LedgerError::ConcurrencyConflict) => break,
                Err(e) => return Err(e),
            }
        }
        Err(LedgerError::RetriesExhausted { attempts })
    }

    /// Step 4 for a ledger entry. Safe to call again for an applied entry.
    pub(crate) async fn apply_entry(
        &self,
        entry: &TransactionEntry,
        boosters: Option<&ResolvedBoosters>,
    ) -> Result<(), LedgerError> {
        let create_with = (entry.kind == TxKind::Stake).then_some(entry.wallet);
        let committed = self
            .commit_with_retry(&entry.user_id, create_with, Some(entry.id), |pool, position| {
                apply_mutation(pool, position, entry, boosters)
            })
            .await?;

        match committed {
            Some(c) => msg!(
                "Applied {:?} #{} to {}: principal {}, shares {}",
                entry.kind,
                entry.id,
                entry.user_id,
                c.position.principal,
                c.position.shares
            ),
            None => msg!("#{} was already applied", entry.id),
        }
        Ok(())
    }

    /// Resolve boosters when the cache is stale or invalid. A resolver failure
    /// keeps the cached multiplier.
    pub(crate) async fn resolve_boosters_if_needed(
        &self,
        position: Option<&Position>,
        wallet: &Pubkey,
    ) -> Option<ResolvedBoosters> {
        let now = self.now();
        if let Some(position) = position {
            if !cache_is_stale(position, now, self.config.booster_cache_ttl_seconds)
                && !cache_is_invalid(position, self.config.max_booster_multiplier)
            {
                return None;
            }
        }
        match self.resolve_boosters(wallet).await {
            Ok(resolved) => Some(resolved),
            Err(err) => {
                msg!("Booster lookup failed: {}; keeping cached multiplier", err);
                None
            }
        }
    }

    pub(crate) async fn resolve_boosters(
        &self,
        wallet: &Pubkey,
    ) -> Result<ResolvedBoosters, LedgerError> {
        let boosters = bounded(self.config.chain_timeout, self.boosters.resolve(wallet))
            .await
            .map_err(|e| LedgerError::BoosterUnavailable(e.to_string()))?;
        let multiplier = combined_multiplier(
            &boosters,
            self.config.stacking_mode,
            self.config.max_booster_multiplier,
        )?;
        Ok(ResolvedBoosters {
            boosters,
            multiplier,
            resolved_at: self.now(),
        })
    }
}
