//! Position drift check
//!
//! Rebuilds the log-derived fields of each position by replaying its applied
//! ledger entries, and repairs positions that disagree. Reward-accrual fields
//! are kept unless they fail sanity checks.

use std::collections::{BTreeMap, BTreeSet};

use solana_program::{clock::UnixTimestamp, msg};

use crate::booster::{cache_is_invalid, BoosterResolver};
use crate::chain::ChainAdapter;
use crate::error::LedgerError;
use crate::events::{DriftAlert, OperatorAlerts};
use crate::fee::PriceOracle;
use crate::math::{mul_u256, U256, WAD};
use crate::state::{Position, RewardPool, TransactionEntry, TxKind};
use crate::store::LedgerStore;

use super::{scan_all, ReconcileScope, ReconciliationJob};

/// Position fields derivable from the ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerView {
    pub principal: u64,
    pub total_fees_paid: u64,
    pub stake_start_time: UnixTimestamp,
    pub last_stake_time: UnixTimestamp,
    pub last_sequence: u64,
}

impl LedgerView {
    pub fn of(position: &Position) -> Self {
        Self {
            principal: position.principal,
            total_fees_paid: position.total_fees_paid,
            stake_start_time: position.stake_start_time,
            last_stake_time: position.last_stake_time,
            last_sequence: position.last_sequence,
        }
    }
}

/// One repaired position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftRepair {
    pub user_id: String,
    pub recorded: LedgerView,
    pub expected: LedgerView,
    /// Accrual fields that were reset
    pub sanitized: Vec<&'static str>,
    /// The position record was missing and has been rebuilt from the ledger
    pub recreated: bool,
}

/// A user the drift check could not reconcile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftFailure {
    pub user_id: String,
    pub error: LedgerError,
}

/// Replay applied entries in sequence order
pub fn replay<'a, I>(entries: I) -> Result<LedgerView, LedgerError>
where
    I: IntoIterator<Item = &'a TransactionEntry>,
{
    let mut applied: Vec<&TransactionEntry> = entries.into_iter().filter(|e| e.applied).collect();
    applied.sort_by_key(|e| e.id);

    let mut view = LedgerView::default();
    for entry in applied {
        match entry.kind {
            TxKind::Stake => {
                if view.principal == 0 {
                    view.stake_start_time = entry.timestamp;
                }
                view.principal = view
                    .principal
                    .checked_add(entry.amount)
                    .ok_or(LedgerError::MathOverflow)?;
                view.last_stake_time = entry.timestamp;
            }
            TxKind::Unstake => {
                view.principal = view
                    .principal
                    .checked_sub(entry.amount)
                    .ok_or(LedgerError::MathUnderflow)?;
                if view.principal == 0 {
                    view.stake_start_time = 0;
                }
            }
            TxKind::Claim => {}
        }
        view.total_fees_paid = view
            .total_fees_paid
            .checked_add(entry.fee_lamports)
            .ok_or(LedgerError::MathOverflow)?;
        view.last_sequence = entry.id;
    }
    Ok(view)
}

/// Reset accrual fields that cannot be right. Returns the names of the fields
/// touched. Runs before settlement.
pub fn sanitize_accrual(position: &mut Position, pool: &RewardPool, cap: u128) -> Vec<&'static str> {
    let mut sanitized = Vec::new();

    if cache_is_invalid(position, cap) {
        position.booster_multiplier = WAD;
        position.active_boosters.clear();
        position.booster_cache_time = 0;
        sanitized.push("booster_multiplier");
    }

    // Debt above shares × acc would make settlement underflow
    match mul_u256(position.shares, pool.acc_reward_per_share) {
        Ok(ceiling) if position.get_reward_debt() > ceiling => {
            position.set_reward_debt(ceiling);
            sanitized.push("reward_debt");
        }
        Ok(_) => {}
        Err(_) => {
            position.set_reward_debt(U256::zero());
            sanitized.push("reward_debt");
        }
    }

    let credited = position.pending_rewards.checked_add(position.total_claimed);
    if credited.map_or(true, |c| c != position.total_accrued) {
        position.total_accrued = credited.unwrap_or(u128::MAX);
        sanitized.push("total_accrued");
    }

    sanitized
}

impl<S, C, P, B, A> ReconciliationJob<S, C, P, B, A>
where
    S: LedgerStore,
    C: ChainAdapter,
    P: PriceOracle,
    B: BoosterResolver,
    A: OperatorAlerts,
{
    /// Check every user in `scope`. A user whose ledger cannot be replayed or
    /// whose repair fails is reported and alerted, and the check moves on.
    pub(crate) async fn check_drift(
        &self,
        scope: &ReconcileScope,
    ) -> Result<(Vec<DriftRepair>, Vec<DriftFailure>), LedgerError> {
        let store = self.engine.store();
        let page_size = self.engine.config().reconcile.scan_page_size;

        let mut by_user: BTreeMap<String, Vec<TransactionEntry>> = BTreeMap::new();
        for entry in scan_all(store.as_ref(), page_size)? {
            if scope.includes(&entry.user_id) {
                by_user.entry(entry.user_id.clone()).or_default().push(entry);
            }
        }
        let mut users: BTreeSet<String> = by_user.keys().cloned().collect();
        match scope {
            ReconcileScope::All => {
                users.extend(store.list_positions()?.into_iter().map(|p| p.record.user_id));
            }
            ReconcileScope::User(user_id) => {
                users.insert(user_id.clone());
            }
        }

        let pool = store.load_pool()?.ok_or(LedgerError::NotInitialized)?.record;
        let mut repairs = Vec::new();
        let mut failures = Vec::new();
        for user_id in users {
            let entries = by_user.get(&user_id).map(Vec::as_slice).unwrap_or(&[]);
            match self.check_user(&user_id, entries, &pool).await {
                Ok(Some(repair)) => {
                    if repair.recreated {
                        self.alerts.drift_alert(DriftAlert {
                            user_id: user_id.clone(),
                            reason: format!(
                                "position record missing; rebuilt from ledger with principal {}, \
                                 earlier accrued rewards not recoverable",
                                repair.expected.principal
                            ),
                        });
                    }
                    repairs.push(repair);
                }
                Ok(None) => {}
                Err(error) => {
                    msg!("Drift check for {} failed: {}", user_id, error);
                    self.alerts.drift_alert(DriftAlert {
                        user_id: user_id.clone(),
                        reason: error.to_string(),
                    });
                    failures.push(DriftFailure { user_id, error });
                }
            }
        }
        Ok((repairs, failures))
    }

    /// Compare against a snapshot; repair only on a mismatch
    async fn check_user(
        &self,
        user_id: &str,
        entries: &[TransactionEntry],
        pool: &RewardPool,
    ) -> Result<Option<DriftRepair>, LedgerError> {
        let cap = self.engine.config().max_booster_multiplier;
        let expected = replay(entries)?;
        match self.engine.store().load_position(user_id)? {
            Some(position) => {
                let mut snapshot = position.record;
                if LedgerView::of(&snapshot) == expected
                    && sanitize_accrual(&mut snapshot, pool, cap).is_empty()
                {
                    return Ok(None);
                }
            }
            None if !entries.iter().any(|e| e.applied) => return Ok(None),
            None => {}
        }
        // Confirm under the user lock against a fresh read
        self.repair_position(user_id).await
    }

    async fn repair_position(&self, user_id: &str) -> Result<Option<DriftRepair>, LedgerError> {
        let _guard = self.engine.locks().lock(user_id).await;
        let store = self.engine.store();
        let cap = self.engine.config().max_booster_multiplier;

        let entries = store.user_transactions(user_id)?;
        let expected = replay(&entries)?;
        let recreated = store.load_position(user_id)?.is_none();
        // Wallet of the latest applied entry, for a position that has to be rebuilt
        let create_with = entries.iter().rev().find(|e| e.applied).map(|e| e.wallet);

        let committed = self
            .engine
            .commit_with_retry(user_id, create_with, None, |pool, position| {
                let recorded = LedgerView::of(position);
                let sanitized = sanitize_accrual(position, pool, cap);
                if recorded == expected && sanitized.is_empty() {
                    return Ok(None);
                }

                position.settle(pool)?;
                let old_principal = position.principal;
                position.principal = expected.principal;
                position.total_fees_paid = expected.total_fees_paid;
                position.stake_start_time = expected.stake_start_time;
                position.last_stake_time = expected.last_stake_time;
                position.last_sequence = expected.last_sequence;
                let old_shares = position.recompute_shares()?;

                // The pool counted whatever the drifted position held; the
                // pool-totals check settles any residue
                pool.total_principal = pool
                    .total_principal
                    .saturating_sub(old_principal as u128)
                    .saturating_add(position.principal as u128);
                pool.total_shares = pool
                    .total_shares
                    .saturating_sub(old_shares)
                    .saturating_add(position.shares);
                position.reset_debt(pool)?;

                Ok(Some(DriftRepair {
                    user_id: user_id.to_string(),
                    recorded,
                    expected,
                    sanitized,
                    recreated,
                }))
            })
            .await?;

        let repair = committed.and_then(|c| c.value);
        if let Some(repair) = &repair {
            msg!(
                "Repaired drift for {}: principal {} -> {}, fees {} -> {}, sanitized {:?}{}",
                repair.user_id,
                repair.recorded.principal,
                repair.expected.principal,
                repair.recorded.total_fees_paid,
                repair.expected.total_fees_paid,
                repair.sanitized,
                if repair.recreated { ", record recreated" } else { "" }
            );
        }
        Ok(repair)
    }
}
