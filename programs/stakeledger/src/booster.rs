//! Booster resolution and stacking

use std::collections::BTreeMap;
use std::future::Future;

use solana_program::{clock::UnixTimestamp, pubkey::Pubkey};

use crate::config::StackingMode;
use crate::error::{ExternalError, LedgerError};
use crate::math::{wad_mul, WAD};
use crate::state::{Booster, Position};

/// Looks up the booster categories a wallet currently qualifies for
pub trait BoosterResolver: Send + Sync {
    fn resolve(
        &self,
        wallet: &Pubkey,
    ) -> impl Future<Output = Result<Vec<Booster>, ExternalError>> + Send;
}

/// Boosters fetched for a position, ready to apply on the next commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBoosters {
    pub boosters: Vec<Booster>,
    pub multiplier: u128,
    pub resolved_at: UnixTimestamp,
}

/// Combine booster multipliers under the configured stacking mode.
///
/// Multipliers below 1.0x are ignored; the result is capped at `cap`.
pub fn combined_multiplier(
    boosters: &[Booster],
    mode: StackingMode,
    cap: u128,
) -> Result<u128, LedgerError> {
    // Strongest multiplier per category
    let mut by_category: BTreeMap<&str, u128> = BTreeMap::new();
    for booster in boosters.iter().filter(|b| b.multiplier >= WAD) {
        let entry = by_category.entry(booster.category.as_str()).or_insert(WAD);
        *entry = (*entry).max(booster.multiplier);
    }

    let combined = match mode {
        StackingMode::Multiplicative => {
            let mut product = WAD;
            for multiplier in by_category.values() {
                // Saturate at the cap rather than overflowing on long lists
                product = wad_mul(product, *multiplier)?.min(cap);
            }
            product
        }
        StackingMode::MaxTier => by_category.values().copied().max().unwrap_or(WAD),
    };

    Ok(combined.min(cap).max(WAD))
}

/// Booster cache has never been filled or is older than the TTL
pub fn cache_is_stale(position: &Position, now: UnixTimestamp, ttl_seconds: u64) -> bool {
    position.booster_cache_time == 0
        || now.saturating_sub(position.booster_cache_time) >= ttl_seconds as i64
}

/// Replace the position's booster cache. Callers settle first so rewards up to
/// now accrue at the old multiplier, then recompute shares.
pub fn apply_boosters(position: &mut Position, resolved: &ResolvedBoosters) {
    position.active_boosters = resolved.boosters.clone();
    position.booster_multiplier = resolved.multiplier;
    position.booster_cache_time = resolved.resolved_at;
}

/// Booster cache fields fail basic sanity checks
pub fn cache_is_invalid(position: &Position, cap: u128) -> bool {
    position.booster_multiplier < WAD || position.booster_multiplier > cap
}
