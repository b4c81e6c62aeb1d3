//! Claim operation

use solana_program::msg;

use crate::booster::BoosterResolver;
use crate::chain::ChainAdapter;
use crate::error::LedgerError;
use crate::fee::PriceOracle;
use crate::math::wad_to_lamports;
use crate::state::TxKind;
use crate::store::LedgerStore;

use super::{Request, SettlementEngine, SettlementReceipt};

impl<S, C, P, B> SettlementEngine<S, C, P, B>
where
    S: LedgerStore,
    C: ChainAdapter,
    P: PriceOracle,
    B: BoosterResolver,
{
    /// Claim all whole lamports of pending rewards.
    ///
    /// The amount is fixed when the fee is quoted; rewards accrued between
    /// the quote and the commit stay pending for the next claim.
    ///
    /// Transfers move whole lamports, so the sub-lamport part of
    /// `pending_rewards` (under 1e18 WAD-lamports) is never paid out by this
    /// call. It stays in the position and rolls into a later claim once more
    /// rewards accrue on top of it.
    pub async fn claim(
        &self,
        user_id: &str,
        fee_signature: &str,
    ) -> Result<SettlementReceipt, LedgerError> {
        let _guard = self.locks.lock(user_id).await;

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

        // Project pending rewards to now without writing
        pool.tick(self.now())?;
        let pending = position
            .pending_rewards
            .checked_add(position.unsettled_rewards(&pool)?)
            .ok_or(LedgerError::MathOverflow)?;
        let amount = wad_to_lamports(pending)?;
        if amount == 0 {
            msg!("No pending rewards to claim");
            return Err(LedgerError::NothingToClaim);
        }

        let boosters = self
            .resolve_boosters_if_needed(Some(&position), &position.wallet)
            .await;

        let receipt = self
            .run_two_phase(Request {
                user_id,
                wallet: position.wallet,
                kind: TxKind::Claim,
                amount,
                fee_signature,
                boosters,
            })
            .await?;
        msg!("Claimed {} lamports in rewards for {}", amount, user_id);
        Ok(receipt)
    }
}
