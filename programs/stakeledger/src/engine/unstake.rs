//! Unstake operation

use solana_program::msg;

use crate::booster::BoosterResolver;
use crate::chain::ChainAdapter;
use crate::error::LedgerError;
use crate::fee::PriceOracle;
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
    /// Unstake `amount` tokens and send them back to the position's wallet
    pub async fn unstake(
        &self,
        user_id: &str,
        amount: u64,
        fee_signature: &str,
    ) -> Result<SettlementReceipt, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }

        let _guard = self.locks.lock(user_id).await;

        let position = self
            .store
            .load_position(user_id)?
            .ok_or_else(|| LedgerError::PositionNotFound(user_id.to_string()))?
            .record;

        if amount > position.principal {
            return Err(LedgerError::InsufficientStakeBalance {
                requested: amount,
                available: position.principal,
            });
        }

        // Check lock duration
        let lock = self.config.lock_duration_seconds;
        if lock > 0 {
            let elapsed = self.now().saturating_sub(position.last_stake_time);
            if elapsed < lock as i64 {
                msg!(
                    "Stake locked: {} of {} seconds elapsed since last stake",
                    elapsed,
                    lock
                );
                return Err(LedgerError::StakeLocked);
            }
        }

        let boosters = self
            .resolve_boosters_if_needed(Some(&position), &position.wallet)
            .await;

        let receipt = self
            .run_two_phase(Request {
                user_id,
                wallet: position.wallet,
                kind: TxKind::Unstake,
                amount,
                fee_signature,
                boosters,
            })
            .await?;
        msg!("Unstaked {} tokens for {} (#{})", amount, user_id, receipt.transaction_id);
        Ok(receipt)
    }
}
