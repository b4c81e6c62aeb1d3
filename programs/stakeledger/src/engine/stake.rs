//! Stake operation

use solana_program::{msg, pubkey::Pubkey};

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
    /// Stake `amount` tokens for `user_id`.
    ///
    /// The tokens travel to the vault in the same chain transaction that pays
    /// the fee, so there is no payout phase. `wallet` becomes the payout
    /// recipient on the first stake and must match on later ones.
    pub async fn stake(
        &self,
        user_id: &str,
        wallet: Pubkey,
        amount: u64,
        fee_signature: &str,
    ) -> Result<SettlementReceipt, LedgerError> {
        if user_id.trim().is_empty() {
            return Err(LedgerError::InvalidUserId);
        }
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }

        let _guard = self.locks.lock(user_id).await;

        if self.store.load_pool()?.is_none() {
            return Err(LedgerError::NotInitialized);
        }
        let position = self.store.load_position(user_id)?.map(|p| p.record);

        let current = match &position {
            Some(existing) => {
                if existing.wallet != wallet {
                    return Err(LedgerError::WalletMismatch);
                }
                existing.principal
            }
            None => 0,
        };

        // Enforce minimum stake (first stake and resulting total)
        let minimum = self.config.min_stake_amount;
        if minimum > 0 {
            let new_total = current.checked_add(amount).ok_or(LedgerError::MathOverflow)?;
            if new_total < minimum {
                return Err(LedgerError::BelowMinimumStake { minimum });
            }
        }

        let boosters = self.resolve_boosters_if_needed(position.as_ref(), &wallet).await;

        let receipt = self
            .run_two_phase(Request {
                user_id,
                wallet,
                kind: TxKind::Stake,
                amount,
                fee_signature,
                boosters,
            })
            .await?;
        msg!("Staked {} tokens for {} (#{})", amount, user_id, receipt.transaction_id);
        Ok(receipt)
    }
}
