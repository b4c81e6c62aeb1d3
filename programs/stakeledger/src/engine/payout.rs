//! Payout phase (step 5) and outcome recording (step 6)

use solana_program::msg;

use crate::booster::BoosterResolver;
use crate::chain::{bounded, ChainAdapter};
use crate::error::{ExternalError, LedgerError};
use crate::events::emit_settlement;
use crate::fee::PriceOracle;
use crate::state::{PayoutFailure, TransactionEntry, TxKind, TxStatus};
use crate::store::LedgerStore;

use super::SettlementEngine;

impl From<ExternalError> for PayoutFailure {
    fn from(err: ExternalError) -> Self {
        match err {
            ExternalError::Timeout => PayoutFailure::Timeout,
            ExternalError::Unavailable(reason) | ExternalError::Rejected(reason) => {
                PayoutFailure::Rejected(reason)
            }
        }
    }
}

impl<S, C, P, B> SettlementEngine<S, C, P, B>
where
    S: LedgerStore,
    C: ChainAdapter,
    P: PriceOracle,
    B: BoosterResolver,
{
    /// Move the asset owed by `entry` out of the vault. STAKE has nothing to
    /// pay out. Vault liquidity is checked first so an empty vault is reported
    /// as such rather than as a generic transfer failure.
    pub(crate) async fn execute_payout(
        &self,
        entry: &TransactionEntry,
    ) -> Result<Option<String>, PayoutFailure> {
        let timeout = self.config.chain_timeout;
        match entry.kind {
            TxKind::Stake => Ok(None),
            TxKind::Unstake => {
                let available = bounded(timeout, self.chain.vault_token_balance()).await?;
                if available < entry.amount {
                    return Err(PayoutFailure::InsufficientVaultLiquidity {
                        available,
                        required: entry.amount,
                    });
                }
                let signature =
                    bounded(timeout, self.chain.transfer_token(&entry.wallet, entry.amount))
                        .await?;
                Ok(Some(signature))
            }
            TxKind::Claim => {
                let available = bounded(timeout, self.chain.vault_sol_balance()).await?;
                if available < entry.amount {
                    return Err(PayoutFailure::InsufficientVaultLiquidity {
                        available,
                        required: entry.amount,
                    });
                }
                let signature =
                    bounded(timeout, self.chain.transfer_sol(&entry.wallet, entry.amount)).await?;
                Ok(Some(signature))
            }
        }
    }

    /// Record a payout result: `success` status with the signature, or
    /// PAYOUT_FAILED with the reason.
    pub(crate) fn finalize(
        &self,
        entry: &TransactionEntry,
        result: Result<Option<String>, PayoutFailure>,
        success: TxStatus,
    ) -> Result<TransactionEntry, LedgerError> {
        let mut update = entry.update();
        match result {
            Ok(signature) => {
                update.status = success;
                update.payout_signature = signature;
                if entry.kind != TxKind::Stake {
                    update.payout_attempts = update.payout_attempts.saturating_add(1);
                }
            }
            Err(failure) => {
                msg!("Payout for #{} failed: {}", entry.id, failure);
                update.status = TxStatus::PayoutFailed;
                update.payout_attempts = update.payout_attempts.saturating_add(1);
                update.last_failure = Some(failure);
            }
        }

        let updated = self.store.update_transaction(entry.id, update)?;
        emit_settlement(&updated, self.now());
        match &updated.payout_signature {
            Some(signature) => msg!("#{} {:?} with payout {}", updated.id, updated.status, signature),
            None => msg!("#{} {:?}", updated.id, updated.status),
        }
        Ok(updated)
    }

    pub(crate) fn record_failure(
        &self,
        entry: &TransactionEntry,
        failure: PayoutFailure,
    ) -> Result<TransactionEntry, LedgerError> {
        self.finalize(entry, Err(failure), TxStatus::PayoutFailed)
    }
}
