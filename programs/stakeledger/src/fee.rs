//! Fee quoting

use std::future::Future;

use crate::chain::bounded;
use crate::config::EngineConfig;
use crate::error::{ExternalError, LedgerError};
use crate::math::percentage_fee_lamports;
use crate::state::TxKind;

/// Token/SOL exchange rate source. Implementations may cache; staleness up to
/// their own TTL is acceptable.
pub trait PriceOracle: Send + Sync {
    /// WAD-scaled lamports per token base unit
    fn token_rate(&self) -> impl Future<Output = Result<u128, ExternalError>> + Send;
}

/// Lamports the caller must have paid before `kind` may proceed
pub async fn quote_fee<P: PriceOracle>(
    oracle: &P,
    config: &EngineConfig,
    kind: TxKind,
    amount: u64,
) -> Result<u64, LedgerError> {
    let fee_bps = match kind {
        TxKind::Claim => return Ok(config.claim_fee_lamports),
        TxKind::Stake => config.stake_fee_bps,
        TxKind::Unstake => config.unstake_fee_bps,
    };
    if fee_bps == 0 {
        return Ok(0);
    }
    let rate = bounded(config.chain_timeout, oracle.token_rate())
        .await
        .map_err(|e| LedgerError::PriceUnavailable(e.to_string()))?;
    if rate == 0 {
        return Err(LedgerError::PriceUnavailable("zero exchange rate".into()));
    }
    percentage_fee_lamports(amount, fee_bps, rate)
}
