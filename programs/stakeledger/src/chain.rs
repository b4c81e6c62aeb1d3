//! Chain adapter boundary
//!
//! Every call crossing the network is wrapped in `bounded`; a timeout is a
//! failure, never an assumed success.

use std::future::Future;
use std::time::Duration;

use solana_program::pubkey::Pubkey;

use crate::error::ExternalError;

pub trait ChainAdapter: Send + Sync {
    /// Check that `signature` is a confirmed payment of at least
    /// `expected_lamports` to the fee account
    fn verify_fee(
        &self,
        signature: &str,
        expected_lamports: u64,
    ) -> impl Future<Output = Result<bool, ExternalError>> + Send;

    /// Send staked tokens from the vault back to `recipient`
    fn transfer_token(
        &self,
        recipient: &Pubkey,
        amount: u64,
    ) -> impl Future<Output = Result<String, ExternalError>> + Send;

    /// Send reward lamports from the vault to `recipient`
    fn transfer_sol(
        &self,
        recipient: &Pubkey,
        lamports: u64,
    ) -> impl Future<Output = Result<String, ExternalError>> + Send;

    /// Token balance the vault can pay unstakes from
    fn vault_token_balance(&self) -> impl Future<Output = Result<u64, ExternalError>> + Send;

    /// Lamports the vault can pay rewards from
    fn vault_sol_balance(&self) -> impl Future<Output = Result<u64, ExternalError>> + Send;
}

/// Run a collaborator call with a deadline
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, ExternalError>
where
    F: Future<Output = Result<T, ExternalError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ExternalError::Timeout),
    }
}
