//! Fixed-point math for reward accrual
//!
//! Scale factor: 10^18 (WAD precision)
//! SOL quantities inside the ledger are WAD-lamports (lamports × WAD).
//! Products that can exceed u128 go through U256.

use crate::error::LedgerError;
use uint::construct_uint;

construct_uint! {
    /// 256-bit unsigned integer for large intermediate values
    pub struct U256(4);
}

/// Scale factor: 10^18 (WAD)
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Emission period for the continuous-annual-rate model
pub const SECONDS_IN_YEAR: u64 = 365 * 24 * 60 * 60;

/// Basis point denominator for percentage fees
pub const BPS_DENOMINATOR: u128 = 10_000;

impl U256 {
    /// Create U256 from u128
    pub const fn from_u128(val: u128) -> Self {
        U256([val as u64, (val >> 64) as u64, 0, 0])
    }

    /// Convert to u128, returning None if overflow
    pub fn to_u128(&self) -> Option<u128> {
        if self.0[2] != 0 || self.0[3] != 0 {
            return None;
        }
        Some((self.0[1] as u128) << 64 | self.0[0] as u128)
    }

    /// Convert to [u8; 32] for storage
    pub fn to_le_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (i, word) in self.0.iter().enumerate() {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Create from [u8; 32] storage
    pub fn from_le_bytes(bytes: &[u8; 32]) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(chunk);
        }
        U256(words)
    }
}

/// Multiply two WAD-scaled values, returning WAD-scaled result
pub fn wad_mul(a: u128, b: u128) -> Result<u128, LedgerError> {
    mul_div(a, b, WAD)
}

/// floor(a * b / denominator) with a 256-bit intermediate
pub fn mul_div(a: u128, b: u128, denominator: u128) -> Result<u128, LedgerError> {
    if denominator == 0 {
        return Err(LedgerError::MathOverflow);
    }
    let result = U256::from_u128(a)
        .checked_mul(U256::from_u128(b))
        .ok_or(LedgerError::MathOverflow)?
        / U256::from_u128(denominator);
    result.to_u128().ok_or(LedgerError::MathOverflow)
}

/// Full-width product, used for reward debt (shares × acc can exceed u128)
pub fn mul_u256(a: u128, b: u128) -> Result<U256, LedgerError> {
    U256::from_u128(a)
        .checked_mul(U256::from_u128(b))
        .ok_or(LedgerError::MathOverflow)
}

/// Lamports to WAD-lamports
pub fn lamports_to_wad(lamports: u64) -> Result<u128, LedgerError> {
    (lamports as u128)
        .checked_mul(WAD)
        .ok_or(LedgerError::MathOverflow)
}

/// WAD-lamports to whole lamports (floor)
pub fn wad_to_lamports(value: u128) -> Result<u64, LedgerError> {
    u64::try_from(value / WAD).map_err(|_| LedgerError::MathOverflow)
}

/// Emission for `dt` seconds under the continuous-annual-rate model:
/// `budget × dt / SECONDS_IN_YEAR`, never more than the budget itself.
pub fn annual_emission(budget: u128, dt: i64) -> Result<u128, LedgerError> {
    if dt <= 0 || budget == 0 {
        return Ok(0);
    }
    let emitted = mul_div(budget, dt as u128, SECONDS_IN_YEAR as u128)?;
    Ok(emitted.min(budget))
}

/// Reward shares for a principal under a WAD-scaled booster multiplier
pub fn boosted_shares(principal: u64, multiplier: u128) -> Result<u128, LedgerError> {
    mul_div(principal as u128, multiplier, WAD)
}

/// Percentage-of-amount fee in lamports: amount × bps × rate / (10_000 × WAD).
/// `rate` is WAD-scaled lamports per token base unit.
pub fn percentage_fee_lamports(amount: u64, fee_bps: u16, rate: u128) -> Result<u64, LedgerError> {
    let fee_tokens_wad = mul_div(amount as u128, fee_bps as u128 * WAD, BPS_DENOMINATOR)?;
    let fee_wad_lamports = wad_mul(fee_tokens_wad, rate)?;
    wad_to_lamports(fee_wad_lamports)
}
