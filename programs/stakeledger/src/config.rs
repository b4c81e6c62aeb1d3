//! Engine configuration
//!
//! Defaults are usable as-is; `validate` enforces the same kind of caps the
//! pool settings had, and `from_ini_str`/`load` read an INI file with
//! sections `[fees]`, `[staking]`, `[boosters]`, `[chain]` and `[reconcile]`.

use std::time::Duration;

use configparser::ini::Ini;
use solana_program::msg;

use crate::error::LedgerError;
use crate::math::WAD;

/// Maximum percentage fee: 50%
const MAX_FEE_BPS: u16 = 5_000;

/// Maximum lock duration: 365 days. Prevents trapping stakers indefinitely.
const MAX_LOCK_DURATION_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Maximum combined booster multiplier: 10x
const MAX_BOOSTER_MULTIPLIER: u128 = 10 * WAD;

/// Upper bound on a single chain call
const MAX_CHAIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on retry budgets
const MAX_RETRIES: u32 = 20;

/// How booster multipliers from several categories combine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackingMode {
    /// Product of the strongest multiplier in each category
    Multiplicative,
    /// Only the single largest multiplier applies
    MaxTier,
}

impl std::str::FromStr for StackingMode {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "multiplicative" => Ok(StackingMode::Multiplicative),
            "max_tier" | "maxtier" => Ok(StackingMode::MaxTier),
            other => Err(LedgerError::InvalidConfig(format!(
                "unknown stacking mode '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Entries younger than this are left to the operation still running them
    pub grace_period_seconds: u64,
    /// Payout attempts (engine + sweep) before escalating to an operator
    pub max_payout_attempts: u32,
    /// Page size for full ledger scans
    pub scan_page_size: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            grace_period_seconds: 300,
            max_payout_attempts: 5,
            scan_page_size: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Stake fee as basis points of the staked amount, priced in SOL
    pub stake_fee_bps: u16,
    /// Unstake fee as basis points of the unstaked amount, priced in SOL
    pub unstake_fee_bps: u16,
    /// Flat claim fee (lamports)
    pub claim_fee_lamports: u64,
    /// Minimum resulting principal for a stake (0 = no minimum)
    pub min_stake_amount: u64,
    /// Seconds after the last stake before unstake is allowed (0 = no lock)
    pub lock_duration_seconds: u64,
    pub stacking_mode: StackingMode,
    pub booster_cache_ttl_seconds: u64,
    /// Cap on the combined multiplier (WAD-scaled)
    pub max_booster_multiplier: u128,
    /// Bound on each chain/oracle/booster call
    pub chain_timeout: Duration,
    /// Attempts for the atomic position commit under contention
    pub max_commit_retries: u32,
    /// Base delay for exponential backoff between commit attempts
    pub commit_backoff: Duration,
    pub reconcile: ReconcileConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stake_fee_bps: 100,
            unstake_fee_bps: 100,
            claim_fee_lamports: 5_000_000,
            min_stake_amount: 0,
            lock_duration_seconds: 0,
            stacking_mode: StackingMode::Multiplicative,
            booster_cache_ttl_seconds: 3_600,
            max_booster_multiplier: 5 * WAD,
            chain_timeout: Duration::from_secs(30),
            max_commit_retries: 5,
            commit_backoff: Duration::from_millis(50),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.stake_fee_bps > MAX_FEE_BPS {
            return Err(LedgerError::SettingExceedsMaximum("stake_fee_bps"));
        }
        if self.unstake_fee_bps > MAX_FEE_BPS {
            return Err(LedgerError::SettingExceedsMaximum("unstake_fee_bps"));
        }
        if self.lock_duration_seconds > MAX_LOCK_DURATION_SECONDS {
            return Err(LedgerError::SettingExceedsMaximum("lock_duration_seconds"));
        }
        if self.max_booster_multiplier > MAX_BOOSTER_MULTIPLIER {
            return Err(LedgerError::SettingExceedsMaximum("max_booster_multiplier"));
        }
        if self.max_booster_multiplier < WAD {
            return Err(LedgerError::InvalidConfig(
                "max_booster_multiplier must be at least 1.0".into(),
            ));
        }
        if self.chain_timeout > MAX_CHAIN_TIMEOUT {
            return Err(LedgerError::SettingExceedsMaximum("chain_timeout"));
        }
        if self.chain_timeout.is_zero() {
            return Err(LedgerError::InvalidConfig("chain_timeout must be non-zero".into()));
        }
        if self.max_commit_retries == 0 || self.max_commit_retries > MAX_RETRIES {
            return Err(LedgerError::SettingExceedsMaximum("max_commit_retries"));
        }
        if self.reconcile.max_payout_attempts == 0 || self.reconcile.max_payout_attempts > MAX_RETRIES
        {
            return Err(LedgerError::SettingExceedsMaximum("max_payout_attempts"));
        }
        if self.reconcile.scan_page_size == 0 {
            return Err(LedgerError::InvalidConfig("scan_page_size must be non-zero".into()));
        }
        Ok(())
    }

    /// Load from an INI file; missing keys keep their defaults
    pub fn load(path: &str) -> Result<Self, LedgerError> {
        let mut ini = Ini::new();
        ini.load(path)
            .map_err(|e| LedgerError::InvalidConfig(format!("{}: {}", path, e)))?;
        Self::from_ini(&ini)
    }

    pub fn from_ini_str(contents: &str) -> Result<Self, LedgerError> {
        let mut ini = Ini::new();
        ini.read(contents.to_string())
            .map_err(LedgerError::InvalidConfig)?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, LedgerError> {
        let mut config = Self::default();

        if let Some(v) = get_u64(ini, "fees", "stake_fee_bps")? {
            config.stake_fee_bps = to_bps(v, "stake_fee_bps")?;
        }
        if let Some(v) = get_u64(ini, "fees", "unstake_fee_bps")? {
            config.unstake_fee_bps = to_bps(v, "unstake_fee_bps")?;
        }
        if let Some(v) = get_u64(ini, "fees", "claim_fee_lamports")? {
            config.claim_fee_lamports = v;
        }
        if let Some(v) = get_u64(ini, "staking", "min_stake_amount")? {
            config.min_stake_amount = v;
        }
        if let Some(v) = get_u64(ini, "staking", "lock_duration_seconds")? {
            config.lock_duration_seconds = v;
        }
        if let Some(v) = ini.get("boosters", "stacking_mode") {
            config.stacking_mode = v.parse()?;
        }
        if let Some(v) = get_u64(ini, "boosters", "cache_ttl_seconds")? {
            config.booster_cache_ttl_seconds = v;
        }
        if let Some(v) = get_u64(ini, "boosters", "max_multiplier_bps")? {
            // 10_000 bps = 1.0x
            config.max_booster_multiplier = (v as u128)
                .checked_mul(WAD / 10_000)
                .ok_or(LedgerError::SettingExceedsMaximum("max_multiplier_bps"))?;
        }
        if let Some(v) = get_u64(ini, "chain", "timeout_ms")? {
            config.chain_timeout = Duration::from_millis(v);
        }
        if let Some(v) = get_u64(ini, "chain", "max_commit_retries")? {
            config.max_commit_retries = to_u32(v, "max_commit_retries")?;
        }
        if let Some(v) = get_u64(ini, "chain", "commit_backoff_ms")? {
            config.commit_backoff = Duration::from_millis(v);
        }
        if let Some(v) = get_u64(ini, "reconcile", "grace_period_seconds")? {
            config.reconcile.grace_period_seconds = v;
        }
        if let Some(v) = get_u64(ini, "reconcile", "max_payout_attempts")? {
            config.reconcile.max_payout_attempts = to_u32(v, "max_payout_attempts")?;
        }
        if let Some(v) = get_u64(ini, "reconcile", "scan_page_size")? {
            config.reconcile.scan_page_size = v as usize;
        }

        config.validate()?;
        msg!(
            "Loaded config: stake_fee_bps={}, unstake_fee_bps={}, claim_fee={}, stacking={:?}",
            config.stake_fee_bps,
            config.unstake_fee_bps,
            config.claim_fee_lamports,
            config.stacking_mode
        );
        Ok(config)
    }
}

fn get_u64(ini: &Ini, section: &str, key: &str) -> Result<Option<u64>, LedgerError> {
    ini.getuint(section, key)
        .map_err(|e| LedgerError::InvalidConfig(format!("[{}] {}: {}", section, key, e)))
}

fn to_bps(v: u64, name: &'static str) -> Result<u16, LedgerError> {
    u16::try_from(v).map_err(|_| LedgerError::SettingExceedsMaximum(name))
}

fn to_u32(v: u64, name: &'static str) -> Result<u32, LedgerError> {
    u32::try_from(v).map_err(|_| LedgerError::SettingExceedsMaximum(name))
}
