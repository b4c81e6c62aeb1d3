//! StakeLedger: SOL staking rewards with two-phase settlement
//!
//! Stakers earn SOL from a reward budget emitted at a continuous annual rate
//! and shared out through an accumulator:
//!
//! `pending = shares × acc_reward_per_share − reward_debt`
//!
//! - `shares = principal × booster_multiplier`
//! - each tick adds `emitted / total_shares` to the accumulator
//! - idle time (no shares staked) emits nothing
//!
//! Every stake, unstake and claim pays a fee that is verified on chain
//! before anything is written. The local position update and the on-chain
//! payout are separate steps tracked by an append-only ledger entry, and the
//! reconciliation job finishes or escalates entries whose payout failed.

pub mod booster;
pub mod chain;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fee;
pub mod math;
pub mod reconcile;
pub mod state;
pub mod store;

pub use booster::{BoosterResolver, ResolvedBoosters};
pub use chain::ChainAdapter;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, ReconcileConfig, StackingMode};
pub use engine::{
    PoolOverview, PositionOverview, SettlementEngine, SettlementOutcome, SettlementReceipt,
};
pub use error::{ErrorClass, ExternalError, LedgerError};
pub use events::{DriftAlert, LogAlerts, OperatorAlert, OperatorAlerts};
pub use fee::PriceOracle;
pub use reconcile::{ReconcileReport, ReconcileScope, ReconciliationJob};
pub use state::{
    Booster, PayoutFailure, Position, RewardPool, TransactionEntry, TxKind, TxStatus,
};
pub use store::{LedgerStore, MemoryStore, Versioned};
