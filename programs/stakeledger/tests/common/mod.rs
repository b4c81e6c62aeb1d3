#![allow(dead_code)]
//! Shared harness for integration tests: in-memory store, scripted chain,
//! fixed-rate oracle, booster table and an alert recorder.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use solana_program::pubkey::Pubkey;
use stakeledger::math::WAD;
use stakeledger::state::{NewTransaction, TransactionUpdate};
use stakeledger::store::PositionCommit;
use stakeledger::{
    Booster, BoosterResolver, ChainAdapter, Clock, EngineConfig, ExternalError, LedgerError,
    DriftAlert, LedgerStore, ManualClock, MemoryStore, OperatorAlert, OperatorAlerts, Position,
    PriceOracle,
    ReconciliationJob, RewardPool, SettlementEngine, TransactionEntry, Versioned,
};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// How a scripted transfer behaves
#[derive(Debug, Clone)]
pub enum TransferFault {
    Fail(ExternalError),
    /// Never answers (exercises the timeout)
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub token: bool,
    pub recipient: Pubkey,
    pub amount: u64,
    pub signature: String,
}

#[derive(Debug, Default)]
struct ChainState {
    paid_fees: HashMap<String, u64>,
    token_balance: u64,
    sol_balance: u64,
    faults: VecDeque<TransferFault>,
    transfers: Vec<Transfer>,
    verify_calls: u32,
    next_signature: u64,
}

#[derive(Debug, Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new(token_balance: u64, sol_balance: u64) -> Self {
        let chain = Self::default();
        {
            let mut state = chain.state.lock().unwrap();
            state.token_balance = token_balance;
            state.sol_balance = sol_balance;
        }
        chain
    }

    /// Record a fee payment large enough for any quote
    pub fn pay_fee(&self, signature: &str) {
        self.pay_fee_amount(signature, u64::MAX);
    }

    pub fn pay_fee_amount(&self, signature: &str, lamports: u64) {
        self.state
            .lock()
            .unwrap()
            .paid_fees
            .insert(signature.to_string(), lamports);
    }

    pub fn push_fault(&self, fault: TransferFault) {
        self.state.lock().unwrap().faults.push_back(fault);
    }

    pub fn set_sol_balance(&self, lamports: u64) {
        self.state.lock().unwrap().sol_balance = lamports;
    }

    pub fn set_token_balance(&self, amount: u64) {
        self.state.lock().unwrap().token_balance = amount;
    }

    pub fn sol_balance(&self) -> u64 {
        self.state.lock().unwrap().sol_balance
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.state.lock().unwrap().transfers.clone()
    }

    pub fn verify_calls(&self) -> u32 {
        self.state.lock().unwrap().verify_calls
    }

    async fn transfer(&self, token: bool, recipient: &Pubkey, amount: u64) -> Result<String, ExternalError> {
        let fault = self.state.lock().unwrap().faults.pop_front();
        match fault {
            Some(TransferFault::Fail(err)) => return Err(err),
            Some(TransferFault::Hang) => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                return Err(ExternalError::Timeout);
            }
            None => {}
        }

        let mut state = self.state.lock().unwrap();
        let balance = if token {
            &mut state.token_balance
        } else {
            &mut state.sol_balance
        };
        *balance = balance
            .checked_sub(amount)
            .ok_or_else(|| ExternalError::Rejected("insufficient funds".into()))?;
        state.next_signature += 1;
        let signature = format!("payout-{}", state.next_signature);
        state.transfers.push(Transfer {
            token,
            recipient: *recipient,
            amount,
            signature: signature.clone(),
        });
        Ok(signature)
    }
}

impl ChainAdapter for MockChain {
    async fn verify_fee(&self, signature: &str, expected_lamports: u64) -> Result<bool, ExternalError> {
        let mut state = self.state.lock().unwrap();
        state.verify_calls += 1;
        Ok(state
            .paid_fees
            .get(signature)
            .map_or(false, |paid| *paid >= expected_lamports))
    }

    async fn transfer_token(&self, recipient: &Pubkey, amount: u64) -> Result<String, ExternalError> {
        self.transfer(true, recipient, amount).await
    }

    async fn transfer_sol(&self, recipient: &Pubkey, lamports: u64) -> Result<String, ExternalError> {
        self.transfer(false, recipient, lamports).await
    }

    async fn vault_token_balance(&self) -> Result<u64, ExternalError> {
        Ok(self.state.lock().unwrap().token_balance)
    }

    async fn vault_sol_balance(&self) -> Result<u64, ExternalError> {
        Ok(self.state.lock().unwrap().sol_balance)
    }
}

/// Oracle with a settable WAD-scaled rate
#[derive(Debug)]
pub struct FixedOracle {
    rate: Mutex<Result<u128, ExternalError>>,
}

impl FixedOracle {
    pub fn new(rate: u128) -> Self {
        Self {
            rate: Mutex::new(Ok(rate)),
        }
    }

    pub fn fail(&self) {
        *self.rate.lock().unwrap() = Err(ExternalError::Unavailable("oracle down".into()));
    }
}

impl PriceOracle for FixedOracle {
    async fn token_rate(&self) -> Result<u128, ExternalError> {
        self.rate.lock().unwrap().clone()
    }
}

#[derive(Debug, Default)]
pub struct MockBoosters {
    table: Mutex<HashMap<Pubkey, Vec<Booster>>>,
    failing: AtomicBool,
    calls: AtomicU32,
}

impl MockBoosters {
    pub fn set(&self, wallet: Pubkey, boosters: Vec<Booster>) {
        self.table.lock().unwrap().insert(wallet, boosters);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BoosterResolver for MockBoosters {
    async fn resolve(&self, wallet: &Pubkey) -> Result<Vec<Booster>, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ExternalError::Unavailable("registry down".into()));
        }
        Ok(self
            .table
            .lock()
            .unwrap()
            .get(wallet)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<OperatorAlert>>,
    drift_alerts: Mutex<Vec<DriftAlert>>,
}

impl RecordingAlerts {
    pub fn alerts(&self) -> Vec<OperatorAlert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn drift_alerts(&self) -> Vec<DriftAlert> {
        self.drift_alerts.lock().unwrap().clone()
    }
}

impl OperatorAlerts for RecordingAlerts {
    fn alert(&self, alert: OperatorAlert) {
        self.alerts.lock().unwrap().push(alert);
    }

    fn drift_alert(&self, alert: DriftAlert) {
        self.drift_alerts.lock().unwrap().push(alert);
    }
}

/// Store wrapper that rejects the next N commits with a conflict
#[derive(Debug, Default)]
pub struct ContendedStore {
    pub inner: MemoryStore,
    conflicts: AtomicU32,
    commits: AtomicU32,
}

impl ContendedStore {
    pub fn inject_conflicts(&self, n: u32) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub fn commit_attempts(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }
}

impl LedgerStore for ContendedStore {
    fn load_pool(&self) -> Result<Option<Versioned<RewardPool>>, LedgerError> {
        self.inner.load_pool()
    }

    fn create_pool(&self, pool: &RewardPool) -> Result<(), LedgerError> {
        self.inner.create_pool(pool)
    }

    fn save_pool(&self, expected_version: u64, pool: &RewardPool) -> Result<u64, LedgerError> {
        self.inner.save_pool(expected_version, pool)
    }

    fn load_position(&self, user_id: &str) -> Result<Option<Versioned<Position>>, LedgerError> {
        self.inner.load_position(user_id)
    }

    fn list_positions(&self) -> Result<Vec<Versioned<Position>>, LedgerError> {
        self.inner.list_positions()
    }

    fn commit(&self, commit: PositionCommit<'_>) -> Result<(), LedgerError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            return Err(LedgerError::ConcurrencyConflict);
        }
        self.inner.commit(commit)
    }

    fn append_transaction(&self, entry: NewTransaction) -> Result<TransactionEntry, LedgerError> {
        self.inner.append_transaction(entry)
    }

    fn load_transaction(&self, id: u64) -> Result<Option<TransactionEntry>, LedgerError> {
        self.inner.load_transaction(id)
    }

    fn update_transaction(
        &self,
        id: u64,
        update: TransactionUpdate,
    ) -> Result<TransactionEntry, LedgerError> {
        self.inner.update_transaction(id, update)
    }

    fn scan_transactions(
        &self,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>, LedgerError> {
        self.inner.scan_transactions(after, limit)
    }

    fn user_transactions(&self, user_id: &str) -> Result<Vec<TransactionEntry>, LedgerError> {
        self.inner.user_transactions(user_id)
    }

    fn fee_signature_used(&self, signature: &str) -> Result<bool, LedgerError> {
        self.inner.fee_signature_used(signature)
    }
}

/// Fast timeouts and no percentage fee surprises
pub fn test_config() -> EngineConfig {
    EngineConfig {
        stake_fee_bps: 100,
        unstake_fee_bps: 100,
        claim_fee_lamports: 5_000,
        chain_timeout: Duration::from_millis(100),
        commit_backoff: Duration::from_millis(1),
        ..EngineConfig::default()
    }
}

pub struct Harness<S: LedgerStore = MemoryStore> {
    pub store: Arc<S>,
    pub chain: Arc<MockChain>,
    pub oracle: Arc<FixedOracle>,
    pub boosters: Arc<MockBoosters>,
    pub clock: Arc<ManualClock>,
    pub alerts: Arc<RecordingAlerts>,
    pub engine: SettlementEngine<S, MockChain, FixedOracle, MockBoosters>,
}

impl Harness<MemoryStore> {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }
}

impl<S: LedgerStore> Harness<S> {
    pub fn with_store(store: Arc<S>, config: EngineConfig) -> Self {
        let chain = Arc::new(MockChain::new(u64::MAX / 2, 1_000_000 * LAMPORTS_PER_SOL));
        // 1 token base unit = 0.001 lamports
        let oracle = Arc::new(FixedOracle::new(WAD / 1_000));
        let boosters = Arc::new(MockBoosters::default());
        let clock = Arc::new(ManualClock::new(0));
        let engine = SettlementEngine::new(
            Arc::clone(&store),
            Arc::clone(&chain),
            Arc::clone(&oracle),
            Arc::clone(&boosters),
            Arc::clone(&clock) as Arc<dyn Clock>,
            config,
        )
        .unwrap();
        Self {
            store,
            chain,
            oracle,
            boosters,
            clock,
            alerts: Arc::new(RecordingAlerts::default()),
            engine,
        }
    }

    pub fn job(&self) -> ReconciliationJob<S, MockChain, FixedOracle, MockBoosters, RecordingAlerts> {
        ReconciliationJob::new(self.engine.clone(), Arc::clone(&self.alerts))
    }

    pub fn at(&self, now: i64) {
        self.clock.set(now);
    }

    /// Pay the fee and stake
    pub async fn stake(&self, user: &str, wallet: Pubkey, amount: u64, sig: &str) -> stakeledger::SettlementReceipt {
        self.chain.pay_fee(sig);
        self.engine.stake(user, wallet, amount, sig).await.unwrap()
    }

    pub async fn unstake(&self, user: &str, amount: u64, sig: &str) -> stakeledger::SettlementReceipt {
        self.chain.pay_fee(sig);
        self.engine.unstake(user, amount, sig).await.unwrap()
    }

    pub async fn claim(&self, user: &str, sig: &str) -> stakeledger::SettlementReceipt {
        self.chain.pay_fee(sig);
        self.engine.claim(user, sig).await.unwrap()
    }

    pub fn position(&self, user: &str) -> Position {
        self.store.load_position(user).unwrap().unwrap().record
    }

    pub fn pool(&self) -> RewardPool {
        self.store.load_pool().unwrap().unwrap().record
    }

    pub fn entry(&self, id: u64) -> TransactionEntry {
        self.store.load_transaction(id).unwrap().unwrap()
    }
}

pub fn booster(category: &str, multiplier: u128) -> Booster {
    Booster {
        category: category.to_string(),
        multiplier,
    }
}
