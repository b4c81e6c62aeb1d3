//! Record store boundary
//!
//! Two logical record sets (`positions` keyed by user id, `transactions`
//! append-only keyed by sequence) plus the singleton pool record. Pool and
//! position writes are versioned compare-and-swap; a stale version yields
//! `ConcurrencyConflict` and the caller retries from a fresh read.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::LedgerError;
use crate::state::{NewTransaction, Position, RewardPool, TransactionEntry, TransactionUpdate};

/// A record together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

/// Atomic pool + position write
#[derive(Debug, Clone, Copy)]
pub struct PositionCommit<'a> {
    pub pool_version: u64,
    pub pool: &'a RewardPool,
    /// `None` creates the position; fails if it already exists
    pub position_version: Option<u64>,
    pub position: &'a Position,
    /// Ledger entry whose effect this commit applies
    pub applied_entry: Option<u64>,
}

pub trait LedgerStore: Send + Sync {
    fn load_pool(&self) -> Result<Option<Versioned<RewardPool>>, LedgerError>;

    /// Create the singleton pool; `AlreadyInitialized` if present
    fn create_pool(&self, pool: &RewardPool) -> Result<(), LedgerError>;

    /// Pool-only compare-and-swap, returning the new version
    fn save_pool(&self, expected_version: u64, pool: &RewardPool) -> Result<u64, LedgerError>;

    fn load_position(&self, user_id: &str) -> Result<Option<Versioned<Position>>, LedgerError>;

    fn list_positions(&self) -> Result<Vec<Versioned<Position>>, LedgerError>;

    /// Write pool and position together, or neither. Marks `applied_entry` as
    /// applied in the same step.
    fn commit(&self, commit: PositionCommit<'_>) -> Result<(), LedgerError>;

    /// Append a ledger entry; the store assigns the next sequence
    fn append_transaction(&self, entry: NewTransaction) -> Result<TransactionEntry, LedgerError>;

    fn load_transaction(&self, id: u64) -> Result<Option<TransactionEntry>, LedgerError>;

    /// Update the mutable fields of an entry (forward-only status)
    fn update_transaction(
        &self,
        id: u64,
        update: TransactionUpdate,
    ) -> Result<TransactionEntry, LedgerError>;

    /// Entries with id greater than `after`, in sequence order
    fn scan_transactions(
        &self,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>, LedgerError>;

    /// Every entry for `user_id`, in sequence order
    fn user_transactions(&self, user_id: &str) -> Result<Vec<TransactionEntry>, LedgerError>;

    fn fee_signature_used(&self, signature: &str) -> Result<bool, LedgerError>;
}

#[derive(Debug, Clone)]
struct Record {
    version: u64,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct Inner {
    pool: Option<Record>,
    positions: BTreeMap<String, Record>,
    transactions: BTreeMap<u64, Vec<u8>>,
    /// Entry ids per user, ascending
    by_user: HashMap<String, Vec<u64>>,
    fee_signatures: HashSet<String>,
    next_id: u64,
}

/// In-process store holding borsh-encoded records
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrite a position without version checks (fault injection and
    /// restore from backup)
    pub fn force_position(&self, position: &Position) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let version = inner
            .positions
            .get(&position.user_id)
            .map(|r| r.version + 1)
            .unwrap_or(1);
        inner.positions.insert(
            position.user_id.clone(),
            Record {
                version,
                data: encode(position)?,
            },
        );
        Ok(())
    }

    /// Drop a position record outright (simulates a lost or corrupted store)
    pub fn discard_position(&self, user_id: &str) -> bool {
        self.lock().positions.remove(user_id).is_some()
    }

    /// Overwrite the pool without version checks
    pub fn force_pool(&self, pool: &RewardPool) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let version = inner.pool.as_ref().map(|r| r.version + 1).unwrap_or(1);
        inner.pool = Some(Record {
            version,
            data: encode(pool)?,
        });
        Ok(())
    }

    pub fn transaction_count(&self) -> usize {
        self.lock().transactions.len()
    }
}

fn encode<T: BorshSerialize>(record: &T) -> Result<Vec<u8>, LedgerError> {
    borsh::to_vec(record).map_err(|e| LedgerError::Store(format!("encode: {}", e)))
}

fn decode<T: BorshDeserialize>(data: &[u8]) -> Result<T, LedgerError> {
    T::try_from_slice(data).map_err(|e| LedgerError::Store(format!("decode: {}", e)))
}

fn decode_pool(record: &Record) -> Result<Versioned<RewardPool>, LedgerError> {
    let pool: RewardPool = decode(&record.data)?;
    if !pool.is_initialized() {
        return Err(LedgerError::Store("pool record has wrong discriminator".into()));
    }
    Ok(Versioned {
        version: record.version,
        record: pool,
    })
}

fn decode_position(record: &Record) -> Result<Versioned<Position>, LedgerError> {
    let position: Position = decode(&record.data)?;
    if !position.is_initialized() {
        return Err(LedgerError::Store("position record has wrong discriminator".into()));
    }
    Ok(Versioned {
        version: record.version,
        record: position,
    })
}

fn decode_entry(data: &[u8]) -> Result<TransactionEntry, LedgerError> {
    let entry: TransactionEntry = decode(data)?;
    if !entry.is_initialized() {
        return Err(LedgerError::Store("transaction record has wrong discriminator".into()));
    }
    Ok(entry)
}

impl LedgerStore for MemoryStore {
    fn load_pool(&self) -> Result<Option<Versioned<RewardPool>>, LedgerError> {
        self.lock().pool.as_ref().map(decode_pool).transpose()
    }

    fn create_pool(&self, pool: &RewardPool) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if inner.pool.is_some() {
            return Err(LedgerError::AlreadyInitialized);
        }
        inner.pool = Some(Record {
            version: 1,
            data: encode(pool)?,
        });
        Ok(())
    }

    fn save_pool(&self, expected_version: u64, pool: &RewardPool) -> Result<u64, LedgerError> {
        let mut inner = self.lock();
        let current = inner.pool.as_ref().ok_or(LedgerError::NotInitialized)?;
        if current.version != expected_version {
            return Err(LedgerError::ConcurrencyConflict);
        }
        let version = expected_version + 1;
        inner.pool = Some(Record {
            version,
            data: encode(pool)?,
        });
        Ok(version)
    }

    fn load_position(&self, user_id: &str) -> Result<Option<Versioned<Position>>, LedgerError> {
        self.lock()
            .positions
            .get(user_id)
            .map(decode_position)
            .transpose()
    }

    fn list_positions(&self) -> Result<Vec<Versioned<Position>>, LedgerError> {
        self.lock().positions.values().map(decode_position).collect()
    }

    fn commit(&self, commit: PositionCommit<'_>) -> Result<(), LedgerError> {
        let mut inner = self.lock();

        // Check every precondition before writing anything
        let pool_version = inner
            .pool
            .as_ref()
            .ok_or(LedgerError::NotInitialized)?
            .version;
        if pool_version != commit.pool_version {
            return Err(LedgerError::ConcurrencyConflict);
        }
        let stored_version = inner
            .positions
            .get(&commit.position.user_id)
            .map(|r| r.version);
        if stored_version != commit.position_version {
            return Err(LedgerError::ConcurrencyConflict);
        }
        let applied = match commit.applied_entry {
            Some(id) => {
                let data = inner
                    .transactions
                    .get(&id)
                    .ok_or(LedgerError::TransactionNotFound(id))?;
                let mut entry = decode_entry(data)?;
                if entry.applied {
                    // Already applied by an earlier commit
                    return Err(LedgerError::ConcurrencyConflict);
                }
                entry.applied = true;
                Some((id, encode(&entry)?))
            }
            None => None,
        };
        let pool_data = encode(commit.pool)?;
        let position_data = encode(commit.position)?;

        inner.pool = Some(Record {
            version: pool_version + 1,
            data: pool_data,
        });
        inner.positions.insert(
            commit.position.user_id.clone(),
            Record {
                version: stored_version.unwrap_or(0) + 1,
                data: position_data,
            },
        );
        if let Some((id, data)) = applied {
            inner.transactions.insert(id, data);
        }
        Ok(())
    }

    fn append_transaction(&self, entry: NewTransaction) -> Result<TransactionEntry, LedgerError> {
        let mut inner = self.lock();
        if inner.fee_signatures.contains(&entry.fee_signature) {
            return Err(LedgerError::FeeSignatureReused);
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let entry = entry.into_entry(id);
        let data = encode(&entry)?;
        inner.fee_signatures.insert(entry.fee_signature.clone());
        inner
            .by_user
            .entry(entry.user_id.clone())
            .or_default()
            .push(id);
        inner.transactions.insert(id, data);
        Ok(entry)
    }

    fn load_transaction(&self, id: u64) -> Result<Option<TransactionEntry>, LedgerError> {
        self.lock()
            .transactions
            .get(&id)
            .map(|data| decode_entry(data))
            .transpose()
    }

    fn update_transaction(
        &self,
        id: u64,
        update: TransactionUpdate,
    ) -> Result<TransactionEntry, LedgerError> {
        let mut inner = self.lock();
        let data = inner
            .transactions
            .get(&id)
            .ok_or(LedgerError::TransactionNotFound(id))?;
        let mut entry = decode_entry(data)?;
        entry.apply_update(update)?;
        let data = encode(&entry)?;
        inner.transactions.insert(id, data);
        Ok(entry)
    }

    fn scan_transactions(
        &self,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>, LedgerError> {
        let inner = self.lock();
        let start = after.map(|id| id.saturating_add(1)).unwrap_or(0);
        inner
            .transactions
            .range(start..)
            .take(limit)
            .map(|(_, data)| decode_entry(data))
            .collect()
    }

    fn user_transactions(&self, user_id: &str) -> Result<Vec<TransactionEntry>, LedgerError> {
        let inner = self.lock();
        let Some(ids) = inner.by_user.get(user_id) else {
            return Ok(Vec::new());
        };
        ids.iter()
            .filter_map(|id| inner.transactions.get(id))
            .map(|data| decode_entry(data))
            .collect()
    }

    fn fee_signature_used(&self, signature: &str) -> Result<bool, LedgerError> {
        Ok(self.lock().fee_signatures.contains(signature))
    }
}
