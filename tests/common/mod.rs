// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use pointledger::application::PointLedger;
use pointledger::domain::{Points, TransactionRecord, UserBalance, UserId};
use pointledger::storage::{
    BalanceStore, HistoryLog, MemoryBalanceStore, MemoryHistoryLog, IN_MEMORY_URL,
};

/// Helper to create a ledger over fresh in-memory stores
pub fn test_ledger() -> PointLedger {
    PointLedger::in_memory()
}

/// Helper to create a ledger whose stores sleep on every access,
/// widening the window for lost updates
pub fn slow_ledger(latency: Duration) -> PointLedger {
    PointLedger::new(
        Arc::new(MemoryBalanceStore::new().with_latency(latency)),
        Arc::new(MemoryHistoryLog::new().with_latency(latency)),
    )
}

/// Helper to create a ledger over an in-memory SQLite database
pub async fn sqlite_ledger() -> Result<PointLedger> {
    Ok(PointLedger::sqlite(IN_MEMORY_URL).await?)
}

/// Charge a user up to `balance` points
pub async fn seed(ledger: &PointLedger, user_id: UserId, balance: Points) -> Result<()> {
    ledger.charge(user_id, balance).await?;
    Ok(())
}

/// History log that can be told to reject appends
#[derive(Default)]
pub struct FlakyHistoryLog {
    inner: MemoryHistoryLog,
    fail_appends: AtomicBool,
}

impl FlakyHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl HistoryLog for FlakyHistoryLog {
    async fn append(&self, record: &mut TransactionRecord) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(anyhow!("history log unavailable"));
        }
        self.inner.append(record).await
    }

    async fn read_all(&self, user_id: UserId) -> Result<Vec<TransactionRecord>> {
        self.inner.read_all(user_id).await
    }
}

/// Balance store that can be told to reject reads, or to reject writes
/// once a budget of successful writes is spent
pub struct FlakyBalanceStore {
    inner: MemoryBalanceStore,
    fail_reads: AtomicBool,
    /// Negative means unlimited
    write_budget: AtomicI64,
}

impl Default for FlakyBalanceStore {
    fn default() -> Self {
        Self {
            inner: MemoryBalanceStore::new(),
            fail_reads: AtomicBool::new(false),
            write_budget: AtomicI64::new(-1),
        }
    }
}

impl FlakyBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Allow exactly `writes` more successful writes
    pub fn allow_writes(&self, writes: i64) {
        self.write_budget.store(writes, Ordering::SeqCst);
    }

    pub fn allow_all_writes(&self) {
        self.write_budget.store(-1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BalanceStore for FlakyBalanceStore {
    async fn read(&self, user_id: UserId) -> Result<Option<UserBalance>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("balance table unavailable"));
        }
        self.inner.read(user_id).await
    }

    async fn write(&self, user_id: UserId, balance: Points) -> Result<UserBalance> {
        let budget = self.write_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(anyhow!("balance table rejected write"));
        }
        if budget > 0 {
            self.write_budget.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.write(user_id, balance).await
    }
}

/// Ledger over flaky stores, returned with handles to steer failures
pub fn flaky_ledger() -> (PointLedger, Arc<FlakyBalanceStore>, Arc<FlakyHistoryLog>) {
    let balances = Arc::new(FlakyBalanceStore::new());
    let history = Arc::new(FlakyHistoryLog::new());
    let ledger = PointLedger::new(balances.clone(), history.clone());
    (ledger, balances, history)
}
