use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::domain::{Points, TransactionRecord, UserBalance, UserId};

use super::{BalanceStore, HistoryLog};

/// In-memory balance table.
///
/// An optional latency is awaited before every access, which widens the
/// window between a caller's read and its write the way a remote table would.
#[derive(Default)]
pub struct MemoryBalanceStore {
    table: DashMap<UserId, UserBalance>,
    latency: Option<Duration>,
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of users with a stored balance.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    async fn read(&self, user_id: UserId) -> Result<Option<UserBalance>> {
        simulate_latency(self.latency).await;
        Ok(self.table.get(&user_id).map(|entry| entry.value().clone()))
    }

    async fn write(&self, user_id: UserId, balance: Points) -> Result<UserBalance> {
        simulate_latency(self.latency).await;
        let stored = UserBalance {
            user_id,
            balance,
            updated_at: Utc::now(),
        };
        self.table.insert(user_id, stored.clone());
        Ok(stored)
    }
}

/// In-memory history log. Sequence numbers are global and start at 1.
pub struct MemoryHistoryLog {
    records: DashMap<UserId, Vec<TransactionRecord>>,
    sequence: AtomicI64,
    latency: Option<Duration>,
}

impl Default for MemoryHistoryLog {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            sequence: AtomicI64::new(0),
            latency: None,
        }
    }
}

impl MemoryHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Total number of records across all users.
    pub fn total_records(&self) -> usize {
        self.records.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl HistoryLog for MemoryHistoryLog {
    async fn append(&self, record: &mut TransactionRecord) -> Result<()> {
        simulate_latency(self.latency).await;
        // The shard lock is held while numbering and pushing, so per-user
        // order always matches sequence order.
        let mut entry = self.records.entry(record.user_id).or_default();
        record.id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        entry.push(record.clone());
        Ok(())
    }

    async fn read_all(&self, user_id: UserId) -> Result<Vec<TransactionRecord>> {
        simulate_latency(self.latency).await;
        Ok(self
            .records
            .get(&user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}

async fn simulate_latency(latency: Option<Duration>) {
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
}
