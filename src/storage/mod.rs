mod memory;
mod sqlite;

pub use memory::*;
pub use sqlite::*;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Points, TransactionRecord, UserBalance, UserId};

/// SQL migration for the point tables
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// Key-value table of current balances.
///
/// Each call is atomic for its own key, but nothing is atomic across calls:
/// a read followed by a write may interleave with other callers. The ledger
/// core supplies the missing exclusion.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Read the balance for a user, `None` if it was never written.
    async fn read(&self, user_id: UserId) -> Result<Option<UserBalance>>;

    /// Insert or replace the balance for a user and return what was stored.
    async fn write(&self, user_id: UserId, balance: Points) -> Result<UserBalance>;
}

/// Append-only, per-user transaction history.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    /// Append a record. Assigns the next sequence number to `record.id`.
    async fn append(&self, record: &mut TransactionRecord) -> Result<()>;

    /// All records for a user, oldest first. Empty for unknown users.
    async fn read_all(&self, user_id: UserId) -> Result<Vec<TransactionRecord>>;
}
