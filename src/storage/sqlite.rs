use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::domain::{Points, TransactionKind, TransactionRecord, UserBalance, UserId};

use super::{BalanceStore, HistoryLog, MIGRATION_001_INITIAL};

/// URL of a private, process-local SQLite database.
pub const IN_MEMORY_URL: &str = "sqlite::memory:";

/// SQLite-backed balance table and history log.
///
/// Implements both storage traits over one pool, so a ledger can be pointed
/// at SQLite without any change to the core.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database.
    ///
    /// An in-memory database only lives as long as its connection, so the
    /// pool is pinned to a single connection that is never recycled.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Initialize a fresh in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::init(IN_MEMORY_URL).await
    }

    fn row_to_balance(row: &sqlx::sqlite::SqliteRow) -> Result<UserBalance> {
        let updated_at_str: String = row.get("updated_at");

        Ok(UserBalance {
            user_id: row.get("user_id"),
            balance: row.get("balance"),
            updated_at: parse_timestamp(&updated_at_str).context("Invalid updated_at timestamp")?,
        })
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<TransactionRecord> {
        let kind_str: String = row.get("kind");
        let recorded_at_str: String = row.get("recorded_at");

        Ok(TransactionRecord {
            id: row.get("id"),
            user_id: row.get("user_id"),
            amount: row.get("amount"),
            kind: TransactionKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
            recorded_at: parse_timestamp(&recorded_at_str)
                .context("Invalid recorded_at timestamp")?,
        })
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[async_trait]
impl BalanceStore for SqliteStore {
    async fn read(&self, user_id: UserId) -> Result<Option<UserBalance>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, balance, updated_at
            FROM user_points
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch balance")?;

        row.as_ref().map(Self::row_to_balance).transpose()
    }

    async fn write(&self, user_id: UserId, balance: Points) -> Result<UserBalance> {
        let stored = UserBalance::new(user_id, balance);

        sqlx::query(
            r#"
            INSERT INTO user_points (user_id, balance, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                balance = excluded.balance,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(stored.user_id)
        .bind(stored.balance)
        .bind(stored.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save balance")?;

        Ok(stored)
    }
}

#[async_trait]
impl HistoryLog for SqliteStore {
    async fn append(&self, record: &mut TransactionRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO point_history (user_id, amount, kind, recorded_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(record.user_id)
        .bind(record.amount)
        .bind(record.kind.as_str())
        .bind(record.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to append history record")?;

        record.id = result.last_insert_rowid();
        Ok(())
    }

    async fn read_all(&self, user_id: UserId) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, amount, kind, recorded_at
            FROM point_history
            WHERE user_id = ?
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list history")?;

        rows.iter().map(Self::row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_balance_upsert() -> Result<()> {
        let store = SqliteStore::in_memory().await?;
        assert!(store.read(1).await?.is_none());

        store.write(1, 100).await?;
        store.write(1, 40).await?;

        let balance = store.read(1).await?.expect("balance should exist");
        assert_eq!(balance.balance, 40);
        Ok(())
    }

    #[tokio::test]
    async fn test_history_roundtrip_preserves_order() -> Result<()> {
        let store = SqliteStore::in_memory().await?;

        let mut charge = TransactionRecord::charge(1, 50);
        let mut other = TransactionRecord::charge(2, 5);
        let mut used = TransactionRecord::used(1, 30);
        store.append(&mut charge).await?;
        store.append(&mut other).await?;
        store.append(&mut used).await?;

        assert!(charge.id < used.id);

        let history = store.read_all(1).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, charge.id);
        assert_eq!(history[0].kind, TransactionKind::Charge);
        assert_eq!(history[1].id, used.id);
        assert_eq!(history[1].kind, TransactionKind::Use);
        Ok(())
    }

    #[tokio::test]
    async fn test_negative_balance_rejected_by_schema() -> Result<()> {
        let store = SqliteStore::in_memory().await?;
        assert!(store.write(1, -1).await.is_err());
        Ok(())
    }
}
