use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::domain::{
    apply_transaction, build_integrity_report, IntegrityReport, Points, TransactionKind,
    TransactionRecord, UserBalance, UserId,
};
use crate::storage::{
    BalanceStore, HistoryLog, MemoryBalanceStore, MemoryHistoryLog, SqliteStore,
};

use super::{LedgerConfig, LedgerError, UnknownUserPolicy, UserGuard, UserLocks};

/// The point ledger core.
///
/// Every charge and use runs as one read-validate-write-append unit inside its
/// user's exclusive section. Reads (`get_balance`, `list_history`) go straight
/// to the stores, which are atomic per key.
///
/// This is the primary interface for any client (CLI, API, tests).
pub struct PointLedger {
    balances: Arc<dyn BalanceStore>,
    history: Arc<dyn HistoryLog>,
    locks: UserLocks,
    config: LedgerConfig,
}

impl PointLedger {
    /// Create a ledger over the given stores with the default configuration.
    pub fn new(balances: Arc<dyn BalanceStore>, history: Arc<dyn HistoryLog>) -> Self {
        Self {
            balances,
            history,
            locks: UserLocks::new(),
            config: LedgerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    /// A ledger over fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryBalanceStore::new()),
            Arc::new(MemoryHistoryLog::new()),
        )
    }

    /// A ledger over a SQLite database, migrated on open.
    pub async fn sqlite(database_url: &str) -> Result<Self, LedgerError> {
        let store = Arc::new(SqliteStore::init(database_url).await?);
        Ok(Self::new(store.clone(), store))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }

    // ========================
    // Queries
    // ========================

    /// Get the current balance of a user.
    pub async fn get_balance(&self, user_id: UserId) -> Result<UserBalance, LedgerError> {
        self.balances
            .read(user_id)
            .await?
            .ok_or(LedgerError::UserNotFound(user_id))
    }

    /// List a user's transactions, oldest first. Unknown users have no history.
    pub async fn list_history(
        &self,
        user_id: UserId,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        Ok(self.history.read_all(user_id).await?)
    }

    /// Compare a user's stored balance with its replayed history.
    ///
    /// Holds the user's section so the two reads see the same state.
    pub async fn verify(&self, user_id: UserId) -> Result<IntegrityReport, LedgerError> {
        let _guard = self.lock(user_id).await?;
        let stored = self.balances.read(user_id).await?;
        let records = self.history.read_all(user_id).await?;

        let report = build_integrity_report(user_id, stored.as_ref(), &records);
        if !report.is_consistent() {
            warn!(user_id, errors = ?report.errors, "integrity check failed");
        }
        Ok(report)
    }

    // ========================
    // Mutations
    // ========================

    /// Explicitly create a user with a zero balance.
    /// Returns the existing balance unchanged if the user already exists.
    pub async fn open_account(&self, user_id: UserId) -> Result<UserBalance, LedgerError> {
        let _guard = self.lock(user_id).await?;
        if let Some(existing) = self.balances.read(user_id).await? {
            return Ok(existing);
        }

        let opened = self.balances.write(user_id, 0).await?;
        info!(user_id, "opened point account");
        Ok(opened)
    }

    /// Credit points to a user, creating the user on first charge.
    pub async fn charge(
        &self,
        user_id: UserId,
        amount: Points,
    ) -> Result<UserBalance, LedgerError> {
        self.apply(user_id, TransactionKind::Charge, amount).await
    }

    /// Debit points from a user. Never takes the balance below zero.
    pub async fn use_points(
        &self,
        user_id: UserId,
        amount: Points,
    ) -> Result<UserBalance, LedgerError> {
        self.apply(user_id, TransactionKind::Use, amount).await
    }

    async fn lock(&self, user_id: UserId) -> Result<UserGuard, LedgerError> {
        match self.config.lock_timeout {
            Some(timeout) => self
                .locks
                .try_acquire_for(user_id, timeout)
                .await
                .ok_or(LedgerError::LockTimeout(user_id)),
            None => Ok(self.locks.acquire(user_id).await),
        }
    }

    async fn apply(
        &self,
        user_id: UserId,
        kind: TransactionKind,
        amount: Points,
    ) -> Result<UserBalance, LedgerError> {
        if amount <= 0 {
            warn!(user_id, %kind, amount, "rejected non-positive amount");
            return Err(LedgerError::InvalidAmount(format!(
                "{} amount must be positive, got {}",
                kind, amount
            )));
        }

        let guard = self.lock(user_id).await?;

        // The section runs on its own task so that a caller dropping this
        // future cannot interrupt it between the write and the append.
        let balances = Arc::clone(&self.balances);
        let history = Arc::clone(&self.history);
        let policy = self.config.unknown_user;
        let section = tokio::spawn(async move {
            let _guard = guard;
            commit(
                balances.as_ref(),
                history.as_ref(),
                user_id,
                kind,
                amount,
                policy,
            )
            .await
        });

        section
            .await
            .context("Balance mutation task failed")
            .map_err(LedgerError::Storage)?
    }
}

/// Read, validate, write and append for one user. The caller holds the
/// user's section for the whole call.
async fn commit(
    balances: &dyn BalanceStore,
    history: &dyn HistoryLog,
    user_id: UserId,
    kind: TransactionKind,
    amount: Points,
    policy: UnknownUserPolicy,
) -> Result<UserBalance, LedgerError> {
    let prior = match balances.read(user_id).await? {
        Some(current) => current.balance,
        None => match (kind, policy) {
            (TransactionKind::Charge, _)
            | (TransactionKind::Use, UnknownUserPolicy::TreatAsEmpty) => 0,
            (TransactionKind::Use, UnknownUserPolicy::Reject) => {
                warn!(user_id, amount, "use rejected for unknown user");
                return Err(LedgerError::UserNotFound(user_id));
            }
        },
    };

    let next = apply_transaction(prior, kind, amount).map_err(|err| {
        warn!(user_id, %kind, amount, balance = prior, "rejected: {}", err);
        LedgerError::from_balance(user_id, err)
    })?;

    // A failed write leaves nothing behind: no record has been appended yet.
    let stored = balances.write(user_id, next).await?;

    let mut record = TransactionRecord::new(user_id, amount, kind);
    if let Err(err) = history.append(&mut record).await {
        compensate(balances, user_id, prior, &err).await;
        return Err(LedgerError::Storage(
            err.context(format!("Failed to record {} for user {}", kind, user_id)),
        ));
    }

    debug!(
        user_id,
        %kind,
        amount,
        balance = stored.balance,
        record_id = record.id,
        "applied point transaction"
    );
    Ok(stored)
}

/// Undo a balance write whose history append failed.
///
/// A user that had no balance before the attempt is restored to zero, since
/// the store offers no delete. That user now exists: `get_balance` returns 0
/// and, under `UnknownUserPolicy::Reject`, a later `use` fails with
/// `InsufficientBalance` instead of `UserNotFound`.
async fn compensate(
    balances: &dyn BalanceStore,
    user_id: UserId,
    prior: Points,
    cause: &anyhow::Error,
) {
    match balances.write(user_id, prior).await {
        Ok(_) => warn!(
            user_id,
            restored = prior,
            "history append failed, balance restored: {:#}",
            cause
        ),
        Err(restore_err) => error!(
            user_id,
            expected = prior,
            "history append failed and balance could not be restored: {:#}; restore error: {:#}",
            cause,
            restore_err
        ),
    }
}
