mod common;

use std::sync::Arc;

use anyhow::Result;
use common::sqlite_ledger;
use futures::future::join_all;
use pointledger::application::{LedgerError, PointLedger};
use pointledger::domain::TransactionKind;
use tempfile::TempDir;

#[tokio::test]
async fn test_sqlite_charge_then_use_until_insufficient() -> Result<()> {
    let ledger = sqlite_ledger().await?;

    assert_eq!(ledger.charge(1, 50).await?.balance, 50);
    assert_eq!(ledger.use_points(1, 30).await?.balance, 20);
    assert!(matches!(
        ledger.use_points(1, 30).await,
        Err(LedgerError::InsufficientBalance { .. })
    ));

    assert_eq!(ledger.get_balance(1).await?.balance, 20);
    let history = ledger.list_history(1).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, TransactionKind::Charge);
    assert_eq!(history[1].kind, TransactionKind::Use);

    Ok(())
}

#[tokio::test]
async fn test_sqlite_unknown_user() -> Result<()> {
    let ledger = sqlite_ledger().await?;

    assert!(matches!(
        ledger.get_balance(7).await,
        Err(LedgerError::UserNotFound(7))
    ));
    assert!(ledger.list_history(7).await?.is_empty());
    assert!(matches!(
        ledger.use_points(7, 1).await,
        Err(LedgerError::UserNotFound(7))
    ));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_uses() -> Result<()> {
    let ledger = Arc::new(sqlite_ledger().await?);
    ledger.charge(1, 500).await?;

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.use_points(1, 100).await })
        })
        .collect();

    for result in join_all(handles).await {
        result??;
    }

    assert_eq!(ledger.get_balance(1).await?.balance, 0);
    let report = ledger.verify(1).await?;
    assert!(report.is_consistent(), "errors: {:?}", report.errors);
    assert_eq!(report.record_count, 6);
    assert_eq!(report.total_used, 500);

    Ok(())
}

#[tokio::test]
async fn test_sqlite_file_database() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("points.db");
    let url = format!("sqlite:{}?mode=rwc", db_path.display());

    let ledger = PointLedger::sqlite(&url).await?;
    ledger.charge(1, 10).await?;
    ledger.open_account(2).await?;

    assert_eq!(ledger.get_balance(1).await?.balance, 10);
    assert_eq!(ledger.get_balance(2).await?.balance, 0);

    Ok(())
}
