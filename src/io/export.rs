use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::{LedgerError, PointLedger};
use crate::domain::{TransactionRecord, UserBalance, UserId};

/// Point-in-time view of one user for JSON export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub user_id: UserId,
    /// `None` for a user that was never charged or opened
    pub balance: Option<UserBalance>,
    pub history: Vec<TransactionRecord>,
}

/// Exporter for converting a user's ledger data to various formats
pub struct Exporter<'a> {
    ledger: &'a PointLedger,
}

impl<'a> Exporter<'a> {
    pub fn new(ledger: &'a PointLedger) -> Self {
        Self { ledger }
    }

    /// Export a user's history to CSV format. Returns the number of rows written.
    pub async fn export_history_csv<W: Write>(&self, user_id: UserId, writer: W) -> Result<usize> {
        let history = self.ledger.list_history(user_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(["id", "user_id", "kind", "amount", "recorded_at"])?;

        for record in &history {
            csv_writer.write_record(&[
                record.id.to_string(),
                record.user_id.to_string(),
                record.kind.as_str().to_string(),
                record.amount.to_string(),
                record.recorded_at.to_rfc3339(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(history.len())
    }

    /// Export a user's balance and history as a JSON snapshot
    pub async fn export_user_json<W: Write>(
        &self,
        user_id: UserId,
        mut writer: W,
    ) -> Result<UserSnapshot> {
        let balance = match self.ledger.get_balance(user_id).await {
            Ok(balance) => Some(balance),
            Err(LedgerError::UserNotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let history = self.ledger.list_history(user_id).await?;

        let snapshot = UserSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            user_id,
            balance,
            history,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
