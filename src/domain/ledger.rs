use serde::{Deserialize, Serialize};

use super::{Points, TransactionKind, TransactionRecord, UserBalance, UserId};

/// Replay a user's history into a balance.
/// Balance = sum of charges - sum of uses
pub fn compute_balance(records: &[TransactionRecord]) -> Points {
    records
        .iter()
        .fold(0, |balance, record| balance + record.signed_amount())
}

/// Compute the balance that results from applying one charge or use.
///
/// This is the only place the business rules live: amounts must be positive,
/// a credit must not overflow, and a debit must not take the balance below zero.
pub fn apply_transaction(
    current: Points,
    kind: TransactionKind,
    amount: Points,
) -> Result<Points, BalanceError> {
    if amount <= 0 {
        return Err(BalanceError::NonPositiveAmount(amount));
    }
    match kind {
        TransactionKind::Charge => current
            .checked_add(amount)
            .ok_or(BalanceError::Overflow { current, amount }),
        TransactionKind::Use => {
            if amount > current {
                Err(BalanceError::Insufficient {
                    balance: current,
                    required: amount,
                })
            } else {
                Ok(current - amount)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    NonPositiveAmount(Points),
    Overflow { current: Points, amount: Points },
    Insufficient { balance: Points, required: Points },
}

impl std::fmt::Display for BalanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceError::NonPositiveAmount(amount) => {
                write!(f, "amount must be positive, got {}", amount)
            }
            BalanceError::Overflow { current, amount } => {
                write!(f, "charging {} to a balance of {} would overflow", amount, current)
            }
            BalanceError::Insufficient { balance, required } => {
                write!(f, "balance {} does not cover {}", balance, required)
            }
        }
    }
}

impl std::error::Error for BalanceError {}

/// Comparison of a stored balance against its replayed history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub user_id: UserId,
    pub stored_balance: Option<Points>,
    pub replayed_balance: Points,
    pub record_count: usize,
    pub total_charged: Points,
    pub total_used: Points,
    pub sequence_ordered: bool,
    pub errors: Vec<String>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Build an integrity report for one user from its stored balance and history.
pub fn build_integrity_report(
    user_id: UserId,
    stored: Option<&UserBalance>,
    records: &[TransactionRecord],
) -> IntegrityReport {
    let mut errors = Vec::new();

    let total_charged: Points = records
        .iter()
        .filter(|r| r.kind == TransactionKind::Charge)
        .map(|r| r.amount)
        .sum();
    let total_used: Points = records
        .iter()
        .filter(|r| r.kind == TransactionKind::Use)
        .map(|r| r.amount)
        .sum();
    let replayed_balance = compute_balance(records);
    let sequence_ordered = records.windows(2).all(|w| w[0].id < w[1].id);

    if !sequence_ordered {
        errors.push("History is not in strictly increasing sequence order".to_string());
    }

    if let Some(record) = records.iter().find(|r| r.user_id != user_id) {
        errors.push(format!(
            "Record {} belongs to user {}, not {}",
            record.id, record.user_id, user_id
        ));
    }

    if let Some(record) = records.iter().find(|r| r.amount <= 0) {
        errors.push(format!(
            "Record {} has non-positive amount {}",
            record.id, record.amount
        ));
    }

    // A running balance below zero means a use was applied without cover
    let mut running: Points = 0;
    for record in records {
        running += record.signed_amount();
        if running < 0 {
            errors.push(format!(
                "Balance goes negative ({}) at record {}",
                running, record.id
            ));
            break;
        }
    }

    match stored {
        Some(balance) if balance.balance != replayed_balance => errors.push(format!(
            "Stored balance {} differs from replayed history {}",
            balance.balance, replayed_balance
        )),
        None if !records.is_empty() => {
            errors.push("History exists but no balance is stored".to_string())
        }
        _ => {}
    }

    IntegrityReport {
        user_id,
        stored_balance: stored.map(|b| b.balance),
        replayed_balance,
        record_count: records.len(),
        total_charged,
        total_used,
        sequence_ordered,
        errors,
    }
}
