use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Points, UserId};

/// Sequence number assigned by the history log on append.
pub type RecordId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    /// Points credited to the user
    Charge,
    /// Points spent by the user
    Use,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Charge => "CHARGE",
            TransactionKind::Use => "USE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CHARGE" => Some(TransactionKind::Charge),
            "USE" => Some(TransactionKind::Use),
            _ => None,
        }
    }

    /// Signed effect of an amount of this kind on a balance.
    pub fn signed(&self, amount: Points) -> Points {
        match self {
            TransactionKind::Charge => amount,
            TransactionKind::Use => -amount,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One charge or use event. Records are immutable once appended; corrections
/// are made with further charges or uses, never by editing history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Monotonically increasing sequence number, assigned by the history log
    pub id: RecordId,
    pub user_id: UserId,
    /// Always positive
    pub amount: Points,
    pub kind: TransactionKind,
    pub recorded_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Create a new record. The id must be assigned by the history log.
    pub fn new(user_id: UserId, amount: Points, kind: TransactionKind) -> Self {
        assert!(amount > 0, "Transaction amount must be positive");
        Self {
            id: 0, // Will be set by the history log
            user_id,
            amount,
            kind,
            recorded_at: Utc::now(),
        }
    }

    pub fn charge(user_id: UserId, amount: Points) -> Self {
        Self::new(user_id, amount, TransactionKind::Charge)
    }

    pub fn used(user_id: UserId, amount: Points) -> Self {
        Self::new(user_id, amount, TransactionKind::Use)
    }

    pub fn signed_amount(&self) -> Points {
        self.kind.signed(self.amount)
    }
}
