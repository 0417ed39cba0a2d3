use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Points, UserId};

/// The current point balance of one user.
///
/// There is at most one logical instance per user id. It comes into existence
/// on the first charge or on an explicit account opening, and is only ever
/// replaced by the ledger core, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBalance {
    pub user_id: UserId,
    pub balance: Points,
    pub updated_at: DateTime<Utc>,
}

impl UserBalance {
    pub fn new(user_id: UserId, balance: Points) -> Self {
        Self {
            user_id,
            balance,
            updated_at: Utc::now(),
        }
    }
}
