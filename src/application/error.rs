use thiserror::Error;

use crate::domain::{BalanceError, Points, UserId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient balance for user {user_id}: balance {balance}, required {required}")]
    InsufficientBalance {
        user_id: UserId,
        balance: Points,
        required: Points,
    },

    #[error("Timed out waiting for exclusive access to user {0}")]
    LockTimeout(UserId),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl LedgerError {
    pub(crate) fn from_balance(user_id: UserId, err: BalanceError) -> Self {
        match err {
            BalanceError::Insufficient { balance, required } => LedgerError::InsufficientBalance {
                user_id,
                balance,
                required,
            },
            BalanceError::NonPositiveAmount(_) | BalanceError::Overflow { .. } => {
                LedgerError::InvalidAmount(err.to_string())
            }
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::UserNotFound(_) => "not_found",
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::LockTimeout(_) => "lock_timeout",
            LedgerError::Storage(_) => "storage_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_maps_to_business_error() {
        let err = LedgerError::from_balance(
            3,
            BalanceError::Insufficient {
                balance: 20,
                required: 30,
            },
        );
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                user_id: 3,
                balance: 20,
                required: 30
            }
        ));
        assert_eq!(err.kind(), "insufficient_balance");
    }

    #[test]
    fn test_amount_errors_map_to_invalid_amount() {
        let err = LedgerError::from_balance(1, BalanceError::NonPositiveAmount(0));
        assert_eq!(err.to_string(), "Invalid amount: amount must be positive, got 0");

        let err = LedgerError::from_balance(
            1,
            BalanceError::Overflow {
                current: i64::MAX,
                amount: 1,
            },
        );
        assert_eq!(err.kind(), "invalid_amount");
    }
}
