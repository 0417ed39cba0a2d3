use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How `use` treats a user that has never been charged or opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownUserPolicy {
    /// Fail with `UserNotFound`
    #[default]
    Reject,
    /// Evaluate against a balance of 0, so any use fails with `InsufficientBalance`
    TreatAsEmpty,
}

impl UnknownUserPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnknownUserPolicy::Reject => "reject",
            UnknownUserPolicy::TreatAsEmpty => "treat-as-empty",
        }
    }
}

/// Tunables for the point ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub unknown_user: UnknownUserPolicy,
    /// Longest a mutation waits for its user's exclusive section.
    /// `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl LedgerConfig {
    pub fn with_unknown_user(mut self, policy: UnknownUserPolicy) -> Self {
        self.unknown_user = policy;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.unknown_user, UnknownUserPolicy::Reject);
        assert_eq!(config.lock_timeout, None);
    }

    #[test]
    fn test_builder() {
        let config = LedgerConfig::default()
            .with_unknown_user(UnknownUserPolicy::TreatAsEmpty)
            .with_lock_timeout(Duration::from_millis(250));
        assert_eq!(config.unknown_user.as_str(), "treat-as-empty");
        assert_eq!(config.lock_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_deserialize_policy() {
        let policy: UnknownUserPolicy = serde_json::from_str("\"treat-as-empty\"").unwrap();
        assert_eq!(policy, UnknownUserPolicy::TreatAsEmpty);
    }
}
