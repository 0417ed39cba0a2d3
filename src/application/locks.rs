use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::domain::UserId;

type Sections = DashMap<UserId, Arc<Mutex<()>>>;

/// Per-user exclusion map.
///
/// Each user id gets its own async mutex, created on first use, so mutations
/// for the same user run one at a time while different users never contend.
/// An entry is dropped again once nobody holds or waits for it.
#[derive(Default)]
pub struct UserLocks {
    sections: Arc<Sections>,
}

/// Exclusive access to one user's balance. Released on drop.
pub struct UserGuard {
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
    sections: Arc<Sections>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the user's section is free and take it.
    pub async fn acquire(&self, user_id: UserId) -> UserGuard {
        let guard = self.section(user_id).lock_owned().await;
        trace!(user_id, "acquired user section");
        self.guard(user_id, guard)
    }

    /// Like [`acquire`](Self::acquire), but give up after `timeout`.
    /// A caller that gives up never held the section.
    pub async fn try_acquire_for(&self, user_id: UserId, timeout: Duration) -> Option<UserGuard> {
        let section = self.section(user_id);
        match tokio::time::timeout(timeout, section.lock_owned()).await {
            Ok(guard) => {
                trace!(user_id, "acquired user section");
                Some(self.guard(user_id, guard))
            }
            Err(_) => {
                trace!(user_id, ?timeout, "gave up waiting for user section");
                prune(&self.sections, user_id);
                None
            }
        }
    }

    /// Number of users that currently have a section allocated.
    pub fn active_users(&self) -> usize {
        self.sections.len()
    }

    fn section(&self, user_id: UserId) -> Arc<Mutex<()>> {
        self.sections
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn guard(&self, user_id: UserId, guard: OwnedMutexGuard<()>) -> UserGuard {
        UserGuard {
            user_id,
            guard: Some(guard),
            sections: Arc::clone(&self.sections),
        }
    }
}

impl UserGuard {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

impl Drop for UserGuard {
    fn drop(&mut self) {
        // Unlock first so the strong count below no longer includes this guard
        drop(self.guard.take());
        trace!(user_id = self.user_id, "released user section");
        prune(&self.sections, self.user_id);
    }
}

/// Remove the user's entry if the map holds the only reference to it.
/// Waiters clone the entry under the same shard lock, so a section that is
/// held or awaited is never removed.
fn prune(sections: &Sections, user_id: UserId) {
    sections.remove_if(&user_id, |_, section| Arc::strong_count(section) == 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = UserLocks::new();
        let guard = locks.acquire(1).await;
        assert_eq!(guard.user_id(), 1);
        assert_eq!(locks.active_users(), 1);

        drop(guard);
        assert_eq!(locks.active_users(), 0);
    }

    #[tokio::test]
    async fn test_same_user_times_out_while_held() {
        let locks = UserLocks::new();
        let _held = locks.acquire(1).await;

        let second = locks.try_acquire_for(1, Duration::from_millis(20)).await;
        assert!(second.is_none());
        // The holder's entry survives the waiter giving up
        assert_eq!(locks.active_users(), 1);
    }

    #[tokio::test]
    async fn test_different_users_do_not_contend() {
        let locks = UserLocks::new();
        let _one = locks.acquire(1).await;

        let two = locks.try_acquire_for(2, Duration::from_millis(20)).await;
        assert!(two.is_some());
        assert_eq!(locks.active_users(), 2);
    }

    #[tokio::test]
    async fn test_waiter_gets_section_after_release() {
        let locks = Arc::new(UserLocks::new());
        let held = locks.acquire(7).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let guard = locks.acquire(7).await;
                guard.user_id()
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap(), 7);
        assert_eq!(locks.active_users(), 0);
    }
}
