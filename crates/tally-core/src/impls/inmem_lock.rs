//! InMemoryLock - process-local lock with the same poll semantics.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{OwnerToken, TallyError};
use crate::ports::{LockManager, LockToken, PollPolicy, SystemClock};

/// Lock shared by clones, for driving worker loops without a filesystem.
#[derive(Clone, Default)]
pub struct InMemoryLock {
    holder: Arc<Mutex<Option<OwnerToken>>>,
    poll: PollPolicy,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub async fn is_held(&self) -> bool {
        self.holder.lock().await.is_some()
    }
}

#[async_trait]
impl LockManager for InMemoryLock {
    fn name(&self) -> String {
        "memory".to_string()
    }

    async fn acquire(&self) -> Result<LockToken, TallyError> {
        let owner = OwnerToken::generate(&SystemClock);
        for _ in 0..self.poll.max_polls {
            {
                let mut holder = self.holder.lock().await;
                if holder.is_none() {
                    *holder = Some(owner);
                    return Ok(LockToken::new(owner));
                }
            }
            tokio::time::sleep(self.poll.interval).await;
        }
        Err(TallyError::LockTimeout {
            path: self.name(),
            polls: self.poll.max_polls,
        })
    }

    async fn release(&self, token: LockToken) -> Result<(), TallyError> {
        let mut holder = self.holder.lock().await;
        match *holder {
            Some(owner) if owner == token.owner() => {
                *holder = None;
                Ok(())
            }
            Some(owner) => Err(TallyError::LockLost {
                path: self.name(),
                reason: format!("held by {owner}"),
            }),
            None => Err(TallyError::LockLost {
                path: self.name(),
                reason: "not held".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_release_cycle() {
        let lock = InMemoryLock::new();
        let token = lock.acquire().await.unwrap();
        assert!(lock.is_held().await);
        lock.release(token).await.unwrap();
        assert!(!lock.is_held().await);
    }

    #[tokio::test]
    async fn contended_acquire_times_out() {
        let lock = InMemoryLock::new().with_poll(PollPolicy::new(Duration::from_millis(1), 3));
        let other = lock.clone();
        let _token = lock.acquire().await.unwrap();
        assert!(matches!(
            other.acquire().await.unwrap_err(),
            TallyError::LockTimeout { polls: 3, .. }
        ));
    }

    #[tokio::test]
    async fn foreign_token_cannot_release() {
        let lock = InMemoryLock::new();
        let _token = lock.acquire().await.unwrap();
        let bogus = LockToken::new(OwnerToken::generate(&SystemClock));
        assert!(lock.release(bogus).await.is_err());
        assert!(lock.is_held().await);
    }
}
