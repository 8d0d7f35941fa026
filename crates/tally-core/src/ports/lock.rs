//! LockManager port - advisory mutual exclusion over one named resource.
//!
//! Every read-modify-write of the ledger is bracketed by `acquire`/`release`.
//! The port keeps the poll-until-free interface of the plain marker-file
//! scheme; implementations decide whether the claim step is atomic.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{OwnerToken, TallyError};

/// How often and how long `acquire` polls before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_polls: u32) -> Self {
        Self {
            interval,
            max_polls,
        }
    }

    /// Upper bound on the time `acquire` spends sleeping.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_polls
    }
}

impl Default for PollPolicy {
    /// 50ms polls for up to ten minutes.
    fn default() -> Self {
        Self::new(Duration::from_millis(50), 12_000)
    }
}

/// Proof of a successful `acquire`. Hand it back to `release`.
///
/// Not `Clone`: one acquisition, one release.
#[derive(Debug, PartialEq, Eq)]
pub struct LockToken {
    owner: OwnerToken,
}

impl LockToken {
    pub fn new(owner: OwnerToken) -> Self {
        Self { owner }
    }

    pub fn owner(&self) -> OwnerToken {
        self.owner
    }
}

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Human-readable name of the guarded resource (marker path, ...).
    fn name(&self) -> String;

    /// Wait until the lock is ours. Gives up with `TallyError::LockTimeout`.
    async fn acquire(&self) -> Result<LockToken, TallyError>;

    /// Give the lock back.
    async fn release(&self, token: LockToken) -> Result<(), TallyError>;
}
