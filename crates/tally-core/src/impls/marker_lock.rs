//! MarkerLock - plain poll-then-create marker file.
//!
//! Kept for compatibility with jobs that still use the plain marker scheme,
//! and so the claim race stays reproducible in tests. New jobs should use
//! `ExclusiveLock`.
//!
//! # Known race
//! Observing "marker absent" and creating the marker are two separate
//! filesystem operations. Two workers can both observe absence before either
//! creates the marker, and both proceed as holders. `with_claim_delay`
//! widens that window on purpose.
//!
//! # No lease
//! The marker carries no owner and no expiry. A holder that dies before
//! `release` orphans it; everyone else polls until `LockTimeout`, and an
//! operator has to remove the marker by hand (`force_release`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::domain::{OwnerToken, TallyError};
use crate::fsutil;
use crate::ports::{Clock, LockManager, LockToken, PollPolicy, SystemClock};

pub struct MarkerLock {
    path: PathBuf,
    poll: PollPolicy,
    claim_delay: Duration,
    clock: Arc<dyn Clock>,
}

impl MarkerLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll: PollPolicy::default(),
            claim_delay: Duration::ZERO,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Sleep between observing the marker absent and creating it.
    pub fn with_claim_delay(mut self, delay: Duration) -> Self {
        self.claim_delay = delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the marker regardless of who created it.
    pub async fn force_release(&self) -> Result<bool, TallyError> {
        fsutil::remove_if_exists(&self.path).await
    }

    async fn create_marker(&self) -> Result<(), TallyError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TallyError::storage(parent, e))?;
        }
        // content is irrelevant; presence is the lock
        fs::write(&self.path, b"locked")
            .await
            .map_err(|e| TallyError::storage(&self.path, e))
    }
}

#[async_trait]
impl LockManager for MarkerLock {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    async fn acquire(&self) -> Result<LockToken, TallyError> {
        for poll in 1..=self.poll.max_polls {
            match fs::try_exists(&self.path).await {
                Ok(false) => {
                    if !self.claim_delay.is_zero() {
                        tokio::time::sleep(self.claim_delay).await;
                    }
                    self.create_marker().await?;
                    debug!(path = %self.path.display(), polls = poll, "marker lock acquired");
                    return Ok(LockToken::new(OwnerToken::generate(&*self.clock)));
                }
                Ok(true) => {}
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "could not stat lock marker");
                }
            }
            tokio::time::sleep(self.poll.interval).await;
        }
        Err(TallyError::LockTimeout {
            path: self.name(),
            polls: self.poll.max_polls,
        })
    }

    async fn release(&self, _token: LockToken) -> Result<(), TallyError> {
        // no ownership check: whoever releases removes the marker
        fsutil::remove_if_exists(&self.path).await?;
        debug!(path = %self.path.display(), "marker lock released");
        Ok(())
    }
}
