//! ExclusiveLock - atomic create-exclusive marker with owner token and lease.
//!
//! # Acquire
//! One `create_new` (O_CREAT|O_EXCL) both checks and claims, so two workers
//! can never both believe they created the marker. The marker body records
//! `{owner, acquired_at, lease_secs}`.
//!
//! # Removal
//! A marker is only ever removed by its owner (`release`) or by a contender
//! that found it past its lease (reclaim). Both hold a short-lived side guard,
//! `<lock>.reclaim`, itself taken with `create_new`, and re-read the marker
//! under it before deleting. While the guard is held nobody else can delete
//! the marker, and nobody can create one until it is deleted, so what was
//! read is what gets removed.
//!
//! A guard older than the lease is treated as abandoned by a crashed process.
//!
//! # Release
//! Release only removes a marker carrying our owner token. If the lease ran
//! out and someone else reclaimed the lock, release fails with `LockLost` and
//! leaves the other holder's marker in place.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::domain::{OwnerToken, TallyError};
use crate::fsutil;
use crate::ports::{Clock, LockManager, LockToken, PollPolicy, SystemClock};

/// Default lease: long enough for any ledger reload/save.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MarkerBody {
    owner: OwnerToken,
    acquired_at: DateTime<Utc>,
    lease_secs: u64,
}

impl MarkerBody {
    fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at + chrono::Duration::seconds(self.lease_secs as i64)
    }
}

enum Claim {
    Created,
    Held,
}

/// Proof that this process holds `<lock>.reclaim`.
struct RemovalGuard {
    path: PathBuf,
}

pub struct ExclusiveLock {
    path: PathBuf,
    poll: PollPolicy,
    lease: Duration,
    claim_delay: Duration,
    clock: Arc<dyn Clock>,
}

impl ExclusiveLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll: PollPolicy::default(),
            lease: DEFAULT_LEASE,
            claim_delay: Duration::ZERO,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sleep before each claim attempt (same knob as `MarkerLock`).
    pub fn with_claim_delay(mut self, delay: Duration) -> Self {
        self.claim_delay = delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the marker regardless of owner or lease. Operator use only.
    pub async fn force_release(&self) -> Result<bool, TallyError> {
        fsutil::remove_if_exists(&self.path).await
    }

    async fn try_create(&self, body: &MarkerBody) -> Result<Claim, TallyError> {
        let bytes = serde_json::to_vec(body).map_err(|source| TallyError::Serialize {
            what: format!("lock marker {}", self.name()),
            source,
        })?;

        let mut opened = open_exclusive(&self.path).await;
        let missing_parent = matches!(&opened, Err(e) if e.kind() == ErrorKind::NotFound);
        if missing_parent && let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TallyError::storage(parent, e))?;
            opened = open_exclusive(&self.path).await;
        }

        let mut file = match opened {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(Claim::Held),
            Err(e) => return Err(TallyError::storage(&self.path, e)),
        };

        let written = async {
            file.write_all(&bytes).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            // we own the marker but could not describe it; drop it rather than orphan it
            let _ = fs::remove_file(&self.path).await;
            return Err(TallyError::storage(&self.path, e));
        }
        Ok(Claim::Created)
    }

    /// Is the marker described by `bytes` past its lease?
    async fn is_stale(&self, bytes: &[u8]) -> Result<bool, TallyError> {
        let now = self.clock.now();
        if let Ok(body) = serde_json::from_slice::<MarkerBody>(bytes) {
            return Ok(now >= body.expires_at());
        }

        // 書き込み途中 or 壊れた marker: fall back to the file's mtime
        let modified = match fs::metadata(&self.path).await {
            Ok(meta) => meta
                .modified()
                .map_err(|e| TallyError::storage(&self.path, e))?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(TallyError::storage(&self.path, e)),
        };
        let lease = chrono::Duration::from_std(self.lease)
            .map_err(|e| TallyError::Config(format!("lease out of range: {e}")))?;
        Ok(now >= DateTime::<Utc>::from(modified) + lease)
    }

    fn guard_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "lock".to_string());
        self.path.with_file_name(format!("{name}.reclaim"))
    }

    /// Take `<lock>.reclaim`, polling like `acquire`.
    async fn enter_guard(&self) -> Result<RemovalGuard, TallyError> {
        let path = self.guard_path();
        for _ in 0..self.poll.max_polls {
            match open_exclusive(&path).await {
                Ok(_) => return Ok(RemovalGuard { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.guard_abandoned(&path).await? {
                        warn!(path = %path.display(), "removing abandoned reclaim guard");
                        fsutil::remove_if_exists(&path).await?;
                        continue;
                    }
                }
                Err(e) => return Err(TallyError::storage(&path, e)),
            }
            tokio::time::sleep(self.poll.interval).await;
        }
        Err(TallyError::LockTimeout {
            path: path.display().to_string(),
            polls: self.poll.max_polls,
        })
    }

    /// Guards live for one read and one delete; one older than the lease was left by a crash.
    async fn guard_abandoned(&self, path: &Path) -> Result<bool, TallyError> {
        let meta = match fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(TallyError::storage(path, e)),
        };
        let age = meta
            .modified()
            .map_err(|e| TallyError::storage(path, e))?
            .elapsed()
            .unwrap_or_default();
        Ok(age >= self.lease)
    }

    async fn leave_guard(&self, guard: RemovalGuard) {
        if let Err(e) = fs::remove_file(&guard.path).await {
            warn!(path = %guard.path.display(), error = %e, "could not remove reclaim guard");
        }
    }

    /// Reclaim an expired marker. Returns true when the caller should retry
    /// the claim immediately.
    async fn reclaim_if_stale(&self) -> Result<bool, TallyError> {
        let Some(observed) = fsutil::read_optional(&self.path).await? else {
            return Ok(true);
        };
        if !self.is_stale(&observed).await? {
            return Ok(false);
        }
        self.reclaim_confirmed().await
    }

    /// Under the guard, re-read the marker and delete it only if it is still stale.
    async fn reclaim_confirmed(&self) -> Result<bool, TallyError> {
        let guard = self.enter_guard().await?;
        let outcome = self.remove_if_stale().await;
        self.leave_guard(guard).await;
        outcome
    }

    async fn remove_if_stale(&self) -> Result<bool, TallyError> {
        let Some(current) = fsutil::read_optional(&self.path).await? else {
            // released in the meantime
            return Ok(true);
        };
        if !self.is_stale(&current).await? {
            // someone reclaimed it first and holds it now
            return Ok(false);
        }
        fsutil::remove_if_exists(&self.path).await?;
        let previous = serde_json::from_slice::<MarkerBody>(&current)
            .map(|b| b.owner.to_string())
            .unwrap_or_else(|_| "unreadable marker".to_string());
        warn!(path = %self.path.display(), previous = %previous, "reclaimed expired lock");
        Ok(true)
    }

    async fn remove_if_owned(&self, owner: OwnerToken) -> Result<(), TallyError> {
        let lost = |reason: String| TallyError::LockLost {
            path: self.name(),
            reason,
        };

        let Some(bytes) = fsutil::read_optional(&self.path).await? else {
            return Err(lost("marker is gone".to_string()));
        };
        match serde_json::from_slice::<MarkerBody>(&bytes) {
            Ok(body) if body.owner == owner => {
                fsutil::remove_if_exists(&self.path).await?;
                debug!(path = %self.path.display(), %owner, "lock released");
                Ok(())
            }
            Ok(body) => Err(lost(format!("held by {}", body.owner))),
            Err(e) => Err(lost(format!("unreadable marker: {e}"))),
        }
    }
}

async fn open_exclusive(path: &Path) -> std::io::Result<fs::File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

#[async_trait]
impl LockManager for ExclusiveLock {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    async fn acquire(&self) -> Result<LockToken, TallyError> {
        let owner = OwnerToken::generate(&*self.clock);
        for poll in 1..=self.poll.max_polls {
            if !self.claim_delay.is_zero() {
                tokio::time::sleep(self.claim_delay).await;
            }
            let body = MarkerBody {
                owner,
                acquired_at: self.clock.now(),
                lease_secs: self.lease.as_secs().max(1),
            };
            match self.try_create(&body).await? {
                Claim::Created => {
                    debug!(path = %self.path.display(), %owner, polls = poll, "lock acquired");
                    return Ok(LockToken::new(owner));
                }
                Claim::Held => {
                    if self.reclaim_if_stale().await? {
                        continue;
                    }
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
        let guard = self.enter_guard().await?;
        let outcome = self.remove_if_owned(token.owner()).await;
        self.leave_guard(guard).await;
        outcome
    }
}
