//! Config - where a job's ledger, lock and cache live, and how patient workers are.
//!
//! Loaded from a JSON file (every field optional) or derived from a job
//! directory. Relative paths in a config file resolve against the file's
//! own directory, so one file can be shared by workers started anywhere.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::{LoopOptions, RetryPolicy};
use crate::domain::TallyError;
use crate::ports::PollPolicy;

pub const LEDGER_FILE: &str = "ledger.json";
pub const LOCK_FILE: &str = "ledger.lock";
pub const CACHE_DIR: &str = "cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Atomic exclusive-create marker with owner token and lease.
    #[default]
    Exclusive,
    /// Plain poll-then-create marker. Racy; for jobs that must interoperate with it.
    Marker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    pub ledger_path: PathBuf,
    pub lock_path: PathBuf,
    pub cache_dir: PathBuf,
    pub lock_mode: LockMode,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub lease_secs: u64,
    pub retry_interval_ms: u64,
    pub retry_max_attempts: u32,
    pub max_passes: u32,
    pub pass_backoff_ms: u64,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self::for_job_dir(".")
    }
}

impl TallyConfig {
    /// Conventional layout: `<dir>/ledger.json`, `<dir>/ledger.lock`, `<dir>/cache/`.
    pub fn for_job_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            ledger_path: dir.join(LEDGER_FILE),
            lock_path: dir.join(LOCK_FILE),
            cache_dir: dir.join(CACHE_DIR),
            lock_mode: LockMode::Exclusive,
            poll_interval_ms: 50,
            max_polls: 12_000,
            lease_secs: 300,
            retry_interval_ms: 200,
            retry_max_attempts: 50,
            max_passes: 3,
            pass_backoff_ms: 1_000,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TallyError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| TallyError::storage(path, e))?;
        let mut config: TallyConfig = serde_json::from_slice(&raw)
            .map_err(|e| TallyError::Config(format!("{}: {e}", path.display())))?;

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.validate()?;
        Ok(config)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        for p in [
            &mut self.ledger_path,
            &mut self.lock_path,
            &mut self.cache_dir,
        ] {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
    }

    pub fn validate(&self) -> Result<(), TallyError> {
        if self.poll_interval_ms == 0 {
            return Err(TallyError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.max_polls == 0 {
            return Err(TallyError::Config("max_polls must be > 0".into()));
        }
        if self.retry_max_attempts == 0 {
            return Err(TallyError::Config("retry_max_attempts must be > 0".into()));
        }
        if self.max_passes == 0 {
            return Err(TallyError::Config("max_passes must be > 0".into()));
        }
        if self.lock_mode == LockMode::Exclusive
            && Duration::from_secs(self.lease_secs) <= self.poll_interval()
        {
            return Err(TallyError::Config(
                "lease_secs must be longer than the poll interval".into(),
            ));
        }
        if self.ledger_path == self.lock_path {
            return Err(TallyError::Config(
                "ledger_path and lock_path must differ".into(),
            ));
        }
        Ok(())
    }

    /// Directory holding the ledger; what task commands see as the job directory.
    pub fn job_dir(&self) -> &Path {
        match self.ledger_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval(), self.max_polls)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            Duration::from_millis(self.retry_interval_ms),
            self.retry_max_attempts,
        )
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            max_passes: self.max_passes,
            pass_backoff: Duration::from_millis(self.pass_backoff_ms),
        }
    }
}
