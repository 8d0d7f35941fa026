//! Domain identifiers (strongly-typed IDs).
//!
//! - `TaskId`: opaque string chosen by the external enumerator (typically a directory name).
//! - `OwnerToken`: ULID minted per lock acquisition; identifies who holds a hardened lock.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use crate::ports::Clock;

/// Identifier of one unit of work in a ledger.
///
/// Ids are immutable once the ledger is created. Ordering is the enumeration
/// order of the ledger, not the lexical order of this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Owner token written into a hardened lock marker.
///
/// ULID なので時刻でソート可能、分散環境でも調整なしで生成できる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerToken(Ulid);

impl OwnerToken {
    /// Mint a token whose timestamp part comes from `clock`.
    pub fn generate<C: Clock + ?Sized>(clock: &C) -> Self {
        let timestamp_ms = clock.now().timestamp_millis() as u64;
        Self(Ulid::from_parts(timestamp_ms, rand::random()))
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}
