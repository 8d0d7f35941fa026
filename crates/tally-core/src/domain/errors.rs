//! Errors - error type and its operational classification.

use std::path::PathBuf;

use thiserror::Error;

use super::TaskId;

/// ErrorKind classifies failures by how the core reacts to them.
///
/// - Transient: storage hiccup, retried with a fixed backoff.
/// - Corrupt: a cached artifact failed to decode, evicted and recomputed.
/// - Execution: a work function or compute closure failed; the task stays Pending.
/// - Permanent: retrying cannot help; propagated to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Corrupt,
    Execution,
    Permanent,
}

#[derive(Debug, Error)]
pub enum TallyError {
    #[error("storage i/o failed at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger at {location} could not be decoded: {source}")]
    LedgerDecode {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("ledger at {0} does not exist")]
    LedgerMissing(String),

    #[error("artifact {key} is corrupt: {source}")]
    CorruptArtifact {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("task {0} is not in the ledger")]
    UnknownTask(TaskId),

    #[error("duplicate task id {0}")]
    DuplicateTask(TaskId),

    #[error("lock {path} not acquired after {polls} polls")]
    LockTimeout { path: String, polls: u32 },

    #[error("lock {path} is no longer held by this owner: {reason}")]
    LockLost { path: String, reason: String },

    #[error("{operation} gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<TallyError>,
    },

    #[error("task {task_id} failed: {message}")]
    TaskExecution { task_id: TaskId, message: String },

    #[error("computing artifact {key} failed: {source}")]
    Compute {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("worker {worker} aborted: {reason}")]
    WorkerAborted { worker: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TallyError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Failure reported by a work function.
    pub fn task_failed(task_id: &TaskId, message: impl Into<String>) -> Self {
        Self::TaskExecution {
            task_id: task_id.clone(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TallyError::Storage { .. } | TallyError::LedgerDecode { .. } => ErrorKind::Transient,
            TallyError::CorruptArtifact { .. } => ErrorKind::Corrupt,
            TallyError::TaskExecution { .. } | TallyError::Compute { .. } => ErrorKind::Execution,
            TallyError::LedgerMissing(_)
            | TallyError::Serialize { .. }
            | TallyError::UnknownTask(_)
            | TallyError::DuplicateTask(_)
            | TallyError::LockTimeout { .. }
            | TallyError::LockLost { .. }
            | TallyError::RetriesExhausted { .. }
            | TallyError::WorkerAborted { .. }
            | TallyError::Config(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn io_error() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::Other, "disk hiccup")
    }

    fn json_error() -> serde_json::Error {
        serde_json::from_str::<serde_json::Value>("{").unwrap_err()
    }

    #[rstest]
    #[case::storage(TallyError::storage("/tmp/x", io_error()), ErrorKind::Transient)]
    #[case::decode(
        TallyError::LedgerDecode { location: "mem".into(), source: json_error() },
        ErrorKind::Transient
    )]
    #[case::corrupt(
        TallyError::CorruptArtifact { key: "k".into(), source: json_error() },
        ErrorKind::Corrupt
    )]
    #[case::task(TallyError::task_failed(&TaskId::new("A"), "boom"), ErrorKind::Execution)]
    #[case::unknown(TallyError::UnknownTask(TaskId::new("Z")), ErrorKind::Permanent)]
    #[case::timeout(
        TallyError::LockTimeout { path: "l".into(), polls: 3 },
        ErrorKind::Permanent
    )]
    fn errors_are_classified(#[case] err: TallyError, #[case] expected: ErrorKind) {
        assert_eq!(err.kind(), expected);
    }

    #[test]
    fn exhausted_retries_are_not_transient() {
        let err = TallyError::RetriesExhausted {
            operation: "save ledger".into(),
            attempts: 3,
            source: Box::new(TallyError::storage("/tmp/x", io_error())),
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
