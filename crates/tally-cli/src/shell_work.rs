//! ShellWork - run an external command once per task.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use tally_core::ports::WorkFunction;
use tally_core::{TallyError, TaskId};

pub const TASK_ID_VAR: &str = "TALLY_TASK_ID";
pub const JOB_DIR_VAR: &str = "TALLY_JOB_DIR";

/// `program args..` with `TALLY_TASK_ID` set. Exit status 0 means the task is done.
#[derive(Debug, Clone)]
pub struct ShellWork {
    program: String,
    args: Vec<String>,
    job_dir: PathBuf,
}

impl ShellWork {
    pub fn new(command: &[String], job_dir: impl Into<PathBuf>) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            job_dir: job_dir.into(),
        })
    }
}

#[async_trait]
impl WorkFunction for ShellWork {
    async fn run(&self, task_id: &TaskId) -> Result<(), TallyError> {
        debug!(%task_id, program = %self.program, "spawning task command");
        let status = Command::new(&self.program)
            .args(&self.args)
            .env(TASK_ID_VAR, task_id.as_str())
            .env(JOB_DIR_VAR, &self.job_dir)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| TallyError::task_failed(task_id, format!("spawn {}: {e}", self.program)))?;

        if status.success() {
            Ok(())
        } else {
            Err(TallyError::task_failed(task_id, format!("{} exited with {status}", self.program)))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ShellWork {
        ShellWork::new(&["sh".into(), "-c".into(), script.into()], "/tmp").unwrap()
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(ShellWork::new(&[], "/tmp").is_none());
    }

    #[tokio::test]
    async fn task_id_is_exported() {
        let work = sh(r#"test "$TALLY_TASK_ID" = "tract_7""#);
        work.run(&TaskId::new("tract_7")).await.unwrap();
        assert!(work.run(&TaskId::new("tract_8")).await.is_err());
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_task_failure() {
        let err = sh("exit 3").run(&TaskId::new("A")).await.unwrap_err();
        assert!(matches!(err, TallyError::TaskExecution { .. }));
    }
}
