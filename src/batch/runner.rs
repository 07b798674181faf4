//! Launching the external analysis program.
//!
//! The executor only sees the [`JobRunner`] trait. [`CommandRunner`] is the
//! production implementation and runs one child process per job.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::batch::BatchJob;
use crate::{BatchError, Result};

/// How a single external invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Exit status zero
    Success,
    /// Non-zero exit, or `code: None` when terminated by a signal
    Failed { code: Option<i32> },
}

impl JobOutcome {
    /// Whether the invocation succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }

    /// Exit code, when known
    pub fn code(&self) -> Option<i32> {
        match self {
            JobOutcome::Success => Some(0),
            JobOutcome::Failed { code } => *code,
        }
    }
}

/// Runs one segment job to completion
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run `job` and wait for it to finish.
    ///
    /// `Err` means the program could not be run at all.
    async fn run(&self, job: &BatchJob) -> Result<JobOutcome>;
}

/// Runs each job as a child process of the configured launch command
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: String,
    leading_args: Vec<String>,
    set_cuda_visible_devices: bool,
}

impl CommandRunner {
    /// Create a runner from a launch command such as `["python", "parallel_v2.py"]`
    pub fn new(command: Vec<String>) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| BatchError::Config("launch command must name a program".to_string()))?;

        Ok(Self {
            program,
            leading_args: parts.collect(),
            set_cuda_visible_devices: false,
        })
    }

    /// Also export `CUDA_VISIBLE_DEVICES=<gpu>` to the child
    pub fn with_cuda_visible_devices(mut self, enabled: bool) -> Self {
        self.set_cuda_visible_devices = enabled;
        self
    }

    /// Shell-style rendering of the command line for `job`
    pub fn command_line(&self, job: &BatchJob) -> String {
        let mut parts = vec![quote(&self.program)];
        parts.extend(self.leading_args.iter().map(|a| quote(a)));
        parts.extend(job.args().iter().map(|a| quote(&a.to_string_lossy())));
        parts.join(" ")
    }

    fn command(&self, job: &BatchJob) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .args(job.args())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if self.set_cuda_visible_devices {
            cmd.env("CUDA_VISIBLE_DEVICES", job.gpu.to_string());
        }
        cmd
    }
}

#[async_trait]
impl JobRunner for CommandRunner {
    #[instrument(skip(self, job), fields(segment = %job.segment, gpu = job.gpu))]
    async fn run(&self, job: &BatchJob) -> Result<JobOutcome> {
        debug!(command = %self.command_line(job), "Launching external program");

        let status = self
            .command(job)
            .status()
            .await
            .map_err(|source| BatchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        debug!(exit_code = ?status.code(), "External program exited");
        if status.success() {
            Ok(JobOutcome::Success)
        } else {
            Ok(JobOutcome::Failed {
                code: status.code(),
            })
        }
    }
}

fn quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::SegmentId;
    use std::path::Path;

    fn job(index: u32) -> BatchJob {
        BatchJob::new(
            SegmentId::new(index),
            Path::new("/data/traj"),
            Path::new("/data/topology.pdb"),
            1,
        )
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(CommandRunner::new(Vec::new()), Err(BatchError::Config(_))));
        assert!(matches!(
            CommandRunner::new(vec![String::new()]),
            Err(BatchError::Config(_))
        ));
    }

    #[test]
    fn test_command_line_rendering() {
        let runner = CommandRunner::new(vec!["python".into(), "parallel_v2.py".into()])
            .expect("runner should build");
        assert_eq!(
            runner.command_line(&job(1)),
            "python parallel_v2.py --dcd_file /data/traj/segment_01.dcd \
             --pdb_file /data/topology.pdb --gpu 1"
        );
    }

    #[test]
    fn test_command_line_quotes_spaces() {
        let runner = CommandRunner::new(vec!["python".into(), "my script.py".into()])
            .expect("runner should build");
        assert!(runner.command_line(&job(2)).starts_with("python 'my script.py' "));
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_outcome_codes() {
        assert_eq!(JobOutcome::Success.code(), Some(0));
        assert!(JobOutcome::Success.is_success());
        let failed = JobOutcome::Failed { code: Some(2) };
        assert!(!failed.is_success());
        assert_eq!(failed.code(), Some(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_true_and_false_programs() {
        let ok = CommandRunner::new(vec!["true".into()]).expect("runner should build");
        assert_eq!(ok.run(&job(1)).await.expect("true should run"), JobOutcome::Success);

        let failing = CommandRunner::new(vec!["false".into()]).expect("runner should build");
        assert_eq!(
            failing.run(&job(1)).await.expect("false should run"),
            JobOutcome::Failed { code: Some(1) }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_and_environment_reach_child() {
        let runner = CommandRunner::new(vec![
            "sh".into(),
            "-c".into(),
            r#"[ "$CUDA_VISIBLE_DEVICES" = "$6" ] || exit 9; exit 4"#.into(),
            "runner".into(),
        ])
        .expect("runner should build")
        .with_cuda_visible_devices(true);

        assert_eq!(
            runner.run(&job(3)).await.expect("sh should run"),
            JobOutcome::Failed { code: Some(4) }
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let runner = CommandRunner::new(vec!["/nonexistent/segment-batch-program".into()])
            .expect("runner should build");
        let err = runner.run(&job(1)).await.expect_err("spawn should fail");
        assert!(matches!(err, BatchError::Spawn { .. }));
    }
}
