//! External batch-scheduler queue depth.
//!
//! The pipeline never tracks batch jobs itself; it only asks the scheduler
//! how many jobs are still queued or running, and uses that count to tell
//! "still running" apart from "failed" when stage output is incomplete.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::ToolError;
use crate::tools::command::run_tool;

/// Read-only view of the external batch scheduler.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Number of jobs still enqueued or running for this campaign.
    async fn pending_job_count(&self) -> Result<usize, ToolError>;
}

/// Counts the jobs of one user on a Slurm cluster via `squeue`.
#[derive(Debug, Clone)]
pub struct SlurmJobQueue {
    command: String,
    user: Option<String>,
}

impl SlurmJobQueue {
    /// Creates a queue query for `user`; `None` counts every visible job.
    pub fn new(user: Option<String>) -> Self {
        Self {
            command: "squeue".to_string(),
            user,
        }
    }

    /// Overrides the `squeue` executable.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }
}

/// Counts job lines in `squeue --noheader` output.
fn count_job_lines(stdout: &str) -> usize {
    stdout.lines().filter(|line| !line.trim().is_empty()).count()
}

#[async_trait]
impl JobQueue for SlurmJobQueue {
    async fn pending_job_count(&self) -> Result<usize, ToolError> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--noheader");
        if let Some(ref user) = self.user {
            cmd.arg("--user").arg(user);
        }

        let output = run_tool("squeue", &mut cmd).await?;
        let count = count_job_lines(&String::from_utf8_lossy(&output.stdout));
        debug!(user = ?self.user, count, "Queried batch scheduler");
        Ok(count)
    }
}
