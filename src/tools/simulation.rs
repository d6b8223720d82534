//! Submission of simulation + reconstruction jobs to the batch system.
//!
//! The submission script receives the three parameter sets as JSON files and
//! reports, on the last line of its stdout, a JSON object
//! `{"output_dir": "...", "finished": bool}`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::info;

use super::command::run_tool;
use super::{Simulator, Submission, SubmissionRequest};
use crate::error::ToolError;

const SUBMIT_SCRIPT: &str = "submitSimulationAndReconstruction.py";

#[derive(Debug, Deserialize)]
struct SubmissionReply {
    output_dir: PathBuf,
    #[serde(default)]
    finished: bool,
}

/// Submits through the python submission script.
#[derive(Debug, Clone)]
pub struct ScriptSimulator {
    python: String,
    script_dir: PathBuf,
}

impl ScriptSimulator {
    pub fn new(python: impl Into<String>, script_dir: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            script_dir: script_dir.into(),
        }
    }
}

fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<PathBuf, ToolError> {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
    Ok(path)
}

/// Parses the submission reply from the last non-empty stdout line.
fn parse_reply(stdout: &str) -> Result<Submission, ToolError> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidOutput {
            tool: SUBMIT_SCRIPT.to_string(),
            message: "empty output".to_string(),
        })?;
    let reply: SubmissionReply =
        serde_json::from_str(line.trim()).map_err(|e| ToolError::InvalidOutput {
            tool: SUBMIT_SCRIPT.to_string(),
            message: format!("cannot parse reply '{}': {}", line.trim(), e),
        })?;
    Ok(Submission {
        output_dir: reply.output_dir,
        finished: reply.finished,
    })
}

#[async_trait]
impl Simulator for ScriptSimulator {
    async fn submit(&self, request: &SubmissionRequest) -> Result<Submission, ToolError> {
        let param_dir = tempfile::tempdir()?;
        let sim = write_json(param_dir.path(), "sim_params.json", &request.simulation)?;
        let align = write_json(param_dir.path(), "align_params.json", &request.alignment)?;
        let reco = write_json(param_dir.path(), "reco_params.json", &request.reconstruction)?;

        let mut cmd = Command::new(&self.python);
        cmd.current_dir(&self.script_dir);
        cmd.arg(self.script_dir.join(SUBMIT_SCRIPT))
            .arg("--sim_params")
            .arg(&sim)
            .arg("--align_params")
            .arg(&align)
            .arg("--reco_params")
            .arg(&reco);
        if request.use_devel_queue {
            cmd.arg("--use_devel_queue");
        }

        let output = run_tool(SUBMIT_SCRIPT, &mut cmd).await?;
        let submission = parse_reply(&String::from_utf8_lossy(&output.stdout))?;
        info!(
            kind = %request.kind,
            output_dir = %submission.output_dir.display(),
            finished = submission.finished,
            "Submitted simulation and reconstruction"
        );
        Ok(submission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_last_line() {
        let stdout = "creating job array...\nsubmitted 100 jobs\n\
                      {\"output_dir\": \"/data/box/1-100_xy_m_cut_real\", \"finished\": false}\n";
        let submission = parse_reply(stdout).expect("reply");
        assert_eq!(
            submission.output_dir,
            PathBuf::from("/data/box/1-100_xy_m_cut_real")
        );
        assert!(!submission.finished);
    }

    #[test]
    fn test_parse_reply_defaults_finished() {
        let submission = parse_reply("{\"output_dir\": \"/x\"}").expect("reply");
        assert!(!submission.finished);
    }

    #[test]
    fn test_parse_reply_rejects_garbage() {
        assert!(matches!(
            parse_reply("no json here"),
            Err(ToolError::InvalidOutput { .. })
        ));
        assert!(matches!(parse_reply("\n\n"), Err(ToolError::InvalidOutput { .. })));
    }
}
