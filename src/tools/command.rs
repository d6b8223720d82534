//! Blocking-from-the-caller invocation of external programs.

use std::process::{Output, Stdio};
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ToolError;

/// Runs `cmd` to completion and returns its output.
///
/// Stdout and stderr are captured. A non-zero exit status is reported as
/// [`ToolError::NonZeroExit`] carrying the tail of stderr.
pub async fn run_tool(tool: &str, cmd: &mut Command) -> Result<Output, ToolError> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    info!("Running {}: {:?}", tool, cmd.as_std());
    let start = Instant::now();

    let output = cmd.output().await.map_err(|e| ToolError::Spawn {
        tool: tool.to_string(),
        source: e,
    })?;

    debug!(
        tool,
        exit_code = output.status.code().unwrap_or(-1),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Tool finished"
    );

    if !output.status.success() {
        return Err(ToolError::NonZeroExit {
            tool: tool.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: stderr_tail(&output.stderr, 20),
        });
    }

    Ok(output)
}

/// Last `max_lines` lines of a captured stream.
fn stderr_tail(stderr: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail() {
        let stderr = b"one\ntwo\nthree\nfour";
        assert_eq!(stderr_tail(stderr, 2), "three\nfour");
        assert_eq!(stderr_tail(stderr, 10), "one\ntwo\nthree\nfour");
    }

    #[tokio::test]
    async fn test_run_tool_success() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo hello");
        let output = run_tool("sh", &mut cmd).await.expect("sh should run");
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_tool_non_zero_exit() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo broken >&2; exit 3");
        let result = run_tool("sh", &mut cmd).await;
        match result {
            Err(ToolError::NonZeroExit { code, stderr, .. }) => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
    }
}
