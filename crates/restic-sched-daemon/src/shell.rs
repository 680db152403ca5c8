//! Subprocess plumbing shared by shell-script tasks and the restic adapter.
//!
//! Both pipes are drained concurrently while waiting for the child so a
//! chatty subprocess can never fill a pipe and deadlock. Every line is
//! mirrored to the job logger as it streams and kept for error reporting.

use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::logger::JobLogger;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("failed running task script {name}: exit status {status}")]
    Failed { name: String, status: i32 },

    #[error("failed spawning shell: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Output captured from a finished subprocess, split by stream.
#[derive(Debug, Default)]
pub struct CapturedOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CapturedOutput {
    /// Both streams merged and sorted for stable error messages.
    pub fn all_lines(&self) -> Vec<String> {
        let mut lines = self.stdout.clone();
        lines.extend(self.stderr.iter().cloned());
        lines.sort();

        lines
    }
}

/// Spawn `cmd` and wait for it, streaming both pipes through `logger`.
pub async fn capture_command(
    mut cmd: Command,
    logger: &JobLogger,
) -> std::io::Result<(CapturedOutput, ExitStatus)> {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    let mut child = cmd.spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_fut = async {
        let mut lines = Vec::new();
        if let Some(pipe) = stdout {
            let mut reader = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                logger.line(&line);
                lines.push(line);
            }
        }

        lines
    };

    let stderr_fut = async {
        let mut lines = Vec::new();
        if let Some(pipe) = stderr {
            let mut reader = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                logger.line(&line);
                lines.push(line);
            }
        }

        lines
    };

    let (stdout_lines, stderr_lines, status) =
        tokio::join!(stdout_fut, stderr_fut, child.wait());

    Ok((
        CapturedOutput {
            stdout: stdout_lines,
            stderr: stderr_lines,
        },
        status?,
    ))
}

/// Run a script through `sh -c` in `cwd` with `env` layered over the process
/// environment.
pub async fn run_script(
    name: &str,
    script: &str,
    cwd: &str,
    env: &BTreeMap<String, String>,
    logger: &JobLogger,
) -> Result<(), ShellError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script.trim());

    if !cwd.is_empty() {
        cmd.current_dir(cwd);
    }

    for (key, value) in env {
        cmd.env(key, value);
    }

    let (_, status) = capture_command(cmd, logger).await?;

    if !status.success() {
        return Err(ShellError::Failed {
            name: name.to_string(),
            status: status.code().unwrap_or(-1),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger;

    #[tokio::test]
    async fn script_runs_and_captures() {
        let log = logger::get("shell-test");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo hello; echo oops >&2");

        let (output, status) = capture_command(cmd, &log).await.unwrap();

        assert!(status.success());
        assert_eq!(vec!["hello".to_string()], output.stdout);
        assert_eq!(vec!["oops".to_string()], output.stderr);
        assert_eq!(
            vec!["hello".to_string(), "oops".to_string()],
            output.all_lines()
        );
    }

    #[tokio::test]
    async fn script_env_is_visible() {
        let log = logger::get("shell-env-test");
        let mut env = BTreeMap::new();
        env.insert("FOO".to_string(), "bar".to_string());

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("test \"$FOO\" = bar");
        for (k, v) in &env {
            cmd.env(k, v);
        }

        let (_, status) = capture_command(cmd, &log).await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn run_script_honors_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger::get("shell-cwd-test");

        let result = run_script(
            "cwd",
            &format!("test \"$(pwd)\" = '{}'", dir.path().display()),
            dir.path().to_str().unwrap(),
            &BTreeMap::new(),
            &log,
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn failing_script_is_an_error() {
        let log = logger::get("shell-fail-test");

        let result = run_script("boom", "exit 3", "", &BTreeMap::new(), &log).await;

        match result {
            Err(ShellError::Failed { name, status }) => {
                assert_eq!("boom", name);
                assert_eq!(3, status);
            }
            other => panic!("expected script failure, got {other:?}"),
        }
    }
}
