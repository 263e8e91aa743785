//! Subprocess judge: runs user code under an interpreter and compares its
//! output to the expected output.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use koan_workflow::{Judge, JudgeError, Verdict};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// How many trailing stderr lines are kept as the error message. Enough
/// for the raising frame and the exception line without drowning the UI
/// in the full traceback.
const ERROR_TAIL_LINES: usize = 4;

/// Executes code with a configured interpreter (`python3` by default).
pub struct PythonJudge {
    interpreter: String,
    timeout: Duration,
}

impl PythonJudge {
    /// Creates a judge using the given interpreter binary and per-run
    /// timeout.
    #[must_use]
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Judge for PythonJudge {
    async fn run(
        &self,
        code: &str,
        expected_output: &str,
        stdin: &str,
    ) -> Result<Verdict, JudgeError> {
        debug!(interpreter = %self.interpreter, code_len = code.len(), "executing user code");

        let mut child = Command::new(&self.interpreter)
            .arg("-c")
            .arg(code)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JudgeError::Spawn(e.to_string()))?;

        if let Some(mut handle) = child.stdin.take() {
            handle.write_all(stdin.as_bytes()).await?;
            drop(handle);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(JudgeError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(Verdict::from_execution(
            expected_output,
            stdout,
            error_tail(&stderr),
        ))
    }
}

/// Keeps the tail of a traceback: the raising frame and the exception
/// line.
fn error_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    let keep = ERROR_TAIL_LINES.min(lines.len());
    lines[lines.len() - keep..].join("\n")
}
