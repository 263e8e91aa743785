//! The judge contract: executes submitted code and compares its output
//! against the expected output.
//!
//! The judge itself is an external collaborator — this crate only consumes
//! the trait. See `koan-cli` for the subprocess implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a judge implementation may report.
///
/// The workflow never propagates these: a failed run degrades to a failed
/// [`Verdict`] carrying the error text.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// The code runner could not be launched.
    #[error("failed to launch the code runner: {0}")]
    Spawn(String),

    /// I/O failure while talking to the code runner.
    #[error("code runner I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The submitted code ran too long.
    #[error("code execution timed out after {timeout_secs}s")]
    Timeout {
        /// The timeout that elapsed.
        timeout_secs: u64,
    },
}

/// Typed execution result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// `true` when the program ran cleanly and its output matched.
    pub passed: bool,

    /// Captured standard output.
    pub stdout: String,

    /// Error text from the run; empty when the program ran cleanly. A
    /// non-empty message enables the explain affordance regardless of
    /// `passed`.
    pub error_message: String,

    /// When the verdict was produced.
    pub evaluated_at: DateTime<Utc>,
}

impl Verdict {
    /// Builds a verdict from raw execution results.
    ///
    /// The run passes when no error was reported and the trimmed output
    /// matches the trimmed expected output.
    #[must_use]
    pub fn from_execution(
        expected_output: &str,
        stdout: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        let stdout = stdout.into();
        let error_message = error_message.into();
        let passed = error_message.is_empty() && stdout.trim() == expected_output.trim();
        Self {
            passed,
            stdout,
            error_message,
            evaluated_at: Utc::now(),
        }
    }

    /// A failed verdict carrying only an error message.
    #[must_use]
    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            passed: false,
            stdout: String::new(),
            error_message: error_message.into(),
            evaluated_at: Utc::now(),
        }
    }

    /// Returns `true` if the verdict carries an error message.
    #[must_use]
    pub fn has_error(&self) -> bool {
        !self.error_message.is_empty()
    }
}

/// Executes user code against an expected output.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Runs `code`, piping `stdin` to it, and compares the captured stdout
    /// against `expected_output`.
    async fn run(
        &self,
        code: &str,
        expected_output: &str,
        stdin: &str,
    ) -> std::result::Result<Verdict, JudgeError>;
}
