//! Error types for the tutoring workflow.

use std::path::PathBuf;

use koan_session::SessionError;

/// A specialized `Result` type for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors that can occur while driving the tutoring workflow.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your koan.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Question Set Errors
    // ========================================================================
    /// Questions file was not found at the specified path.
    #[error("Questions file not found: '{path}'\n\nSuggestion: Check the 'questions' field in koan.json or remove it to use the built-in set")]
    QuestionsNotFound {
        /// Path where the questions file was expected.
        path: PathBuf,
    },

    /// Questions file contains invalid JSON.
    #[error("Invalid questions file '{path}': {message}\n\nSuggestion: The file must be a JSON array of {{prompt, expectedOutput, stdin?}} objects")]
    QuestionsParseError {
        /// Path to the questions file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// A question set must contain at least one question.
    #[error("Question set is empty\n\nSuggestion: Provide at least one question")]
    NoQuestions,

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// The requested action is not legal in the current phase.
    #[error("cannot {action} while the workflow is {phase}")]
    InvalidPhase {
        /// The attempted action.
        action: String,
        /// The current phase name.
        phase: String,
    },

    /// An AI-assist generation is already running for this workflow.
    #[error("another assist request is already generating for this question")]
    GenerationBusy,

    /// The one hint for this question has already been used.
    #[error("no hint is available for this question")]
    HintUnavailable,

    /// No explanation is available for the current result.
    #[error("no explanation is available for the current result")]
    ExplainUnavailable,

    /// The fix offer has already been taken up for this verdict.
    #[error("no fix offer is available for the current result")]
    FixUnavailable,

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Error from the model session layer.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl WorkflowError {
    /// Creates a new `ConfigParseError`.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError`.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `QuestionsParseError`.
    #[must_use]
    pub fn questions_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::QuestionsParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidPhase` error.
    #[must_use]
    pub fn invalid_phase(action: impl Into<String>, phase: impl std::fmt::Display) -> Self {
        Self::InvalidPhase {
            action: action.into(),
            phase: phase.to_string(),
        }
    }
}
