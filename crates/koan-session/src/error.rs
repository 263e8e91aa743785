//! Error types for model session management.
//!
//! This module defines the error hierarchy for engine loading, session
//! lifecycle operations, and streamed generation, along with the diagnostic
//! cleaner that strips internal trace dumps from backend error messages.

use std::time::Duration;

/// A specialized `Result` type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Marker that separates a human-readable backend diagnostic from the
/// internal trace dump appended after it. Everything from the marker on is
/// stripped before the message is surfaced.
pub const TRACE_MARKER: &str = "=== Source Location Trace";

/// Errors that can occur while managing a model instance.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Engine or model load failure. Fatal for the instance.
    ///
    /// The message has already been passed through [`clean_diagnostic`].
    #[error("failed to initialize model engine: {message}\n\nSuggestion: check the model path and that the file is a complete GGUF export")]
    Initialization {
        /// Cleaned diagnostic from the backend.
        message: String,
    },

    /// A sampling parameter is out of range.
    #[error("invalid sampling configuration: {message}\n\nSuggestion: {suggestion}")]
    InvalidSampling {
        /// Description of the invalid value.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// The session cannot be closed right now because a generation is still
    /// in flight. Transient; only reported during reset and cleanup.
    #[error("session is busy: a generation is still in flight")]
    Busy,

    /// A generation request is already running against this model instance.
    #[error("a generation request is already in flight for this model instance")]
    RequestInFlight,

    /// Unexpected mid-stream generation failure. Not retried.
    #[error("generation failed: {message}")]
    Generation {
        /// Description of the failure.
        message: String,
    },

    /// Non-generation backend failure (chunk append, session teardown).
    #[error("inference backend failure: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },

    /// The previous generation on this session was cancelled mid-stream;
    /// the context is in an undefined partial state.
    #[error("session was cancelled mid-generation; reset the session before generating again")]
    Tainted,

    /// No model instance has been initialized yet.
    #[error("model instance is not initialized")]
    NotReady,

    /// The readiness wait elapsed before the instance became ready.
    #[error("model instance not ready after {waited:?}")]
    ReadyTimeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The readiness wait was cancelled by the caller.
    #[error("readiness wait was cancelled")]
    WaitCancelled,

    /// The instance has been cleaned up. Terminal; a closed instance cannot
    /// be re-initialized.
    #[error("model instance has been closed and cannot be reused")]
    Closed,
}

impl SessionError {
    /// Creates an `Initialization` error, stripping any internal trace
    /// suffix from the message first.
    #[must_use]
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization {
            message: clean_diagnostic(&message.into()),
        }
    }

    /// Creates an `InvalidSampling` error.
    #[must_use]
    pub fn invalid_sampling(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidSampling {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a `Generation` error.
    #[must_use]
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Creates an `Internal` backend error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the operation may be retried.
    ///
    /// Only `Busy` is transient; everything else is either terminal for the
    /// instance or a caller mistake.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// Strips the internal trace suffix from a backend diagnostic.
///
/// Backend errors append a source-location trace after a recognized marker;
/// only the part before the marker is meaningful to users.
#[must_use]
pub fn clean_diagnostic(message: &str) -> String {
    message
        .find(TRACE_MARKER)
        .map_or_else(|| message.to_string(), |idx| message[..idx].trim_end().to_string())
}
