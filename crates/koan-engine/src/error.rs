//! Error types for the candle inference backend.

use std::path::PathBuf;

use koan_session::SessionError;

/// Errors raised while loading or running the model.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The model file could not be opened.
    #[error("failed to open model file '{path}': {message}")]
    ModelOpen {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error text.
        message: String,
    },

    /// The GGUF container could not be parsed.
    #[error("failed to parse GGUF content: {0}")]
    GgufParse(String),

    /// The quantized weights could not be constructed.
    #[error("failed to load model weights: {0}")]
    WeightsLoad(String),

    /// No tokenizer.json was found near the model file.
    #[error("tokenizer not found for the selected model\n\nSuggestion: place tokenizer.json beside the GGUF file")]
    TokenizerMissing,

    /// The tokenizer file could not be loaded.
    #[error("failed to load tokenizer: {0}")]
    TokenizerLoad(String),

    /// The tokenizer lacks the chat tokens the model family requires.
    #[error("tokenizer/model incompatibility: {0}")]
    SpecialTokens(String),

    /// Prompt tokenization failed.
    #[error("tokenization failed: {0}")]
    Tokenize(String),

    /// A forward/sample step failed mid-generation.
    #[error("decode step failed: {0}")]
    Decode(String),
}

impl From<EngineError> for SessionError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::ModelOpen { .. }
            | EngineError::GgufParse(_)
            | EngineError::WeightsLoad(_)
            | EngineError::TokenizerMissing
            | EngineError::TokenizerLoad(_)
            | EngineError::SpecialTokens(_) => Self::initialization(error.to_string()),
            EngineError::Tokenize(_) | EngineError::Decode(_) => {
                Self::generation(error.to_string())
            }
        }
    }
}
