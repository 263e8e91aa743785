//! Quantized weight containers for the supported model families.

use std::path::Path;

use candle_core::{Device, Tensor};
use candle_transformers::models::quantized_llama;
use candle_transformers::models::quantized_qwen2;

use crate::error::EngineError;
use crate::template::ModelFamily;

/// Loaded quantized weights, dispatching on the model family.
pub enum RuntimeWeights {
    /// Llama-family weights.
    Llama(quantized_llama::ModelWeights),
    /// Qwen2-family weights.
    Qwen2(quantized_qwen2::ModelWeights),
}

impl RuntimeWeights {
    /// Reads a GGUF file and builds the family's weight structure.
    pub fn load_from_gguf(
        path: &Path,
        family: ModelFamily,
        device: &Device,
    ) -> Result<Self, EngineError> {
        let mut file = std::fs::File::open(path).map_err(|e| EngineError::ModelOpen {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let content = candle_core::quantized::gguf_file::Content::read(&mut file)
            .map_err(|e| EngineError::GgufParse(e.to_string()))?;

        match family {
            ModelFamily::Llama => {
                let weights = quantized_llama::ModelWeights::from_gguf(content, &mut file, device)
                    .map_err(|e| EngineError::WeightsLoad(e.to_string()))?;
                Ok(Self::Llama(weights))
            }
            ModelFamily::Qwen => {
                let weights = quantized_qwen2::ModelWeights::from_gguf(content, &mut file, device)
                    .map_err(|e| {
                        let message = e.to_string();
                        if message.contains("cannot find tensor info for output_norm.weight") {
                            EngineError::WeightsLoad(
                                "missing 'output_norm.weight'; the GGUF is likely an incomplete split shard. Use a full single-file GGUF".to_string(),
                            )
                        } else {
                            EngineError::WeightsLoad(message)
                        }
                    })?;
                Ok(Self::Qwen2(weights))
            }
        }
    }

    /// One decode step over the given input tokens at `position`.
    pub fn forward(&mut self, input: &Tensor, position: usize) -> Result<Tensor, EngineError> {
        let logits = match self {
            Self::Llama(weights) => weights.forward(input, position),
            Self::Qwen2(weights) => weights.forward(input, position),
        };
        logits.map_err(|e| EngineError::Decode(e.to_string()))
    }

    /// Returns a KV-cache-fresh copy when the family supports cloning.
    ///
    /// Qwen2 weights carry state that cannot be cloned; callers fall back
    /// to reloading from disk.
    #[must_use]
    pub fn duplicate_if_supported(&self) -> Option<Self> {
        match self {
            Self::Llama(weights) => Some(Self::Llama(weights.clone())),
            Self::Qwen2(_) => None,
        }
    }
}
