//! Koan Inference Engine
//!
//! Hosts GGUF quantized models in-process via candle and exposes them
//! through the `koan-session` backend traits. Supports Qwen2 and Llama
//! model families, inferred from the model file name; the tokenizer is
//! resolved from a `tokenizer.json` beside the model file.

pub mod engine;
pub mod error;
pub mod template;
pub mod weights;

pub use engine::{CandleEngine, CandleSession, GgufEngineLoader};
pub use error::EngineError;
pub use template::ModelFamily;
pub use weights::RuntimeWeights;
