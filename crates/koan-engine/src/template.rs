//! Model families: chat templates, stop markers, special tokens.

use std::path::{Path, PathBuf};

use tokenizers::Tokenizer;

use crate::error::EngineError;

/// Supported model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Qwen2-style checkpoints (default).
    Qwen,
    /// Llama-style checkpoints.
    Llama,
}

impl ModelFamily {
    /// Infers the family from the model file name. Unrecognized names fall
    /// back to Qwen, the family the tutor ships with.
    #[must_use]
    pub fn infer(model_path: &Path) -> Self {
        let name = model_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase();
        if name.contains("llama") {
            Self::Llama
        } else {
            Self::Qwen
        }
    }
}

/// One turn of the accumulated session context.
#[derive(Debug, Clone)]
pub enum Turn {
    /// An input chunk pushed by a caller.
    Chunk(String),
    /// A completed assistant reply.
    Reply(String),
}

/// Renders the accumulated turns into the family's chat format, ending
/// with an open assistant header for the next reply.
#[must_use]
pub fn render_transcript(family: ModelFamily, turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        match (family, turn) {
            (ModelFamily::Qwen, Turn::Chunk(text)) => {
                out.push_str(&format!("<|im_start|>user\n{text}\n<|im_end|>\n"));
            }
            (ModelFamily::Qwen, Turn::Reply(text)) => {
                out.push_str(&format!("<|im_start|>assistant\n{text}\n<|im_end|>\n"));
            }
            (ModelFamily::Llama, Turn::Chunk(text)) => {
                out.push_str(&format!(
                    "<|start_header_id|>user<|end_header_id|>\n\n{text}\n<|eot_id|>"
                ));
            }
            (ModelFamily::Llama, Turn::Reply(text)) => {
                out.push_str(&format!(
                    "<|start_header_id|>assistant<|end_header_id|>\n\n{text}\n<|eot_id|>"
                ));
            }
        }
    }
    match family {
        ModelFamily::Qwen => out.push_str("<|im_start|>assistant\n"),
        ModelFamily::Llama => {
            out.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
        }
    }
    out
}

/// Returns `true` when decoded text contains a family stop marker that the
/// tokenizer leaked through as plain text.
#[must_use]
pub fn is_stop_text(family: ModelFamily, text: &str) -> bool {
    let markers: &[&str] = match family {
        ModelFamily::Qwen => &["<|im_end|>", "<|endoftext|>"],
        ModelFamily::Llama => &["<|eot_id|>", "<|end_of_text|>"],
    };
    markers.iter().any(|marker| text.contains(marker))
}

/// Finds tokenizer.json next to the model file, or in the working
/// directory as a fallback.
#[must_use]
pub fn resolve_tokenizer_path(model_path: &Path) -> Option<PathBuf> {
    let beside = model_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("tokenizer.json");
    if beside.exists() {
        return Some(beside);
    }
    let cwd = PathBuf::from("tokenizer.json");
    if cwd.exists() {
        return Some(cwd);
    }
    None
}

/// Resolves the (eos, eot) token ids the decode loop stops on.
///
/// Fails fast when the tokenizer lacks the family's chat tokens, since a
/// mismatched pair would generate unbounded output.
pub fn resolve_special_tokens(
    tokenizer: &Tokenizer,
    family: ModelFamily,
) -> Result<(u32, u32), EngineError> {
    match family {
        ModelFamily::Qwen => {
            let eos = tokenizer
                .token_to_id("<|endoftext|>")
                .or_else(|| tokenizer.token_to_id("</s>"))
                .ok_or_else(|| {
                    EngineError::SpecialTokens(
                        "Qwen requires <|endoftext|> or </s>".to_string(),
                    )
                })?;
            let eot = tokenizer.token_to_id("<|im_end|>").ok_or_else(|| {
                EngineError::SpecialTokens("Qwen template requires <|im_end|>".to_string())
            })?;
            if tokenizer.token_to_id("<|im_start|>").is_none() {
                return Err(EngineError::SpecialTokens(
                    "Qwen template requires <|im_start|>".to_string(),
                ));
            }
            Ok((eos, eot))
        }
        ModelFamily::Llama => {
            let eos = tokenizer
                .token_to_id("<|end_of_text|>")
                .or_else(|| tokenizer.token_to_id("</s>"))
                .ok_or_else(|| {
                    EngineError::SpecialTokens(
                        "Llama requires <|end_of_text|> or </s>".to_string(),
                    )
                })?;
            let eot = tokenizer.token_to_id("<|eot_id|>").ok_or_else(|| {
                EngineError::SpecialTokens("Llama template requires <|eot_id|>".to_string())
            })?;
            Ok((eos, eot))
        }
    }
}
