//! Recovers runnable source text from raw streamed model output.
//!
//! Model replies wrap code in markdown fences and sometimes leak literal
//! escape sequences instead of real line breaks. [`sanitize`] applies a
//! fixed rule order and is idempotent; an empty result is the designated
//! "unusable" signal that callers must branch on explicitly.

use once_cell::sync::Lazy;
use regex::Regex;

/// Opening fence marker with an optional language tag and its newline.
static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)] // static pattern
    let re = Regex::new(r"```[A-Za-z0-9_+#.\-]*[ \t]*\r?\n").unwrap();
    re
});

/// Cleans raw model output into runnable source text.
///
/// Rule order:
/// 1. trim surrounding whitespace;
/// 2. strip fence markers anywhere in the text, together with a language
///    tag immediately following an opening marker, and any closing marker;
/// 3. convert literal `\r\n` and `\n` escape sequences into real line
///    breaks;
/// 4. collapse a backslash immediately followed by a real line break into
///    just the line break;
/// 5. final trim.
///
/// Returns the empty string when nothing usable remains.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    let text = raw.trim();
    let text = FENCE_OPEN.replace_all(text, "");
    let text = text.replace("```", "");
    let text = text.replace("\\r\\n", "\n").replace("\\n", "\n");
    let text = text.replace("\\\n", "\n");
    text.trim().to_string()
}
