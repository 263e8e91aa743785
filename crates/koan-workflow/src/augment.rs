//! Prompt construction for AI-assist requests.
//!
//! Fix prompts are augmented with a fixed constraint clause when the active
//! question's text contains a known keyword. This is table-driven substring
//! substitution, not language understanding: the first matching entry wins
//! and the clause text never varies.

use crate::judge::Verdict;
use crate::question::Question;

/// Keyword → constraint clause table for fix prompts.
///
/// Keywords are matched case-insensitively against the question prompt.
const FIX_CONSTRAINTS: &[(&str, &str)] = &[
    (
        "thread",
        "Use threads from the standard library and join every thread you start.",
    ),
    (
        "lock",
        "Guard shared state with a lock instead of relying on timing.",
    ),
    (
        "factorial",
        "Define factorial as a function and call it; do not hard-code the result.",
    ),
    (
        "standard input",
        "Read from standard input exactly once.",
    ),
];

/// Returns the constraint clause for the question, if its text matches a
/// known keyword.
#[must_use]
pub fn constraint_for(question_prompt: &str) -> Option<&'static str> {
    let lowered = question_prompt.to_lowercase();
    FIX_CONSTRAINTS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, clause)| *clause)
}

/// Builds the prompt for a fix request.
#[must_use]
pub fn fix_prompt(question: &Question, code: &str, verdict: Option<&Verdict>) -> String {
    let mut prompt = format!(
        "The exercise is:\n{}\n\nThe expected output is:\n{}\n\nThis attempt does not pass:\n{}\n",
        question.prompt, question.expected_output, code
    );
    if let Some(verdict) = verdict {
        if verdict.has_error() {
            prompt.push_str(&format!("\nIt fails with:\n{}\n", verdict.error_message));
        } else if !verdict.stdout.is_empty() {
            prompt.push_str(&format!("\nIt prints:\n{}\n", verdict.stdout));
        }
    }
    prompt.push_str("\nReply with only the corrected program, no commentary.");
    if let Some(clause) = constraint_for(&question.prompt) {
        prompt.push_str("\nConstraint: ");
        prompt.push_str(clause);
    }
    prompt
}

/// Builds the prompt for a hint request.
#[must_use]
pub fn hint_prompt(question: &Question, code: &str) -> String {
    let mut prompt = format!(
        "The exercise is:\n{}\n\nGive one short hint that points the learner in the right direction without revealing the solution. Do not include code.",
        question.prompt
    );
    if !code.trim().is_empty() {
        prompt.push_str(&format!("\n\nTheir draft so far:\n{code}"));
    }
    prompt
}

/// Builds the prompt for an explain request.
#[must_use]
pub fn explain_prompt(error_message: &str) -> String {
    format!(
        "A beginner's program failed with this error:\n{error_message}\n\nExplain in plain language what the error means and what usually causes it. Keep it under four sentences."
    )
}
