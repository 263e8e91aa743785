//! Programming exercises and question sets.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

/// One programming exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Task description shown to the learner.
    pub prompt: String,

    /// Exact stdout the solution must produce (compared after trimming).
    pub expected_output: String,

    /// Input piped to the program, for exercises that read stdin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

impl Question {
    /// Creates a question without stdin.
    #[must_use]
    pub fn new(prompt: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            expected_output: expected_output.into(),
            stdin: None,
        }
    }

    /// Attaches stdin to the question.
    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }
}

/// An ordered, non-empty set of questions.
#[derive(Debug, Clone)]
pub struct QuestionSet {
    questions: Vec<Question>,
}

impl QuestionSet {
    /// Creates a set from the given questions.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::NoQuestions` for an empty list.
    pub fn new(questions: Vec<Question>) -> Result<Self> {
        if questions.is_empty() {
            return Err(WorkflowError::NoQuestions);
        }
        Ok(Self { questions })
    }

    /// The built-in practice set.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            questions: vec![
                Question::new(
                    "Print the numbers from 1 to 5 inclusive, each on a separate line.",
                    "1\n2\n3\n4\n5",
                ),
                Question::new(
                    "Write a function factorial(n) and print factorial(5).",
                    "120",
                ),
                Question::new(
                    "Given the list nums = [3,1,4,1,5], print it sorted ascending.",
                    "[1, 1, 3, 4, 5]",
                ),
                Question::new(
                    "Read a line from standard input and print it reversed.",
                    "olleh",
                )
                .with_stdin("hello"),
                Question::new(
                    "Compute the sum of even numbers between 1 and 10 inclusive and print it.",
                    "30",
                ),
            ],
        }
    }

    /// Loads a question set from a JSON file.
    ///
    /// The file must contain a JSON array of question objects.
    ///
    /// # Errors
    ///
    /// Returns `QuestionsNotFound` when the file does not exist,
    /// `QuestionsParseError` for invalid JSON, and `NoQuestions` for an
    /// empty array.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkflowError::QuestionsNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(WorkflowError::questions_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let questions: Vec<Question> = serde_json::from_str(&contents)
            .map_err(|e| WorkflowError::questions_parse(path, e.to_string()))?;
        Self::new(questions)
    }

    /// Number of questions in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Returns `true` if the set holds no questions. Never true for a
    /// constructed set; provided for completeness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Returns the question at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    /// Returns the question at `index`, which must be in range.
    ///
    /// The workflow keeps its index within bounds at all times, so this
    /// accessor trades a runtime check for ergonomics at call sites.
    #[must_use]
    pub fn at(&self, index: usize) -> &Question {
        &self.questions[index]
    }

    /// Returns `true` if `index` is the last question.
    #[must_use]
    pub fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.questions.len()
    }
}
