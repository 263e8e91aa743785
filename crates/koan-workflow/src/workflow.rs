//! Per-question tutoring workflow.
//!
//! One [`TutorWorkflow`] drives a learner through a question set: running
//! drafts through the judge, tracking the per-question assist affordances,
//! and serializing access to the shared model session. State lives behind
//! one async mutex — assist methods transition under the lock, await the
//! generation stream without holding it, and re-acquire it to apply the
//! completion, so callback-driven updates always go through a single
//! logical owner.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use koan_session::{Readiness, SamplingConfig, SessionError, SessionManager};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::augment::{explain_prompt, fix_prompt, hint_prompt};
use crate::config::KoanConfig;
use crate::error::{Result, WorkflowError};
use crate::judge::{Judge, Verdict};
use crate::question::{Question, QuestionSet};
use crate::sanitize::sanitize;

/// Workflow phase for the active question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The learner is editing their draft.
    Editing,
    /// The draft reads stdin and none has been supplied yet.
    AwaitingStdin,
    /// The judge is executing the draft.
    Executing,
    /// A verdict has been received.
    Evaluated {
        /// Whether the draft passed.
        passed: bool,
    },
    /// An AI fix is being generated.
    Fixing,
    /// An AI hint is being generated.
    Hinting,
    /// An AI explanation is being generated.
    Explaining,
}

impl Phase {
    /// Returns `true` while an AI-assist generation is running.
    #[must_use]
    pub const fn is_generating(&self) -> bool {
        matches!(self, Self::Fixing | Self::Hinting | Self::Explaining)
    }

    /// Returns `true` while the workflow cannot accept new commands.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.is_generating() || matches!(self, Self::Executing)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Editing => write!(f, "editing"),
            Self::AwaitingStdin => write!(f, "awaiting stdin"),
            Self::Executing => write!(f, "executing"),
            Self::Evaluated { passed } => write!(f, "evaluated (passed: {passed})"),
            Self::Fixing => write!(f, "fixing"),
            Self::Hinting => write!(f, "hinting"),
            Self::Explaining => write!(f, "explaining"),
        }
    }
}

/// What an assist generation is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistPurpose {
    /// Replace the draft with corrected code.
    Fix,
    /// Nudge the learner without revealing the solution.
    Hint,
    /// Explain an execution error in plain language.
    Explain,
}

/// A prepared assist generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// What the generation is for.
    pub purpose: AssistPurpose,
    /// The full prompt sent to the model.
    pub prompt: String,
}

/// One-shot notices surfaced to the caller after an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    /// AI-generated code replaced the draft.
    CodeInserted,
    /// A hint was prepended above the draft.
    HintInserted,
    /// The assist produced nothing usable.
    AssistFailed,
}

/// Mutable per-question state.
struct State {
    index: usize,
    phase: Phase,
    code_draft: String,
    result: String,
    verdict: Option<Verdict>,
    stdin: Option<String>,
    hint_available: bool,
    explain_available: bool,
    fix_available: bool,
    notice: Option<Notice>,
}

impl State {
    fn fresh(index: usize, question: &Question) -> Self {
        Self {
            index,
            phase: Phase::Editing,
            code_draft: String::new(),
            result: String::new(),
            verdict: None,
            stdin: question.stdin.clone(),
            hint_available: true,
            explain_available: false,
            fix_available: false,
            notice: None,
        }
    }
}

/// Read-only view of the workflow state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSnapshot {
    /// Index of the active question (0-based).
    pub question_index: usize,
    /// Total number of questions in the set.
    pub question_total: usize,
    /// Current phase.
    pub phase: Phase,
    /// The learner's current draft.
    pub code_draft: String,
    /// Displayed result text (stdout, error, or explanation).
    pub result: String,
    /// The last verdict, if any.
    pub verdict: Option<Verdict>,
    /// Whether a hint can still be requested for this question.
    pub hint_available: bool,
    /// Whether an explanation can be requested for the current result.
    pub explain_available: bool,
    /// Whether a fix can be requested for the current result.
    pub fix_available: bool,
    /// Whether the workflow is executing or generating.
    pub busy: bool,
    /// Whether the workflow is waiting for stdin.
    pub awaiting_stdin: bool,
    /// One-shot notice from the last completed operation.
    pub notice: Option<Notice>,
}

/// Options controlling the workflow's use of the model session.
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Path to the model file, used for lazy initialization.
    pub model_path: PathBuf,
    /// Sampling parameters for initialization.
    pub sampling: SamplingConfig,
    /// How long to wait for the model instance to become ready.
    pub ready_timeout: Duration,
}

impl WorkflowOptions {
    /// Derives options from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &KoanConfig) -> Self {
        Self {
            model_path: PathBuf::from(&config.model_path),
            sampling: config.sampling,
            ready_timeout: Duration::from_secs(u64::from(config.ready_timeout)),
        }
    }
}

/// The tutoring workflow state machine.
pub struct TutorWorkflow {
    manager: Arc<SessionManager>,
    judge: Arc<dyn Judge>,
    questions: QuestionSet,
    options: WorkflowOptions,
    cancel: CancellationToken,
    state: Mutex<State>,
}

impl TutorWorkflow {
    /// Creates a workflow positioned at the first question.
    #[must_use]
    pub fn new(
        manager: Arc<SessionManager>,
        judge: Arc<dyn Judge>,
        questions: QuestionSet,
        options: WorkflowOptions,
    ) -> Self {
        let state = State::fresh(0, questions.at(0));
        Self {
            manager,
            judge,
            questions,
            options,
            cancel: CancellationToken::new(),
            state: Mutex::new(state),
        }
    }

    /// Returns the active question.
    pub async fn current_question(&self) -> Question {
        let state = self.state.lock().await;
        self.questions.at(state.index).clone()
    }

    /// Returns a read-only view of the current state.
    pub async fn snapshot(&self) -> WorkflowSnapshot {
        let state = self.state.lock().await;
        self.snapshot_of(&state)
    }

    /// Token cancelling any pending readiness waits, for embedders that
    /// need to shut the workflow down while the model is still loading.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Replaces the code draft.
    ///
    /// # Errors
    ///
    /// Rejected while the workflow is executing or generating.
    pub async fn set_code(&self, code: impl Into<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::reject_busy(&state, "edit the code")?;
        state.code_draft = code.into();
        Ok(())
    }

    /// Runs the current draft through the judge.
    ///
    /// If the draft references interactive input and no stdin has been
    /// supplied (neither by the question nor via
    /// [`submit_stdin`](Self::submit_stdin)), the workflow moves to
    /// `AwaitingStdin` instead of executing.
    ///
    /// # Errors
    ///
    /// Rejected while the workflow is busy or awaiting stdin.
    pub async fn run(&self) -> Result<WorkflowSnapshot> {
        let (code, expected, stdin) = {
            let mut state = self.state.lock().await;
            Self::reject_busy(&state, "run the code")?;
            match state.phase {
                Phase::Editing | Phase::Evaluated { .. } => {}
                other => return Err(WorkflowError::invalid_phase("run the code", other)),
            }
            state.notice = None;

            if references_stdin(&state.code_draft) && state.stdin.is_none() {
                debug!("draft reads stdin; waiting for input");
                state.phase = Phase::AwaitingStdin;
                return Ok(self.snapshot_of(&state));
            }

            state.phase = Phase::Executing;
            let question = self.questions.at(state.index);
            (
                state.code_draft.clone(),
                question.expected_output.clone(),
                state.stdin.clone().unwrap_or_default(),
            )
        };
        self.finish_execution(&code, &expected, &stdin).await
    }

    /// Supplies stdin for a draft that reads interactive input, then
    /// executes it.
    ///
    /// # Errors
    ///
    /// Rejected unless the workflow is in `AwaitingStdin`.
    pub async fn submit_stdin(&self, input: impl Into<String>) -> Result<WorkflowSnapshot> {
        let (code, expected, stdin) = {
            let mut state = self.state.lock().await;
            if state.phase != Phase::AwaitingStdin {
                return Err(WorkflowError::invalid_phase("submit stdin", state.phase));
            }
            let input = input.into();
            state.stdin = Some(input.clone());
            state.notice = None;
            state.phase = Phase::Executing;
            let question = self.questions.at(state.index);
            (
                state.code_draft.clone(),
                question.expected_output.clone(),
                input,
            )
        };
        self.finish_execution(&code, &expected, &stdin).await
    }

    /// Requests an AI-generated fix for a failed attempt.
    ///
    /// On success the sanitized reply replaces the draft and the workflow
    /// returns to `Editing`. A reply that sanitizes to empty leaves the
    /// draft unchanged and re-enables the fix offer.
    ///
    /// # Errors
    ///
    /// Rejected while another assist is generating, outside
    /// `Evaluated{passed: false}`, or once the fix offer has been consumed.
    pub async fn request_fix(&self) -> Result<WorkflowSnapshot> {
        let request = {
            let mut state = self.state.lock().await;
            Self::reject_busy(&state, "request a fix")?;
            if !matches!(state.phase, Phase::Evaluated { passed: false }) {
                return Err(WorkflowError::invalid_phase("request a fix", state.phase));
            }
            if !state.fix_available {
                return Err(WorkflowError::FixUnavailable);
            }
            state.fix_available = false;
            state.notice = None;
            state.phase = Phase::Fixing;
            GenerationRequest {
                purpose: AssistPurpose::Fix,
                prompt: fix_prompt(
                    self.questions.at(state.index),
                    &state.code_draft,
                    state.verdict.as_ref(),
                ),
            }
        };

        let outcome = self.generate_text(&request).await;

        let mut state = self.state.lock().await;
        match outcome.map(|raw| sanitize(&raw)) {
            Ok(clean) if !clean.is_empty() => {
                state.code_draft = clean;
                state.phase = Phase::Editing;
                state.notice = Some(Notice::CodeInserted);
                info!("fix inserted into draft");
            }
            Ok(_) => {
                debug!("fix reply sanitized to empty; draft unchanged");
                state.phase = Phase::Evaluated { passed: false };
                state.fix_available = true;
                state.notice = Some(Notice::AssistFailed);
            }
            Err(error) => {
                warn!(error = %error, "fix generation failed");
                state.phase = Phase::Evaluated { passed: false };
                state.fix_available = true;
                state.notice = Some(Notice::AssistFailed);
            }
        }
        Ok(self.snapshot_of(&state))
    }

    /// Requests the one hint available for this question.
    ///
    /// On success the sanitized hint is prepended above the draft and the
    /// workflow returns to `Editing`. The hint is consumed at request time
    /// and is not restored by later failures within the same question.
    ///
    /// # Errors
    ///
    /// Rejected while the workflow is busy or once the hint has been
    /// consumed.
    pub async fn request_hint(&self) -> Result<WorkflowSnapshot> {
        let (request, origin) = {
            let mut state = self.state.lock().await;
            Self::reject_busy(&state, "request a hint")?;
            if !state.hint_available {
                return Err(WorkflowError::HintUnavailable);
            }
            state.hint_available = false;
            state.notice = None;
            let origin = state.phase;
            state.phase = Phase::Hinting;
            let request = GenerationRequest {
                purpose: AssistPurpose::Hint,
                prompt: hint_prompt(self.questions.at(state.index), &state.code_draft),
            };
            (request, origin)
        };

        let outcome = self.generate_text(&request).await;

        let mut state = self.state.lock().await;
        match outcome.map(|raw| sanitize(&raw)) {
            Ok(clean) if !clean.is_empty() => {
                state.code_draft = if state.code_draft.is_empty() {
                    clean
                } else {
                    format!("{clean}\n{}", state.code_draft)
                };
                state.phase = Phase::Editing;
                state.notice = Some(Notice::HintInserted);
            }
            Ok(_) => {
                debug!("hint reply sanitized to empty");
                state.phase = origin;
                state.notice = Some(Notice::AssistFailed);
            }
            Err(error) => {
                warn!(error = %error, "hint generation failed");
                state.phase = origin;
                state.notice = Some(Notice::AssistFailed);
            }
        }
        Ok(self.snapshot_of(&state))
    }

    /// Requests a plain-language explanation of the current error.
    ///
    /// On success the explanation replaces the displayed result text and
    /// the workflow returns to the evaluated state. The affordance is
    /// consumed at request time and re-armed by the next verdict that
    /// carries an error.
    ///
    /// # Errors
    ///
    /// Rejected while the workflow is busy, outside an evaluated state, or
    /// when no explanation is available.
    pub async fn request_explain(&self) -> Result<WorkflowSnapshot> {
        let (request, passed) = {
            let mut state = self.state.lock().await;
            Self::reject_busy(&state, "request an explanation")?;
            let Phase::Evaluated { passed } = state.phase else {
                return Err(WorkflowError::invalid_phase(
                    "request an explanation",
                    state.phase,
                ));
            };
            if !state.explain_available {
                return Err(WorkflowError::ExplainUnavailable);
            }
            state.explain_available = false;
            state.notice = None;
            state.phase = Phase::Explaining;
            let error_message = state
                .verdict
                .as_ref()
                .map(|v| v.error_message.clone())
                .unwrap_or_default();
            let request = GenerationRequest {
                purpose: AssistPurpose::Explain,
                prompt: explain_prompt(&error_message),
            };
            (request, passed)
        };

        let outcome = self.generate_text(&request).await;

        let mut state = self.state.lock().await;
        match outcome.map(|raw| sanitize(&raw)) {
            Ok(clean) if !clean.is_empty() => {
                state.result = clean;
                state.phase = Phase::Evaluated { passed };
            }
            Ok(_) => {
                debug!("explanation sanitized to empty");
                state.phase = Phase::Evaluated { passed };
                state.notice = Some(Notice::AssistFailed);
            }
            Err(error) => {
                warn!(error = %error, "explanation generation failed");
                state.phase = Phase::Evaluated { passed };
                state.notice = Some(Notice::AssistFailed);
            }
        }
        Ok(self.snapshot_of(&state))
    }

    /// Moves to the next question after a passed verdict.
    ///
    /// Clears the draft, result, and verdict, and re-arms the hint. A
    /// no-op when already on the last question.
    ///
    /// # Errors
    ///
    /// Rejected unless the workflow is in `Evaluated{passed: true}`.
    pub async fn advance(&self) -> Result<WorkflowSnapshot> {
        let mut state = self.state.lock().await;
        Self::reject_busy(&state, "advance")?;
        if !matches!(state.phase, Phase::Evaluated { passed: true }) {
            return Err(WorkflowError::invalid_phase(
                "advance to the next question",
                state.phase,
            ));
        }

        if self.questions.is_last(state.index) {
            debug!("already on the last question");
            return Ok(self.snapshot_of(&state));
        }

        let next = state.index + 1;
        *state = State::fresh(next, self.questions.at(next));
        info!(question = next + 1, "advanced to next question");
        Ok(self.snapshot_of(&state))
    }

    /// Applies the judge verdict and moves to `Evaluated`.
    async fn finish_execution(
        &self,
        code: &str,
        expected: &str,
        stdin: &str,
    ) -> Result<WorkflowSnapshot> {
        let verdict = match self.judge.run(code, expected, stdin).await {
            Ok(verdict) => verdict,
            Err(error) => {
                warn!(error = %error, "judge failed; recording failed verdict");
                Verdict::failed(error.to_string())
            }
        };

        let mut state = self.state.lock().await;
        state.result = if verdict.has_error() {
            verdict.error_message.clone()
        } else {
            verdict.stdout.clone()
        };
        state.fix_available = !verdict.passed;
        state.explain_available = verdict.has_error();
        state.phase = Phase::Evaluated {
            passed: verdict.passed,
        };
        info!(passed = verdict.passed, "verdict received");
        state.verdict = Some(verdict);
        Ok(self.snapshot_of(&state))
    }

    /// Runs an assist generation to completion and returns the raw reply.
    async fn generate_text(&self, request: &GenerationRequest) -> Result<String> {
        debug!(purpose = ?request.purpose, "issuing assist generation");
        self.ensure_ready().await?;
        let stream = self.manager.generate(&request.prompt).await?;
        Ok(stream.collect_text().await?)
    }

    /// Makes sure the shared model instance is ready, initializing it
    /// lazily with an explicit timeout and cancellation.
    async fn ensure_ready(&self) -> Result<()> {
        match self.manager.readiness() {
            Readiness::Ready => Ok(()),
            Readiness::Closed => Err(SessionError::Closed.into()),
            _ => {
                let timeout = self.options.ready_timeout;
                let initialize = self
                    .manager
                    .initialize(&self.options.model_path, self.options.sampling);
                tokio::select! {
                    () = self.cancel.cancelled() => Err(SessionError::WaitCancelled.into()),
                    result = tokio::time::timeout(timeout, initialize) => match result {
                        Ok(inner) => inner.map_err(Into::into),
                        Err(_) => Err(SessionError::ReadyTimeout { waited: timeout }.into()),
                    },
                }
            }
        }
    }

    fn reject_busy(state: &State, action: &str) -> Result<()> {
        if state.phase.is_generating() {
            return Err(WorkflowError::GenerationBusy);
        }
        if state.phase == Phase::Executing {
            return Err(WorkflowError::invalid_phase(action, state.phase));
        }
        Ok(())
    }

    fn snapshot_of(&self, state: &State) -> WorkflowSnapshot {
        WorkflowSnapshot {
            question_index: state.index,
            question_total: self.questions.len(),
            phase: state.phase,
            code_draft: state.code_draft.clone(),
            result: state.result.clone(),
            verdict: state.verdict.clone(),
            hint_available: state.hint_available,
            explain_available: state.explain_available,
            fix_available: state.fix_available,
            busy: state.phase.is_busy(),
            awaiting_stdin: state.phase == Phase::AwaitingStdin,
            notice: state.notice,
        }
    }
}

/// Returns `true` if the draft references interactive input.
fn references_stdin(code: &str) -> bool {
    code.contains("input(") || code.contains("sys.stdin")
}
