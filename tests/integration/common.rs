//! Shared fixtures for the integration tests.

// Each test target compiles this module separately and uses a different
// subset of it.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use koan_session::testing::ScriptedBackend;
use koan_session::{SamplingConfig, SessionManager};
use koan_workflow::{
    Judge, JudgeError, Question, QuestionSet, TutorWorkflow, Verdict, WorkflowOptions,
};

/// Judge double returning queued verdicts and recording every call.
#[derive(Default)]
pub struct ScriptedJudge {
    verdicts: Mutex<VecDeque<Verdict>>,
    calls: Mutex<Vec<JudgeCall>>,
}

/// One recorded judge invocation.
#[derive(Debug, Clone)]
pub struct JudgeCall {
    pub code: String,
    pub expected_output: String,
    pub stdin: String,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedJudge {
    pub fn push_verdict(&self, verdict: Verdict) {
        locked(&self.verdicts).push_back(verdict);
    }

    pub fn push_pass(&self, output: &str) {
        self.push_verdict(Verdict::from_execution(output, output, ""));
    }

    pub fn push_fail(&self, stdout: &str, error: &str) {
        self.push_verdict(Verdict::from_execution("\u{0}never matches", stdout, error));
    }

    pub fn calls(&self) -> Vec<JudgeCall> {
        locked(&self.calls).clone()
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn run(
        &self,
        code: &str,
        expected_output: &str,
        stdin: &str,
    ) -> Result<Verdict, JudgeError> {
        locked(&self.calls).push(JudgeCall {
            code: code.to_string(),
            expected_output: expected_output.to_string(),
            stdin: stdin.to_string(),
        });
        Ok(locked(&self.verdicts)
            .pop_front()
            .unwrap_or_else(|| Verdict::from_execution(expected_output, "", "no verdict queued")))
    }
}

/// A complete workflow wired to scripted collaborators.
pub struct Fixture {
    pub workflow: Arc<TutorWorkflow>,
    pub backend: ScriptedBackend,
    pub judge: Arc<ScriptedJudge>,
    pub manager: Arc<SessionManager>,
}

#[must_use]
pub fn fixture_with(questions: QuestionSet) -> Fixture {
    let backend = ScriptedBackend::new();
    let manager = Arc::new(SessionManager::new(Box::new(backend.clone())));
    let judge = Arc::new(ScriptedJudge::default());
    let workflow = Arc::new(TutorWorkflow::new(
        Arc::clone(&manager),
        Arc::clone(&judge) as Arc<dyn Judge>,
        questions,
        WorkflowOptions {
            model_path: PathBuf::from("model.gguf"),
            sampling: SamplingConfig::default(),
            ready_timeout: Duration::from_secs(5),
        },
    ));
    Fixture {
        workflow,
        backend,
        judge,
        manager,
    }
}

#[must_use]
pub fn fixture() -> Fixture {
    fixture_with(QuestionSet::builtin())
}

#[must_use]
pub fn single_question(prompt: &str, expected: &str) -> QuestionSet {
    #[allow(clippy::unwrap_used)]
    let set = QuestionSet::new(vec![Question::new(prompt, expected)]).unwrap();
    set
}
