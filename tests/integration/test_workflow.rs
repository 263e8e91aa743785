//! End-to-end workflow journeys over scripted collaborators.

#![allow(clippy::unwrap_used)]

mod common;

use std::time::Duration;

use common::{fixture, fixture_with, single_question};
use koan_workflow::{Notice, Phase, WorkflowError};

#[tokio::test]
async fn test_full_journey_fail_hint_fix_pass_advance() {
    let f = fixture();

    // First attempt: wrong output.
    f.judge.push_fail("1", "");
    f.workflow.set_code("print(1)").await.unwrap();
    let snapshot = f.workflow.run().await.unwrap();
    assert_eq!(snapshot.phase, Phase::Evaluated { passed: false });
    assert!(snapshot.fix_available);
    assert!(!snapshot.explain_available, "no error, no explanation");

    // Ask for the hint.
    f.backend.push_reply("Loop from 1 to 5 and print each value.");
    let snapshot = f.workflow.request_hint().await.unwrap();
    assert_eq!(snapshot.notice, Some(Notice::HintInserted));
    assert!(snapshot.code_draft.starts_with("Loop from 1 to 5"));
    assert!(!snapshot.hint_available);

    // Back in editing; run again, fail again, take the AI fix.
    f.judge.push_fail("", "SyntaxError: invalid syntax");
    let snapshot = f.workflow.run().await.unwrap();
    assert!(snapshot.explain_available, "error message arms explain");

    f.backend
        .push_reply("```python\nfor i in range(1, 6):\n    print(i)\n```");
    let snapshot = f.workflow.request_fix().await.unwrap();
    assert_eq!(snapshot.notice, Some(Notice::CodeInserted));
    assert_eq!(snapshot.code_draft, "for i in range(1, 6):\n    print(i)");

    // The fixed code passes and the workflow moves on.
    f.judge.push_pass("1\n2\n3\n4\n5");
    let snapshot = f.workflow.run().await.unwrap();
    assert_eq!(snapshot.phase, Phase::Evaluated { passed: true });

    let snapshot = f.workflow.advance().await.unwrap();
    assert_eq!(snapshot.question_index, 1);
    assert!(snapshot.hint_available, "hint re-armed on the new question");
    assert!(snapshot.code_draft.is_empty());
}

#[tokio::test]
async fn test_explain_journey_replaces_result_text() {
    let f = fixture();

    f.judge.push_fail("", "IndentationError: expected an indented block");
    f.workflow.set_code("for i in range(5):\nprint(i)").await.unwrap();
    let snapshot = f.workflow.run().await.unwrap();
    assert!(snapshot.result.contains("IndentationError"));

    f.backend
        .push_reply("Python expected the loop body to be indented under the for line.");
    let snapshot = f.workflow.request_explain().await.unwrap();
    assert_eq!(snapshot.phase, Phase::Evaluated { passed: false });
    assert!(snapshot.result.starts_with("Python expected"));
    assert!(!snapshot.explain_available, "explanation consumed");
}

#[tokio::test]
async fn test_stdin_question_round_trip() {
    let f = fixture();

    // Walk to question 4 (reads stdin, input baked into the question).
    for expected in ["1\n2\n3\n4\n5", "120", "[1, 1, 3, 4, 5]"] {
        f.judge.push_pass(expected);
        f.workflow.set_code(format!("print({expected:?})")).await.unwrap();
        f.workflow.run().await.unwrap();
        f.workflow.advance().await.unwrap();
    }

    f.judge.push_pass("olleh");
    f.workflow.set_code("print(input()[::-1])").await.unwrap();
    let snapshot = f.workflow.run().await.unwrap();
    assert_eq!(
        snapshot.phase,
        Phase::Evaluated { passed: true },
        "question-supplied stdin avoids AwaitingStdin"
    );
    let calls = f.judge.calls();
    assert_eq!(calls.last().unwrap().stdin, "hello");
}

#[tokio::test]
async fn test_awaiting_stdin_blocks_until_submitted() {
    let f = fixture_with(single_question("Echo one line.", "echo"));

    f.workflow.set_code("print(input())").await.unwrap();
    let snapshot = f.workflow.run().await.unwrap();
    assert!(snapshot.awaiting_stdin);
    assert!(f.judge.calls().is_empty());

    // Running again while waiting is rejected; stdin must come first.
    assert!(matches!(
        f.workflow.run().await,
        Err(WorkflowError::InvalidPhase { .. })
    ));

    f.judge.push_pass("echo");
    let snapshot = f.workflow.submit_stdin("echo").await.unwrap();
    assert_eq!(snapshot.phase, Phase::Evaluated { passed: true });
    assert_eq!(f.judge.calls()[0].stdin, "echo");
}

#[tokio::test]
async fn test_assist_guard_allows_exactly_one_generation() {
    let f = fixture();
    let gate = f.backend.hold_generations();
    f.backend.push_reply("One held hint.");

    let hinting = std::sync::Arc::clone(&f.workflow);
    let hint_task = tokio::spawn(async move { hinting.request_hint().await });

    loop {
        if f.workflow.snapshot().await.phase == Phase::Hinting {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Every competing entry point is rejected while the hint generates.
    assert!(matches!(
        f.workflow.request_hint().await,
        Err(WorkflowError::GenerationBusy)
    ));
    assert!(matches!(
        f.workflow.request_fix().await,
        Err(WorkflowError::GenerationBusy)
    ));
    assert!(matches!(
        f.workflow.request_explain().await,
        Err(WorkflowError::GenerationBusy)
    ));
    assert!(matches!(
        f.workflow.run().await,
        Err(WorkflowError::GenerationBusy)
    ));

    gate.release();
    let snapshot = hint_task.await.unwrap().unwrap();
    assert_eq!(snapshot.notice, Some(Notice::HintInserted));

    // Exactly one generation reached the session.
    let log = f.backend.chunk_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].len(), 2, "preamble plus one hint prompt");
}

#[tokio::test]
async fn test_empty_fix_keeps_draft_and_reoffers_help() {
    let f = fixture();

    f.judge.push_fail("4", "");
    f.workflow.set_code("print(4)").await.unwrap();
    f.workflow.run().await.unwrap();

    f.backend.push_reply("```\n\n```");
    let snapshot = f.workflow.request_fix().await.unwrap();
    assert_eq!(snapshot.code_draft, "print(4)");
    assert_eq!(snapshot.notice, Some(Notice::AssistFailed));
    assert!(snapshot.fix_available);

    // The re-enabled offer works on the next try.
    f.backend.push_reply("print(5)");
    let snapshot = f.workflow.request_fix().await.unwrap();
    assert_eq!(snapshot.code_draft, "print(5)");
    assert_eq!(snapshot.notice, Some(Notice::CodeInserted));
}

#[tokio::test]
async fn test_snapshot_serializes_for_ui_consumption() {
    let f = fixture();
    f.judge.push_fail("", "NameError: name 'x' is not defined");
    f.workflow.set_code("print(x)").await.unwrap();
    let snapshot = f.workflow.run().await.unwrap();

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["questionIndex"], 0);
    assert_eq!(json["phase"]["evaluated"]["passed"], false);
    assert_eq!(json["fixAvailable"], true);
    assert_eq!(json["explainAvailable"], true);
    assert!(json["verdict"]["errorMessage"]
        .as_str()
        .unwrap()
        .contains("NameError"));
}
