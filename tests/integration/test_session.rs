//! Session lifecycle behavior through the public API, including the
//! reset-retry protocol and the pinned stale-session semantics.

#![allow(clippy::unwrap_used)]

mod common;

use std::path::Path;
use std::time::Duration;

use common::fixture;
use koan_session::testing::ScriptedBackend;
use koan_session::{Readiness, SamplingConfig, SessionError, SessionManager, PERSONA_PREAMBLE};
use koan_workflow::Phase;

async fn ready_manager(backend: &ScriptedBackend) -> SessionManager {
    let manager = SessionManager::new(Box::new(backend.clone()));
    manager
        .initialize(Path::new("model.gguf"), SamplingConfig::default())
        .await
        .unwrap();
    manager
}

#[tokio::test]
async fn test_preamble_precedes_first_user_chunk_and_never_repeats() {
    let backend = ScriptedBackend::new();
    backend.push_reply("alpha");
    backend.push_reply("beta");
    let manager = ready_manager(&backend).await;

    manager.generate("one").await.unwrap().collect_text().await.unwrap();
    manager.generate("two").await.unwrap().collect_text().await.unwrap();

    let log = backend.chunk_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0][0], PERSONA_PREAMBLE);
    assert_eq!(
        log[0]
            .iter()
            .filter(|chunk| chunk.as_str() == PERSONA_PREAMBLE)
            .count(),
        1
    );
    assert_eq!(log[0][1..], ["one", "two"]);
}

#[tokio::test]
async fn test_fragments_reconstruct_reply_and_terminate() {
    let backend = ScriptedBackend::new();
    backend.push_reply("a somewhat longer scripted reply");
    let manager = ready_manager(&backend).await;

    let mut stream = manager.generate("question").await.unwrap();
    let mut pieces = Vec::new();
    let mut saw_final = false;
    while let Some(item) = stream.next().await {
        let fragment = item.unwrap();
        pieces.push(fragment.text.clone());
        if fragment.is_final {
            assert!(fragment.text.is_empty(), "terminal fragment may be empty");
            saw_final = true;
            break;
        }
    }
    assert!(saw_final);
    assert_eq!(pieces.concat(), "a somewhat longer scripted reply");
}

#[tokio::test(start_paused = true)]
async fn test_reset_during_generation_retries_then_abandons() {
    let backend = ScriptedBackend::new();
    let gate = backend.hold_generations();
    let manager = ready_manager(&backend).await;

    let stream = manager.generate("busy work").await.unwrap();

    let started = tokio::time::Instant::now();
    manager.reset().await.unwrap();
    assert_eq!(
        started.elapsed(),
        Duration::from_millis(1000),
        "five attempts at 200 ms spacing"
    );
    assert_eq!(backend.sessions_opened(), 1, "stale session kept");

    gate.release();
    stream.collect_text().await.unwrap();
}

#[tokio::test]
async fn test_reset_while_idle_succeeds_immediately() {
    let backend = ScriptedBackend::new();
    let manager = ready_manager(&backend).await;

    manager.reset().await.unwrap();
    assert_eq!(backend.sessions_opened(), 2);
    assert_eq!(backend.sessions_closed(), 1);
}

#[tokio::test]
async fn test_stale_session_bleeds_context_into_next_task() {
    // Pins the flagged open question: an abandoned reset keeps the old
    // preamble and turns, so the next unrelated task sees them.
    let backend = ScriptedBackend::new();
    let gate = backend.hold_generations();
    backend.push_reply("held");
    backend.push_reply("bled");
    let manager = ready_manager(&backend).await;

    let stream = manager.generate("task one").await.unwrap();
    manager.reset().await.unwrap();
    gate.release();
    stream.collect_text().await.unwrap();

    manager
        .generate("task two")
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();

    let log = backend.chunk_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0], [PERSONA_PREAMBLE, "task one", "task two"]);
}

#[tokio::test]
async fn test_successful_reset_gives_clean_context() {
    // The counterpart behavior: a reset that succeeds discards the old
    // context wholesale and the preamble is injected afresh.
    let backend = ScriptedBackend::new();
    backend.push_reply("first");
    backend.push_reply("second");
    let manager = ready_manager(&backend).await;

    manager.generate("task one").await.unwrap().collect_text().await.unwrap();
    manager.reset().await.unwrap();
    manager.generate("task two").await.unwrap().collect_text().await.unwrap();

    let log = backend.chunk_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0], [PERSONA_PREAMBLE, "task one"]);
    assert_eq!(log[1], [PERSONA_PREAMBLE, "task two"]);
}

#[tokio::test]
async fn test_chat_and_workflow_share_one_instance() {
    // The manager is one shared handle: a chat turn and a workflow assist
    // land in the same session, preamble injected once overall.
    let f = fixture();
    f.backend.push_reply("chat answer");
    f.backend.push_reply("print(5)");

    // Chat-style call straight on the manager (initializes lazily via the
    // workflow path below, so initialize explicitly here).
    f.manager
        .initialize(Path::new("model.gguf"), SamplingConfig::default())
        .await
        .unwrap();
    f.manager
        .generate("what is a list comprehension?")
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();

    // Workflow assist on the same instance.
    f.judge.push_fail("4", "");
    f.workflow.set_code("print(4)").await.unwrap();
    f.workflow.run().await.unwrap();
    let snapshot = f.workflow.request_fix().await.unwrap();
    assert_eq!(snapshot.phase, Phase::Editing);

    let log = f.backend.chunk_log();
    assert_eq!(log.len(), 1, "one session serves both callers");
    assert_eq!(log[0][0], PERSONA_PREAMBLE);
    assert_eq!(log[0].len(), 3, "preamble, chat turn, fix prompt");
}

#[tokio::test]
async fn test_cleanup_then_reuse_is_rejected() {
    let backend = ScriptedBackend::new();
    let manager = ready_manager(&backend).await;

    manager.clean_up().await;
    manager.clean_up().await;
    assert_eq!(manager.readiness(), Readiness::Closed);

    assert!(matches!(
        manager
            .initialize(Path::new("model.gguf"), SamplingConfig::default())
            .await,
        Err(SessionError::Closed)
    ));
}

#[tokio::test]
async fn test_cancelled_generation_requires_reset() {
    let backend = ScriptedBackend::new();
    let gate = backend.hold_generations();
    backend.push_reply("unseen");
    let manager = ready_manager(&backend).await;

    let stream = manager.generate("slow").await.unwrap();
    stream.cancel();
    stream.collect_text().await.unwrap();

    assert!(matches!(
        manager.generate("next").await,
        Err(SessionError::Tainted)
    ));

    gate.release();
    manager.reset().await.unwrap();
    backend.push_reply("after reset");
    let text = manager
        .generate("next")
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();
    assert_eq!(text, "after reset");
}
