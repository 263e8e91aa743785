//! Scripted in-memory backend for tests.
//!
//! The scripted backend lets lifecycle tests control exactly what the
//! inference layer does: replies are queued ahead of time, generations can
//! be held open behind a gate to simulate long decodes, and session closes
//! can be made to report busy a configured number of times to drive the
//! reset retry path.
//!
//! # Example
//!
//! ```
//! use koan_session::testing::ScriptedBackend;
//! use koan_session::{SamplingConfig, SessionManager};
//!
//! # async fn example() -> Result<(), koan_session::SessionError> {
//! let backend = ScriptedBackend::new();
//! backend.push_reply("print(1)");
//!
//! let manager = SessionManager::new(Box::new(backend.clone()));
//! manager
//!     .initialize("model.gguf".as_ref(), SamplingConfig::default())
//!     .await?;
//! let reply = manager.generate("fix my code").await?.collect_text().await?;
//! assert_eq!(reply, "print(1)");
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::backend::{EngineLoader, InferenceEngine, InferenceSession};
use crate::config::SamplingConfig;
use crate::error::{Result, SessionError};
use crate::stream::{fragment_channel, FragmentReceiver};

/// Shared mutable script state, visible both to the backend handle kept by
/// the test and to the sessions handed to the manager.
#[derive(Default)]
struct ScriptState {
    replies: Mutex<VecDeque<String>>,
    chunk_log: Mutex<Vec<Vec<String>>>,
    busy_closes: AtomicUsize,
    load_failure: Mutex<Option<String>>,
    close_failure: Mutex<Option<String>>,
    generation_failure: Mutex<Option<String>>,
    gate: Mutex<Option<Gate>>,
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
struct Gate {
    released: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Gate {
    async fn wait(&self, cancel: &CancellationToken) {
        while !self.released.load(Ordering::SeqCst) {
            tokio::select! {
                () = self.notify.notified() => {}
                () = cancel.cancelled() => break,
            }
        }
    }
}

/// Handle to generations held open by [`ScriptedBackend::hold_generations`].
pub struct GenerationGate {
    gate: Gate,
}

impl GenerationGate {
    /// Releases every held generation, current and future.
    pub fn release(&self) {
        self.gate.released.store(true, Ordering::SeqCst);
        self.gate.notify.notify_waiters();
    }
}

/// A scriptable loader/engine/session triple sharing one state block.
///
/// Clones share the same script state, so a test can keep one handle for
/// assertions while handing another to the [`SessionManager`](crate::SessionManager).
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<ScriptState>,
}

impl ScriptedBackend {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply; each generation pops the next queued reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        locked(&self.state.replies).push_back(reply.into());
    }

    /// Makes the next engine load fail with the given raw diagnostic.
    pub fn fail_next_load(&self, message: impl Into<String>) {
        *locked(&self.state.load_failure) = Some(message.into());
    }

    /// Makes the next session close fail with a non-busy error.
    pub fn fail_next_close(&self, message: impl Into<String>) {
        *locked(&self.state.close_failure) = Some(message.into());
    }

    /// Makes the next generation fail mid-stream.
    pub fn fail_next_generation(&self, message: impl Into<String>) {
        *locked(&self.state.generation_failure) = Some(message.into());
    }

    /// Makes the next `n` session closes report busy even while idle.
    pub fn busy_for_next_closes(&self, n: usize) {
        self.state.busy_closes.store(n, Ordering::SeqCst);
    }

    /// Holds all generations open until the returned gate is released.
    ///
    /// While held, the owning session reports `is_generating() == true` and
    /// rejects `close()` with busy.
    #[must_use]
    pub fn hold_generations(&self) -> GenerationGate {
        let gate = Gate::default();
        *locked(&self.state.gate) = Some(gate.clone());
        GenerationGate { gate }
    }

    /// Returns the chunks pushed to each session, in open order.
    #[must_use]
    pub fn chunk_log(&self) -> Vec<Vec<String>> {
        locked(&self.state.chunk_log).clone()
    }

    /// Number of sessions opened so far.
    #[must_use]
    pub fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    /// Number of sessions closed successfully so far.
    #[must_use]
    pub fn sessions_closed(&self) -> usize {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineLoader for ScriptedBackend {
    async fn load(&self, _model_path: &Path) -> Result<Box<dyn InferenceEngine>> {
        if let Some(message) = locked(&self.state.load_failure).take() {
            return Err(SessionError::initialization(message));
        }
        Ok(Box::new(ScriptedEngine {
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedEngine {
    state: Arc<ScriptState>,
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    async fn open_session(&self, _sampling: &SamplingConfig) -> Result<Box<dyn InferenceSession>> {
        let index = {
            let mut log = locked(&self.state.chunk_log);
            log.push(Vec::new());
            log.len() - 1
        };
        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            state: Arc::clone(&self.state),
            index,
            generating: Arc::new(AtomicBool::new(false)),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct ScriptedSession {
    state: Arc<ScriptState>,
    index: usize,
    generating: Arc<AtomicBool>,
}

#[async_trait]
impl InferenceSession for ScriptedSession {
    fn push_chunk(&mut self, text: &str) -> Result<()> {
        locked(&self.state.chunk_log)[self.index].push(text.to_string());
        Ok(())
    }

    fn begin_generation(&mut self, cancel: CancellationToken) -> Result<FragmentReceiver> {
        let reply = locked(&self.state.replies).pop_front().unwrap_or_default();
        let failure = locked(&self.state.generation_failure).take();
        let gate = locked(&self.state.gate).clone();

        self.generating.store(true, Ordering::SeqCst);
        let generating = Arc::clone(&self.generating);
        let (tx, rx) = fragment_channel();

        tokio::spawn(async move {
            if let Some(gate) = gate {
                gate.wait(&cancel).await;
            }
            if cancel.is_cancelled() {
                tx.finish();
            } else if let Some(message) = failure {
                tx.fail(SessionError::generation(message));
            } else {
                for piece in split_fragments(&reply) {
                    if !tx.send_text(piece) {
                        break;
                    }
                }
                tx.finish();
            }
            generating.store(false, Ordering::SeqCst);
        });

        Ok(rx)
    }

    fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<()> {
        if self.generating.load(Ordering::SeqCst) {
            return Err(SessionError::Busy);
        }
        let still_busy = self
            .state
            .busy_closes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if still_busy {
            return Err(SessionError::Busy);
        }
        if let Some(message) = locked(&self.state.close_failure).take() {
            return Err(SessionError::internal(message));
        }
        self.state.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Splits a reply into a couple of fragments so ordering is exercised.
fn split_fragments(reply: &str) -> Vec<String> {
    if reply.is_empty() {
        return Vec::new();
    }
    if reply.len() <= 8 {
        return vec![reply.to_string()];
    }
    let mut mid = reply.len() / 2;
    while !reply.is_char_boundary(mid) {
        mid += 1;
    }
    vec![reply[..mid].to_string(), reply[mid..].to_string()]
}
