//! Model instance lifecycle management.
//!
//! One [`SessionManager`] owns the Engine/Session pair shared by every
//! caller — tutoring workflow and chat alike. It is an explicit handle,
//! constructed once and injected into consumers; access is serialized
//! through an owned async mutex rather than ambient global state.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --initialize ok--> Ready --reset--> Ready (fresh session)
//!                                    |
//!                                 clean_up
//!                                    v
//!                                 Closed (terminal)
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{EngineLoader, InferenceEngine, InferenceSession};
use crate::config::SamplingConfig;
use crate::error::{Result, SessionError};
use crate::stream::GenerationStream;

/// Persona preamble injected once per session, before the first
/// user-content chunk, so it steers reply style without being repeated.
pub const PERSONA_PREAMBLE: &str = "\
You are a patient, encouraging programming tutor working one-on-one with a beginner.

Session guidelines:
- Keep replies short and concrete; prefer a small piece of code over a long explanation.
- When asked for corrected code, reply with only the code and no commentary.
- When asked for a hint, point at the concept or line that needs attention without giving away the full solution.
- When explaining an error, name it, say what caused it, and suggest the smallest change that fixes it.
";

/// Maximum close attempts before a reset is abandoned.
const RESET_MAX_ATTEMPTS: u32 = 5;

/// Fixed delay between reset attempts while the session is busy.
const RESET_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Observable lifecycle state of the managed model instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// No engine has been loaded yet.
    Uninitialized,
    /// An engine load is in progress.
    Initializing,
    /// Engine and session are live.
    Ready,
    /// The last initialize or reset failed terminally.
    Failed(String),
    /// The instance has been cleaned up. Terminal.
    Closed,
}

impl Readiness {
    /// Returns `true` if generations can be issued.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// The live Engine/Session aggregate.
struct Instance {
    engine: Box<dyn InferenceEngine>,
    session: Box<dyn InferenceSession>,
    preamble_injected: bool,
    in_flight: Arc<AtomicBool>,
    tainted: Arc<AtomicBool>,
}

/// Owns the shared model instance and serializes all access to it.
pub struct SessionManager {
    loader: Box<dyn EngineLoader>,
    inner: Mutex<Option<Instance>>,
    closed: AtomicBool,
    readiness: watch::Sender<Readiness>,
}

impl SessionManager {
    /// Creates a manager in the `Uninitialized` state.
    #[must_use]
    pub fn new(loader: Box<dyn EngineLoader>) -> Self {
        let (readiness, _) = watch::channel(Readiness::Uninitialized);
        Self {
            loader,
            inner: Mutex::new(None),
            closed: AtomicBool::new(false),
            readiness,
        }
    }

    /// Loads the engine and opens a default session.
    ///
    /// Calling `initialize` on an instance that is already ready is a
    /// no-op, so callers may race to initialize without double-loading.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` after `clean_up`,
    /// `SessionError::InvalidSampling` for out-of-range parameters, and
    /// `SessionError::Initialization` (with a cleaned diagnostic) when the
    /// backend fails to load.
    pub async fn initialize(&self, model_path: &Path, sampling: SamplingConfig) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        sampling.validate()?;

        let mut inner = self.inner.lock().await;
        if inner.is_some() {
            debug!("model instance already initialized; reusing");
            return Ok(());
        }

        self.readiness.send_replace(Readiness::Initializing);
        info!(model_path = %model_path.display(), "loading model engine");

        let engine = match self.loader.load(model_path).await {
            Ok(engine) => engine,
            Err(error) => {
                self.readiness
                    .send_replace(Readiness::Failed(error.to_string()));
                return Err(error);
            }
        };

        let session = match engine.open_session(&sampling).await {
            Ok(session) => session,
            Err(error) => {
                let mut engine = engine;
                if let Err(close_error) = engine.close().await {
                    warn!(error = %close_error, "failed to release engine after session open failure");
                }
                self.readiness
                    .send_replace(Readiness::Failed(error.to_string()));
                return Err(error);
            }
        };

        *inner = Some(Instance {
            engine,
            session,
            preamble_injected: false,
            in_flight: Arc::new(AtomicBool::new(false)),
            tainted: Arc::new(AtomicBool::new(false)),
        });
        self.readiness.send_replace(Readiness::Ready);
        info!("model instance ready");
        Ok(())
    }

    /// Starts a generation against the shared session.
    ///
    /// On the first generation of a session's lifetime the persona preamble
    /// is appended as its own chunk before the prompt; the prompt is always
    /// appended as a separate chunk.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::RequestInFlight` while another generation is
    /// running, and `SessionError::Tainted` after a cancelled generation
    /// until the session is reset.
    pub async fn generate(&self, prompt: &str) -> Result<GenerationStream> {
        let mut inner = self.inner.lock().await;
        let instance = match inner.as_mut() {
            Some(instance) => instance,
            None if self.closed.load(Ordering::SeqCst) => return Err(SessionError::Closed),
            None => return Err(SessionError::NotReady),
        };

        if instance.tainted.load(Ordering::SeqCst) {
            return Err(SessionError::Tainted);
        }
        if instance.in_flight.swap(true, Ordering::SeqCst) {
            return Err(SessionError::RequestInFlight);
        }

        if let Err(error) = push_prompt(instance, prompt) {
            instance.in_flight.store(false, Ordering::SeqCst);
            return Err(error);
        }

        let cancel = CancellationToken::new();
        let backend_rx = match instance.session.begin_generation(cancel.clone()) {
            Ok(rx) => rx,
            Err(error) => {
                instance.in_flight.store(false, Ordering::SeqCst);
                return Err(error);
            }
        };

        // Forward fragments to the caller and release the in-flight guard
        // when the backend terminates, even if the caller drops its stream.
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let in_flight = Arc::clone(&instance.in_flight);
        let tainted = Arc::clone(&instance.tainted);
        let cancel_observer = cancel.clone();
        tokio::spawn(async move {
            let mut backend_rx = backend_rx;
            loop {
                match backend_rx.recv().await {
                    Some(item) => {
                        let is_terminal = match &item {
                            Ok(fragment) => fragment.is_final,
                            Err(_) => true,
                        };
                        if is_terminal {
                            if cancel_observer.is_cancelled() {
                                tainted.store(true, Ordering::SeqCst);
                            }
                            in_flight.store(false, Ordering::SeqCst);
                        }
                        let _ = out_tx.send(item);
                        if is_terminal {
                            break;
                        }
                    }
                    None => {
                        if cancel_observer.is_cancelled() {
                            tainted.store(true, Ordering::SeqCst);
                        }
                        in_flight.store(false, Ordering::SeqCst);
                        let _ = out_tx.send(Err(SessionError::generation(
                            "stream closed without a final fragment",
                        )));
                        break;
                    }
                }
            }
        });

        Ok(GenerationStream::new(out_rx, cancel))
    }

    /// Discards the conversational context and opens a fresh session with
    /// default sampling parameters, reusing the loaded engine.
    ///
    /// The backend rejects closing while a generation is in flight; busy
    /// responses are retried up to 5 times at 200 ms spacing. If the
    /// session is still busy after the last attempt the reset is abandoned:
    /// the call logs, returns `Ok`, and the caller keeps the stale session
    /// with its accumulated context.
    ///
    /// # Errors
    ///
    /// Any non-busy close failure is terminal for the instance and is
    /// propagated without retry.
    pub async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.is_none() {
            return if self.closed.load(Ordering::SeqCst) {
                Err(SessionError::Closed)
            } else {
                Err(SessionError::NotReady)
            };
        }

        for attempt in 1..=RESET_MAX_ATTEMPTS {
            let Some(instance) = inner.as_mut() else {
                return Err(SessionError::NotReady);
            };
            match instance.session.close().await {
                Ok(()) => {
                    let fresh = instance
                        .engine
                        .open_session(&SamplingConfig::default())
                        .await;
                    match fresh {
                        Ok(session) => {
                            instance.session = session;
                            instance.preamble_injected = false;
                            instance.tainted.store(false, Ordering::SeqCst);
                            instance.in_flight.store(false, Ordering::SeqCst);
                            debug!(attempt, "session reset complete");
                            return Ok(());
                        }
                        Err(error) => {
                            *inner = None;
                            self.readiness
                                .send_replace(Readiness::Failed(error.to_string()));
                            return Err(error);
                        }
                    }
                }
                Err(SessionError::Busy) => {
                    warn!(attempt, "session busy during reset; generation still in flight");
                    tokio::time::sleep(RESET_RETRY_DELAY).await;
                }
                Err(error) => {
                    *inner = None;
                    self.readiness
                        .send_replace(Readiness::Failed(error.to_string()));
                    return Err(error);
                }
            }
        }

        warn!(
            attempts = RESET_MAX_ATTEMPTS,
            "abandoning session reset; stale conversation context retained"
        );
        Ok(())
    }

    /// Releases the session, then the engine, and invalidates the handle.
    ///
    /// Release failures are logged and swallowed; the instance is closed
    /// unconditionally. Safe to call more than once.
    pub async fn clean_up(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(mut instance) = inner.take() {
            if let Err(error) = instance.session.close().await {
                warn!(error = %error, "failed to close session during cleanup");
            }
            if let Err(error) = instance.engine.close().await {
                warn!(error = %error, "failed to close engine during cleanup");
            }
        }
        self.closed.store(true, Ordering::SeqCst);
        self.readiness.send_replace(Readiness::Closed);
        info!("model instance closed");
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn readiness(&self) -> Readiness {
        self.readiness.borrow().clone()
    }

    /// Waits until the instance is ready, with an explicit timeout and a
    /// cancellation token.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ReadyTimeout` when `timeout` elapses,
    /// `SessionError::WaitCancelled` when `cancel` fires,
    /// `SessionError::Initialization` when initialization failed, and
    /// `SessionError::Closed` when the instance was cleaned up.
    pub async fn wait_ready(&self, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        let mut rx = self.readiness.subscribe();
        let wait = async move {
            loop {
                let current = rx.borrow_and_update().clone();
                match current {
                    Readiness::Ready => return Ok(()),
                    Readiness::Failed(message) => return Err(SessionError::initialization(message)),
                    Readiness::Closed => return Err(SessionError::Closed),
                    Readiness::Uninitialized | Readiness::Initializing => {}
                }
                if rx.changed().await.is_err() {
                    return Err(SessionError::Closed);
                }
            }
        };

        tokio::select! {
            result = wait => result,
            () = cancel.cancelled() => Err(SessionError::WaitCancelled),
            () = tokio::time::sleep(timeout) => Err(SessionError::ReadyTimeout { waited: timeout }),
        }
    }
}

/// Appends the preamble (first call of the session only) and the prompt,
/// each as its own chunk.
fn push_prompt(instance: &mut Instance, prompt: &str) -> Result<()> {
    if !instance.preamble_injected {
        instance.session.push_chunk(PERSONA_PREAMBLE)?;
        instance.preamble_injected = true;
    }
    instance.session.push_chunk(prompt)
}
