//! Inference backend contract.
//!
//! The [`SessionManager`](crate::SessionManager) is backend-agnostic: the
//! expensive parts — weight loading, tokenization, the decode loop — live
//! behind these traits so that lifecycle logic can be exercised against a
//! scripted double (see [`crate::testing`]) while production wires in a real
//! engine.

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::SamplingConfig;
use crate::error::Result;
use crate::stream::FragmentReceiver;

/// Loads engines from model files.
///
/// Loading is expensive and must run off latency-sensitive paths, hence the
/// async signature; implementations typically delegate to a blocking worker.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Loads the model at `model_path` and returns a ready engine.
    async fn load(&self, model_path: &Path) -> Result<Box<dyn InferenceEngine>>;
}

/// A loaded model capable of producing sessions.
///
/// At most one live session exists per engine at any instant; the manager
/// enforces this by closing the old session before opening a replacement.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Opens a fresh conversational session with the given sampling
    /// parameters.
    async fn open_session(&self, sampling: &SamplingConfig) -> Result<Box<dyn InferenceSession>>;

    /// Releases the engine and its weights.
    async fn close(&mut self) -> Result<()>;
}

/// A mutable conversational context bound to one engine.
///
/// Sessions accumulate ordered input chunks; they are never partially
/// mutated across a reset — the manager discards the session wholesale and
/// substitutes a fresh one.
#[async_trait]
pub trait InferenceSession: Send {
    /// Appends an input chunk to the session context.
    fn push_chunk(&mut self, text: &str) -> Result<()>;

    /// Starts generating a reply from the accumulated context.
    ///
    /// Returns immediately; fragments arrive on the receiver in order,
    /// terminated by a final element. The worker checks `cancel` between
    /// decode steps and, when cancelled, stops early but still terminates
    /// the stream.
    fn begin_generation(&mut self, cancel: CancellationToken) -> Result<FragmentReceiver>;

    /// Returns `true` while a generation is running on this session.
    fn is_generating(&self) -> bool;

    /// Closes the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Busy`](crate::SessionError::Busy) while a
    /// generation is in flight; the caller decides whether to retry.
    async fn close(&mut self) -> Result<()>;
}
