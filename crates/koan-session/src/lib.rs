//! Koan Session Management
//!
//! Owns the generative model instance shared by every caller: loading the
//! engine, opening and recycling conversational sessions, streaming
//! generations, and tearing everything down. The inference library itself
//! sits behind the [`backend`] traits; see the `koan-engine` crate for the
//! production implementation and [`testing`] for the scripted double used
//! in tests.

pub mod backend;
pub mod config;
pub mod error;
pub mod manager;
pub mod stream;
pub mod testing;

pub use backend::{EngineLoader, InferenceEngine, InferenceSession};
pub use config::SamplingConfig;
pub use error::{clean_diagnostic, Result, SessionError, TRACE_MARKER};
pub use manager::{Readiness, SessionManager, PERSONA_PREAMBLE};
pub use stream::{
    fragment_channel, FragmentReceiver, FragmentResult, FragmentSender, GenerationStream,
    StreamFragment,
};
