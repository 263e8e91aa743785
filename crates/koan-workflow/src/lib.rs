//! Koan Tutoring Workflow
//!
//! The per-question state machine at the heart of the tutor: it feeds code
//! drafts to the judge, tracks AI-assist affordances (one hint per
//! question, fix offers on failure, explanations on errors), serializes
//! access to the shared model session, and cleans raw model output back
//! into runnable source text.

pub mod augment;
pub mod config;
pub mod error;
pub mod judge;
pub mod question;
pub mod sanitize;
pub mod workflow;

pub use config::KoanConfig;
pub use error::{Result, WorkflowError};
pub use judge::{Judge, JudgeError, Verdict};
pub use question::{Question, QuestionSet};
pub use sanitize::sanitize;
pub use workflow::{
    AssistPurpose, GenerationRequest, Notice, Phase, TutorWorkflow, WorkflowOptions,
    WorkflowSnapshot,
};
