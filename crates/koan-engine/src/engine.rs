//! The candle-backed engine, worker thread, and session types.
//!
//! Weight loading and the decode loop are blocking work, so they run on a
//! dedicated worker thread owned by the engine; commands and streamed
//! fragments cross the boundary over channels. Sessions are lightweight
//! handles that accumulate the conversation and ship the rendered
//! transcript to the worker per generation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver as CommandReceiver, Sender as CommandSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use koan_session::{
    fragment_channel, EngineLoader, FragmentReceiver, FragmentSender, InferenceEngine,
    InferenceSession, SamplingConfig, SessionError,
};
use tokenizers::Tokenizer;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::template::{self, ModelFamily, Turn};
use crate::weights::RuntimeWeights;

/// Fixed sampler seed so runs are reproducible for a given model and
/// transcript.
const SAMPLER_SEED: u64 = 299_792_458;

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the worker thread owns.
struct LoadedModel {
    weights: RuntimeWeights,
    tokenizer: Tokenizer,
    device: Device,
    family: ModelFamily,
    model_path: PathBuf,
    eos_token_id: u32,
    eot_token_id: u32,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("family", &self.family)
            .field("model_path", &self.model_path)
            .field("eos_token_id", &self.eos_token_id)
            .field("eot_token_id", &self.eot_token_id)
            .finish_non_exhaustive()
    }
}

impl LoadedModel {
    fn load(model_path: &Path) -> Result<Self, EngineError> {
        let device = Device::Cpu;
        let family = ModelFamily::infer(model_path);
        info!(model_path = %model_path.display(), ?family, "loading GGUF weights");

        let weights = RuntimeWeights::load_from_gguf(model_path, family, &device)?;

        let tokenizer_path =
            template::resolve_tokenizer_path(model_path).ok_or(EngineError::TokenizerMissing)?;
        debug!(tokenizer_path = %tokenizer_path.display(), "loading tokenizer");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| EngineError::TokenizerLoad(e.to_string()))?;

        let (eos_token_id, eot_token_id) = template::resolve_special_tokens(&tokenizer, family)?;
        info!(eos_token_id, eot_token_id, "engine ready");

        Ok(Self {
            weights,
            tokenizer,
            device,
            family,
            model_path: model_path.to_path_buf(),
            eos_token_id,
            eot_token_id,
        })
    }
}

enum WorkerCommand {
    Generate {
        transcript: String,
        sampling: SamplingConfig,
        tx: FragmentSender,
        cancel: CancellationToken,
        generating: Arc<AtomicBool>,
        reply_slot: Arc<Mutex<Option<String>>>,
    },
    Shutdown,
}

fn worker_main(mut model: LoadedModel, commands: CommandReceiver<WorkerCommand>) {
    loop {
        match commands.recv() {
            Ok(WorkerCommand::Generate {
                transcript,
                sampling,
                tx,
                cancel,
                generating,
                reply_slot,
            }) => {
                match run_generation(&mut model, &transcript, &sampling, &tx, &cancel) {
                    Ok(reply) => {
                        *locked(&reply_slot) = Some(reply);
                        tx.finish();
                    }
                    Err(error) => {
                        warn!(error = %error, "generation failed in engine worker");
                        tx.fail(error.into());
                    }
                }
                generating.store(false, Ordering::SeqCst);
            }
            Ok(WorkerCommand::Shutdown) | Err(_) => {
                debug!("engine worker exiting");
                break;
            }
        }
    }
}

/// Runs one generation to completion, streaming decoded pieces as they
/// are sampled. Returns the full reply text for the session history.
fn run_generation(
    model: &mut LoadedModel,
    transcript: &str,
    sampling: &SamplingConfig,
    tx: &FragmentSender,
    cancel: &CancellationToken,
) -> Result<String, EngineError> {
    // Qwen weights carry a KV cache that cannot be cloned; reload from
    // disk for a clean cache instead.
    let mut weights = match model.weights.duplicate_if_supported() {
        Some(weights) => weights,
        None => {
            debug!("weights not cloneable; reloading for a fresh cache");
            RuntimeWeights::load_from_gguf(&model.model_path, model.family, &model.device)?
        }
    };

    let encoding = model
        .tokenizer
        .encode(transcript, true)
        .map_err(|e| EngineError::Tokenize(e.to_string()))?;
    let prompt_tokens = encoding.get_ids().to_vec();
    if prompt_tokens.is_empty() {
        return Err(EngineError::Tokenize("prompt tokenized to nothing".to_string()));
    }

    let mut processor = logits_processor(sampling);
    let mut index_pos = 0;
    let mut last_logits = None;
    for &token in &prompt_tokens {
        if cancel.is_cancelled() {
            debug!("generation cancelled during prompt processing");
            return Ok(String::new());
        }
        let input = single_token_tensor(token, &model.device)?;
        last_logits = Some(weights.forward(&input, index_pos)?);
        index_pos += 1;
    }
    let logits =
        last_logits.ok_or_else(|| EngineError::Decode("no prompt logits produced".to_string()))?;
    let mut next_token = sample(&mut processor, &logits)?;

    let mut reply = String::new();
    let mut generated = 0usize;
    loop {
        if cancel.is_cancelled() {
            debug!(generated, "generation cancelled");
            break;
        }
        if next_token == model.eos_token_id || next_token == model.eot_token_id {
            break;
        }

        if let Ok(piece) = model.tokenizer.decode(&[next_token], true) {
            if template::is_stop_text(model.family, &piece) {
                break;
            }
            if !piece.is_empty() {
                reply.push_str(&piece);
                if !tx.send_text(piece) {
                    debug!("receiver dropped; stopping generation");
                    break;
                }
            }
        }

        generated += 1;
        if generated >= sampling.max_tokens as usize {
            debug!(generated, "token budget reached");
            break;
        }

        let input = single_token_tensor(next_token, &model.device)?;
        let logits = weights.forward(&input, index_pos)?;
        index_pos += 1;
        next_token = sample(&mut processor, &logits)?;
    }

    Ok(reply)
}

fn single_token_tensor(token: u32, device: &Device) -> Result<Tensor, EngineError> {
    Tensor::new(&[token], device)
        .and_then(|t| t.unsqueeze(0))
        .map_err(|e| EngineError::Decode(e.to_string()))
}

fn sample(processor: &mut LogitsProcessor, logits: &Tensor) -> Result<u32, EngineError> {
    let logits = logits
        .squeeze(0)
        .and_then(|l| l.squeeze(0))
        .and_then(|l| l.to_dtype(DType::F32))
        .map_err(|e| EngineError::Decode(e.to_string()))?;
    processor
        .sample(&logits)
        .map_err(|e| EngineError::Decode(e.to_string()))
}

/// Builds the sampler chain for the session's sampling parameters:
/// top-k then top-p at the given temperature, argmax at temperature 0.
fn logits_processor(sampling: &SamplingConfig) -> LogitsProcessor {
    let temperature = f64::from(sampling.temperature);
    let mode = if temperature <= 0.0 {
        Sampling::ArgMax
    } else {
        Sampling::TopKThenTopP {
            k: sampling.top_k as usize,
            p: f64::from(sampling.top_p),
            temperature,
        }
    };
    LogitsProcessor::from_sampling(SAMPLER_SEED, mode)
}

/// Loads GGUF models and hands out worker-backed engines.
#[derive(Debug, Clone, Copy, Default)]
pub struct GgufEngineLoader;

impl GgufEngineLoader {
    /// Creates a loader.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EngineLoader for GgufEngineLoader {
    async fn load(&self, model_path: &Path) -> Result<Box<dyn InferenceEngine>, SessionError> {
        let path = model_path.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || LoadedModel::load(&path))
            .await
            .map_err(|e| SessionError::internal(format!("loader task failed: {e}")))?
            .map_err(SessionError::from)?;

        let family = loaded.family;
        let (commands, command_rx) = std::sync::mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("koan-engine".to_string())
            .spawn(move || worker_main(loaded, command_rx))
            .map_err(|e| SessionError::internal(format!("failed to spawn engine worker: {e}")))?;

        Ok(Box::new(CandleEngine {
            commands,
            worker: Some(worker),
            family,
        }))
    }
}

/// A loaded model with its worker thread.
pub struct CandleEngine {
    commands: CommandSender<WorkerCommand>,
    worker: Option<JoinHandle<()>>,
    family: ModelFamily,
}

#[async_trait]
impl InferenceEngine for CandleEngine {
    async fn open_session(&self, sampling: &SamplingConfig) -> Result<Box<dyn InferenceSession>, SessionError> {
        sampling.validate()?;
        Ok(Box::new(CandleSession {
            commands: self.commands.clone(),
            family: self.family,
            sampling: *sampling,
            turns: Vec::new(),
            pending_reply: Arc::new(Mutex::new(None)),
            generating: Arc::new(AtomicBool::new(false)),
        }))
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.worker.take() {
            tokio::task::spawn_blocking(move || handle.join())
                .await
                .map_err(|e| SessionError::internal(format!("worker join task failed: {e}")))?
                .map_err(|_| SessionError::internal("engine worker panicked"))?;
        }
        Ok(())
    }
}

/// A conversational context handle backed by the engine worker.
pub struct CandleSession {
    commands: CommandSender<WorkerCommand>,
    family: ModelFamily,
    sampling: SamplingConfig,
    turns: Vec<Turn>,
    pending_reply: Arc<Mutex<Option<String>>>,
    generating: Arc<AtomicBool>,
}

impl CandleSession {
    /// Folds the last completed reply into the transcript, so consecutive
    /// generations see the conversation so far.
    fn absorb_pending_reply(&mut self) {
        if let Some(reply) = locked(&self.pending_reply).take() {
            if !reply.is_empty() {
                self.turns.push(Turn::Reply(reply));
            }
        }
    }
}

#[async_trait]
impl InferenceSession for CandleSession {
    fn push_chunk(&mut self, text: &str) -> Result<(), SessionError> {
        if self.generating.load(Ordering::SeqCst) {
            return Err(SessionError::RequestInFlight);
        }
        self.absorb_pending_reply();
        self.turns.push(Turn::Chunk(text.to_string()));
        Ok(())
    }

    fn begin_generation(&mut self, cancel: CancellationToken) -> Result<FragmentReceiver, SessionError> {
        if self.generating.swap(true, Ordering::SeqCst) {
            return Err(SessionError::RequestInFlight);
        }
        self.absorb_pending_reply();

        let transcript = template::render_transcript(self.family, &self.turns);
        let (tx, rx) = fragment_channel();
        let command = WorkerCommand::Generate {
            transcript,
            sampling: self.sampling,
            tx,
            cancel,
            generating: Arc::clone(&self.generating),
            reply_slot: Arc::clone(&self.pending_reply),
        };
        if self.commands.send(command).is_err() {
            self.generating.store(false, Ordering::SeqCst);
            return Err(SessionError::internal("engine worker is gone"));
        }
        Ok(rx)
    }

    fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.generating.load(Ordering::SeqCst) {
            return Err(SessionError::Busy);
        }
        self.turns.clear();
        Ok(())
    }
}
