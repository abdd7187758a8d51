use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;

use crate::batch::Batch;
use crate::context::{Context, ContextParams};
use crate::error::LlamaError;
use crate::model::Model;
use crate::sampler::{GenerationParams, SamplerChain};
use crate::token::{Pos, Token};

/// A flag a caller can flip to stop a generation between decode steps.
/// Checked once per generated token, not mid-decode: the in-flight batch
/// always finishes before a cancellation takes effect.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct RunnerConfig {
    pub n_batch: usize,
    pub max_concurrent_requests: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            n_batch: 512,
            max_concurrent_requests: 4,
        }
    }
}

pub struct GenerationRequest {
    pub prompt_tokens: Vec<Token>,
    pub params: GenerationParams,
    pub max_tokens: usize,
    pub stop_sequences: Vec<String>,
    /// When set, each generated token is pushed here as it is produced.
    pub stream: Option<mpsc::Sender<Token>>,
    /// Checked once per decode step; a cancelled token stops generation
    /// with `LlamaError::Cancelled` instead of a normal stop condition.
    pub cancel: Option<CancelToken>,
}

pub struct GenerationResult {
    pub tokens: Vec<Token>,
    pub prompt_tokens: usize,
}

struct Job {
    request: GenerationRequest,
    reply: oneshot::Sender<Result<GenerationResult, LlamaError>>,
}

/// A model's decode loop, pinned to one dedicated worker task and one
/// `Context` (one KV-cache) at a time. Grounded on this codebase's
/// worker-thread-driven continuous-batching engine: prefill the prompt in
/// `n_batch`-sized chunks, then decode one token per step until a stop
/// condition fires. Concurrent callers are bounded by `max_concurrent_requests`
/// and queue behind the worker rather than racing the same KV-cache.
pub struct Runner {
    tx: mpsc::Sender<Job>,
    semaphore: Arc<Semaphore>,
    _worker: JoinHandle<()>,
}

impl Runner {
    pub fn spawn(model: Arc<dyn Model>, ctx_params: ContextParams, config: RunnerConfig) -> Self {
        let queue_depth = config.max_concurrent_requests.max(1) * 4;
        let (tx, mut rx) = mpsc::channel::<Job>(queue_depth);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        let n_batch = config.n_batch.max(1);

        let worker = tokio::spawn(async move {
            let mut ctx = Context::new(model.clone(), ctx_params);
            while let Some(job) = rx.recv().await {
                let result = run_generation(&mut ctx, &model, job.request, n_batch).await;
                ctx.reset();
                let _ = job.reply.send(result);
            }
        });

        Self {
            tx,
            semaphore,
            _worker: worker,
        }
    }

    /// Enqueue one generation and await its completion. Blocks on a
    /// concurrency permit before the request reaches the worker, so a burst
    /// of callers backs up here rather than growing the worker's queue
    /// without bound.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, LlamaError> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LlamaError::WorkerGone)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Job {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| LlamaError::WorkerGone)?;
        reply_rx.await.map_err(|_| LlamaError::WorkerGone)?
    }
}

async fn run_generation(
    ctx: &mut Context,
    model: &Arc<dyn Model>,
    request: GenerationRequest,
    n_batch: usize,
) -> Result<GenerationResult, LlamaError> {
    let mut sampler = SamplerChain::new(request.params.clone()).with_model(model.clone());
    let prompt_len = request.prompt_tokens.len();

    // Phase 1: prefill the prompt, requesting logits only for its last token.
    let mut pos = 0usize;
    while pos < prompt_len {
        let end = (pos + n_batch).min(prompt_len);
        let mut batch = Batch::new(n_batch);
        for (i, &token) in request.prompt_tokens[pos..end].iter().enumerate() {
            let global_pos = pos + i;
            let want_logits = global_pos == prompt_len - 1;
            batch.add(token, global_pos as Pos, &[0], want_logits)?;
        }
        ctx.decode(&batch)?;
        pos = end;
    }

    // Phase 2: decode one token at a time until a stop condition fires.
    let mut generated = Vec::new();
    let mut next_pos = prompt_len;
    loop {
        if generated.len() >= request.max_tokens {
            break;
        }
        if let Some(cancel) = &request.cancel {
            if cancel.is_cancelled() {
                return Err(LlamaError::Cancelled);
            }
        }
        let logits = ctx.logits();
        if logits.is_empty() {
            return Err(LlamaError::DecodeFailed(
                "no logits available for sampling".to_string(),
            ));
        }
        let token = sampler.sample(logits);
        if model.is_eog(token) {
            break;
        }
        generated.push(token);
        if let Some(tx) = &request.stream {
            if tx.send(token).await.is_err() {
                break;
            }
        }
        if matches_stop(model, &generated, &request.stop_sequences) {
            break;
        }

        let mut batch = Batch::new(1);
        batch.add(token, next_pos as Pos, &[0], true)?;
        ctx.decode(&batch)?;
        next_pos += 1;
    }

    Ok(GenerationResult {
        tokens: generated,
        prompt_tokens: prompt_len,
    })
}

fn matches_stop(model: &Arc<dyn Model>, generated: &[Token], stops: &[String]) -> bool {
    if stops.is_empty() {
        return false;
    }
    let text: String = generated
        .iter()
        .filter_map(|&t| model.token_to_piece(t).ok())
        .collect::<Vec<_>>()
        .join(" ");
    stops.iter().any(|s| text.ends_with(s.as_str()))
}
