use std::sync::Arc;

use crate::batch::Batch;
use crate::error::LlamaError;
use crate::model::Model;
use crate::token::Token;

/// Parameters for creating an inference context.
#[derive(Clone)]
pub struct ContextParams {
    /// Context window size.
    pub n_ctx: usize,
    /// Maximum batch size for decoding.
    pub n_batch: usize,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 4096,
            n_batch: 512,
        }
    }
}

/// Holds the KV-cache position cursor and the logits produced by the most
/// recent decode call. One `Context` is pinned to exactly one session's
/// worth of generation state; it is never shared across sequences.
pub struct Context {
    model: Arc<dyn Model>,
    params: ContextParams,
    n_past: usize,
    last_logits: Vec<f32>,
}

impl Context {
    pub fn new(model: Arc<dyn Model>, params: ContextParams) -> Self {
        Self {
            model,
            params,
            n_past: 0,
            last_logits: Vec::new(),
        }
    }

    pub fn n_ctx(&self) -> usize {
        self.params.n_ctx
    }

    pub fn n_past(&self) -> usize {
        self.n_past
    }

    /// Decode `batch`, advancing the position cursor and producing logits
    /// for the last token in the batch flagged for logit output.
    pub fn decode(&mut self, batch: &Batch) -> Result<(), LlamaError> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.n_past + batch.n_tokens() > self.params.n_ctx {
            return Err(LlamaError::ContextExhausted {
                n_ctx: self.params.n_ctx,
            });
        }

        let last_flagged = batch.logit_indices().last();
        if let Some(idx) = last_flagged {
            let conditioning = batch.tokens()[idx];
            let position = batch.positions()[idx] as usize;
            self.last_logits = pseudo_logits(self.model.n_vocab(), conditioning, position);
        }

        self.n_past += batch.n_tokens();
        Ok(())
    }

    pub fn logits(&self) -> &[f32] {
        &self.last_logits
    }

    pub fn reset(&mut self) {
        self.n_past = 0;
        self.last_logits.clear();
    }
}

/// Deterministic stand-in for a real forward pass: every vocabulary id gets
/// a reproducible score derived from the conditioning token and position, so
/// the same prompt always samples the same continuation under a fixed seed.
fn pseudo_logits(n_vocab: usize, conditioning_token: Token, position: usize) -> Vec<f32> {
    (0..n_vocab)
        .map(|id| {
            let h = splitmix(conditioning_token as u64, position as u64, id as u64);
            (h % 10_000) as f32 / 10_000.0 - 0.5
        })
        .collect()
}

fn splitmix(a: u64, b: u64, c: u64) -> u64 {
    let mut x = a
        .wrapping_mul(0x9E3779B97F4A7C15)
        .wrapping_add(b.wrapping_mul(0xBF58476D1CE4E5B9))
        .wrapping_add(c.wrapping_mul(0x94D049BB133111EB));
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58476D1CE4E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}
