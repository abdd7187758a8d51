use crate::error::LlamaError;
use crate::token::{Pos, SeqId, Token};

/// A fixed-capacity buffer of tokens to decode in one step, mirroring the
/// shape of a continuous-batching decode call: each slot carries a token, its
/// position, the sequence(s) it belongs to, and whether logits should be
/// produced for it.
pub struct Batch {
    tokens: Vec<Token>,
    pos: Vec<Pos>,
    seq_ids: Vec<Vec<SeqId>>,
    logits: Vec<bool>,
    capacity: usize,
}

impl Batch {
    pub fn new(capacity: usize) -> Self {
        Self {
            tokens: Vec::with_capacity(capacity),
            pos: Vec::with_capacity(capacity),
            seq_ids: Vec::with_capacity(capacity),
            logits: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn n_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn add(
        &mut self,
        token: Token,
        pos: Pos,
        seq_ids: &[SeqId],
        logit: bool,
    ) -> Result<(), LlamaError> {
        if self.tokens.len() >= self.capacity {
            return Err(LlamaError::BatchFull);
        }
        self.tokens.push(token);
        self.pos.push(pos);
        self.seq_ids.push(seq_ids.to_vec());
        self.logits.push(logit);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.pos.clear();
        self.seq_ids.clear();
        self.logits.clear();
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn positions(&self) -> &[Pos] {
        &self.pos
    }

    /// Indices within the batch that requested logits, in order.
    pub fn logit_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.logits
            .iter()
            .enumerate()
            .filter_map(|(i, &want)| want.then_some(i))
    }
}
