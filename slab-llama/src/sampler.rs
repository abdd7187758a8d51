use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::grammar::{Grammar, GrammarState};
use crate::model::Model;
use crate::token::Token;

/// Sampling knobs for one generation. Mirrors the recognized fields of the
/// sampling-parameters data model. `grammar` is applied as a token-level
/// logit mask once a model is attached via [`SamplerChain::with_model`].
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_k: i32,
    pub top_p: f32,
    pub min_p: f32,
    pub typical_p: f32,
    pub repeat_penalty: f32,
    pub repeat_last_n: i32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub mirostat: u8,
    pub mirostat_tau: f32,
    pub mirostat_eta: f32,
    /// -1 seeds from entropy.
    pub seed: i64,
    pub grammar: Option<Grammar>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.95,
            min_p: 0.05,
            typical_p: 1.0,
            repeat_penalty: 1.1,
            repeat_last_n: 64,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            mirostat: 0,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
            seed: -1,
            grammar: None,
        }
    }
}

/// The per-step sampling pipeline: penalties, grammar mask, temperature,
/// top-k, softmax, top-p, min-p, typical-p, then final token selection
/// (greedy, mirostat v1 or v2, or a seeded categorical draw).
pub struct SamplerChain {
    params: GenerationParams,
    rng: StdRng,
    recent: VecDeque<Token>,
    mirostat_mu: f32,
    model: Option<Arc<dyn Model>>,
    grammar_state: Option<GrammarState>,
}

const MAX_HISTORY: usize = 4096;

impl SamplerChain {
    pub fn new(params: GenerationParams) -> Self {
        let rng = if params.seed < 0 {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(params.seed as u64)
        };
        let mirostat_mu = 2.0 * params.mirostat_tau;
        let grammar_state = params.grammar.as_ref().map(Grammar::new_state);
        Self {
            params,
            rng,
            recent: VecDeque::new(),
            mirostat_mu,
            model: None,
            grammar_state,
        }
    }

    /// Attaches the model used to decode candidate tokens to text for
    /// grammar masking. Sampling works without one; grammar masking is
    /// simply skipped.
    pub fn with_model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = Some(model);
        self
    }

    /// Record that `token` was accepted, feeding the repetition-penalty and
    /// mirostat history for the next step.
    pub fn accept(&mut self, token: Token) {
        self.recent.push_back(token);
        if self.recent.len() > MAX_HISTORY {
            self.recent.pop_front();
        }
        if let (Some(state), Some(model)) = (self.grammar_state.as_mut(), &self.model) {
            if let Ok(piece) = model.token_to_piece(token) {
                state.accept(&piece);
            }
        }
    }

    pub fn reset(&mut self) {
        self.recent.clear();
        self.mirostat_mu = 2.0 * self.params.mirostat_tau;
        if let (Some(state), Some(grammar)) = (self.grammar_state.as_mut(), &self.params.grammar) {
            state.reset(grammar);
        }
    }

    /// Masks candidates whose decoded piece would break the attached
    /// grammar's parse state. No-op without both a grammar and a model.
    fn apply_grammar_mask(&self, candidates: &mut [(Token, f32)]) {
        let (Some(state), Some(model)) = (&self.grammar_state, &self.model) else {
            return;
        };
        let disallowed: Vec<bool> = candidates
            .iter()
            .map(|c| match model.token_to_piece(c.0) {
                Ok(piece) => !state.allows(&piece),
                Err(_) => true,
            })
            .collect();
        if disallowed.iter().all(|&d| d) {
            tracing::debug!("grammar mask rejected every candidate this step, leaving it unmasked");
            return;
        }
        for (c, &reject) in candidates.iter_mut().zip(disallowed.iter()) {
            if reject {
                c.1 = f32::NEG_INFINITY;
            }
        }
    }

    /// Select the next token from `logits` (one score per vocabulary id).
    pub fn sample(&mut self, logits: &[f32]) -> Token {
        let mut candidates: Vec<(Token, f32)> = logits
            .iter()
            .enumerate()
            .map(|(i, &l)| (i as Token, l))
            .collect();

        self.apply_penalties(&mut candidates);
        self.apply_grammar_mask(&mut candidates);

        if self.params.temperature <= 0.0 {
            let best = candidates
                .iter()
                .copied()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .expect("non-empty vocabulary");
            self.accept(best.0);
            return best.0;
        }

        for c in candidates.iter_mut() {
            c.1 /= self.params.temperature;
        }

        let token = match self.params.mirostat {
            1 => self.sample_mirostat_v1(&mut candidates),
            2 => self.sample_mirostat_v2(&mut candidates),
            _ => {
                sort_desc(&mut candidates);
                apply_top_k(&mut candidates, self.params.top_k);
                softmax_in_place(&mut candidates);
                apply_top_p(&mut candidates, self.params.top_p);
                apply_min_p(&mut candidates, self.params.min_p);
                apply_typical_p(&mut candidates, self.params.typical_p);
                renormalize(&mut candidates);
                sample_categorical(&mut self.rng, &candidates)
            }
        };
        self.accept(token);
        token
    }

    fn apply_penalties(&self, candidates: &mut [(Token, f32)]) {
        if self.params.repeat_last_n == 0 {
            return;
        }
        let window: Box<dyn Iterator<Item = &Token>> = if self.params.repeat_last_n < 0 {
            Box::new(self.recent.iter())
        } else {
            let n = self.params.repeat_last_n as usize;
            Box::new(self.recent.iter().rev().take(n))
        };
        let mut counts: HashMap<Token, u32> = HashMap::new();
        for &t in window {
            *counts.entry(t).or_insert(0) += 1;
        }
        if counts.is_empty() {
            return;
        }
        for c in candidates.iter_mut() {
            if let Some(&count) = counts.get(&c.0) {
                if self.params.repeat_penalty != 1.0 {
                    c.1 = if c.1 > 0.0 {
                        c.1 / self.params.repeat_penalty
                    } else {
                        c.1 * self.params.repeat_penalty
                    };
                }
                c.1 -= count as f32 * self.params.frequency_penalty + self.params.presence_penalty;
            }
        }
    }

    /// Mirostat v1 (Basu et al.): estimate the Zipf exponent from the top of
    /// the distribution, derive a cutoff `k`, then adapt `mu` from observed
    /// surprise.
    fn sample_mirostat_v1(&mut self, candidates: &mut Vec<(Token, f32)>) -> Token {
        sort_desc(candidates);
        softmax_in_place(candidates);

        let eps = 1e-9f32;
        let n = candidates.len().min(100).max(2);
        let mut sum_ti_bi = 0.0f32;
        let mut sum_ti_sq = 0.0f32;
        for i in 1..n {
            let t_i = ((i + 1) as f32 / i as f32).ln();
            let b_i = (candidates[i - 1].1.max(eps) / candidates[i].1.max(eps)).ln();
            sum_ti_bi += t_i * b_i;
            sum_ti_sq += t_i * t_i;
        }
        let s_hat = if sum_ti_sq > 0.0 {
            sum_ti_bi / sum_ti_sq
        } else {
            1.0
        };
        let epsilon_hat = (s_hat - 1.0).max(eps);
        let denom = 1.0 - (candidates.len() as f32).powf(-epsilon_hat);
        let k = if denom.abs() > eps {
            ((epsilon_hat * self.mirostat_mu) / denom).powf(1.0 / s_hat)
        } else {
            1.0
        };
        let k = (k.round() as usize).clamp(1, candidates.len());
        candidates.truncate(k);
        renormalize(candidates);

        let token = sample_categorical(&mut self.rng, candidates);
        let chosen_prob = candidates
            .iter()
            .find(|c| c.0 == token)
            .map(|c| c.1)
            .unwrap_or(eps);
        let observed_surprise = -chosen_prob.max(eps).log2();
        self.mirostat_mu -= self.params.mirostat_eta * (observed_surprise - self.params.mirostat_tau);
        token
    }

    /// Mirostat v2: keep every candidate whose surprise is at most `mu`,
    /// then adapt `mu` from the surprise of the token actually drawn.
    fn sample_mirostat_v2(&mut self, candidates: &mut Vec<(Token, f32)>) -> Token {
        sort_desc(candidates);
        softmax_in_place(candidates);

        let eps = 1e-9f32;
        candidates.retain(|c| -c.1.max(eps).log2() <= self.mirostat_mu);
        if candidates.is_empty() {
            return sample_categorical(&mut self.rng, &[(0, 1.0)]);
        }
        renormalize(candidates);

        let token = sample_categorical(&mut self.rng, candidates);
        let chosen_prob = candidates
            .iter()
            .find(|c| c.0 == token)
            .map(|c| c.1)
            .unwrap_or(eps);
        let observed_surprise = -chosen_prob.max(eps).log2();
        self.mirostat_mu -= self.params.mirostat_eta * (observed_surprise - self.params.mirostat_tau);
        token
    }
}

fn sort_desc(candidates: &mut [(Token, f32)]) {
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

fn softmax_in_place(candidates: &mut [(Token, f32)]) {
    if candidates.is_empty() {
        return;
    }
    let max = candidates.iter().map(|c| c.1).fold(f32::MIN, f32::max);
    let mut sum = 0.0f32;
    for c in candidates.iter_mut() {
        c.1 = (c.1 - max).exp();
        sum += c.1;
    }
    if sum > 0.0 {
        for c in candidates.iter_mut() {
            c.1 /= sum;
        }
    }
}

fn renormalize(candidates: &mut [(Token, f32)]) {
    let sum: f32 = candidates.iter().map(|c| c.1).sum();
    if sum > 0.0 {
        for c in candidates.iter_mut() {
            c.1 /= sum;
        }
    }
}

fn apply_top_k(candidates: &mut Vec<(Token, f32)>, k: i32) {
    if k > 0 && (k as usize) < candidates.len() {
        candidates.truncate(k as usize);
    }
}

fn apply_top_p(candidates: &mut Vec<(Token, f32)>, p: f32) {
    if p >= 1.0 || candidates.is_empty() {
        return;
    }
    let mut cumulative = 0.0f32;
    let mut cutoff = candidates.len();
    for (i, c) in candidates.iter().enumerate() {
        cumulative += c.1;
        if cumulative >= p {
            cutoff = i + 1;
            break;
        }
    }
    candidates.truncate(cutoff.max(1));
}

fn apply_min_p(candidates: &mut Vec<(Token, f32)>, p: f32) {
    if p <= 0.0 || candidates.is_empty() {
        return;
    }
    let top = candidates[0].1;
    let threshold = top * p;
    candidates.retain(|c| c.1 >= threshold);
    if candidates.is_empty() {
        candidates.push((0, top));
    }
}

fn apply_typical_p(candidates: &mut Vec<(Token, f32)>, p: f32) {
    if p >= 1.0 || candidates.is_empty() {
        return;
    }
    let eps = 1e-9f32;
    let entropy: f32 = -candidates
        .iter()
        .map(|c| c.1 * c.1.max(eps).ln())
        .sum::<f32>();
    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, (-c.1.max(eps).ln() - entropy).abs()))
        .collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut cumulative = 0.0f32;
    let mut keep = Vec::with_capacity(candidates.len());
    for (idx, _) in scored {
        keep.push(candidates[idx]);
        cumulative += candidates[idx].1;
        if cumulative >= p {
            break;
        }
    }
    *candidates = keep;
    sort_desc(candidates);
}

fn sample_categorical(rng: &mut StdRng, candidates: &[(Token, f32)]) -> Token {
    if candidates.is_empty() {
        return 0;
    }
    let r: f32 = rng.gen();
    let mut cumulative = 0.0f32;
    for c in candidates {
        cumulative += c.1;
        if r <= cumulative {
            return c.0;
        }
    }
    candidates.last().unwrap().0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_is_deterministic_and_picks_the_max() {
        let mut params = GenerationParams::default();
        params.temperature = 0.0;
        let mut chain = SamplerChain::new(params);
        let logits = vec![0.1, 0.9, 0.2, -0.5];
        assert_eq!(chain.sample(&logits), 1);
        assert_eq!(chain.sample(&logits), 1);
    }

    #[test]
    fn greedy_with_a_flat_argmax_repeats_the_winner_every_step() {
        let mut params = GenerationParams::default();
        params.temperature = 0.0;
        params.seed = 42;
        params.repeat_last_n = 0;
        let mut chain = SamplerChain::new(params);
        let mut logits = vec![0.1; 8];
        logits[7] = 0.9;
        let generated: Vec<_> = (0..8).map(|_| chain.sample(&logits)).collect();
        assert_eq!(generated, vec![7; 8]);
    }

    #[test]
    fn same_seed_is_reproducible() {
        let mut params = GenerationParams::default();
        params.seed = 7;
        let logits = vec![0.1, 0.3, 0.2, 0.05, 0.4, 0.0, 0.0, 0.0];
        let mut a = SamplerChain::new(params.clone());
        let mut b = SamplerChain::new(params);
        let seq_a: Vec<_> = (0..5).map(|_| a.sample(&logits)).collect();
        let seq_b: Vec<_> = (0..5).map(|_| b.sample(&logits)).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn repeat_penalty_discourages_the_last_token() {
        let mut params = GenerationParams::default();
        params.temperature = 0.0;
        params.repeat_penalty = 1.5;
        let mut chain = SamplerChain::new(params);
        let logits = vec![1.0, 1.0];
        let first = chain.sample(&logits);
        // after accepting `first`, its logit is penalized below the other's
        let second = chain.sample(&logits);
        assert_ne!(first, second);
    }

    #[test]
    fn mirostat_v2_stays_within_vocabulary() {
        let mut params = GenerationParams::default();
        params.mirostat = 2;
        params.seed = 1;
        let mut chain = SamplerChain::new(params);
        let logits = vec![0.1, 0.2, 0.9, 0.05, 0.3];
        for _ in 0..10 {
            let token = chain.sample(&logits);
            assert!((0..logits.len() as Token).contains(&token));
        }
    }

    #[test]
    fn json_grammar_masks_tokens_that_cannot_open_a_json_value() {
        use crate::model::InMemoryModel;

        let model: Arc<dyn Model> = Arc::new(InMemoryModel::default());
        let brace = model.tokenize("{", false).unwrap()[0];
        let close = model.tokenize("}", false).unwrap()[0];
        let word = model.tokenize("cow", false).unwrap()[0];

        let mut params = GenerationParams::default();
        params.temperature = 0.0;
        params.grammar = Some(Grammar::Json);
        let mut chain = SamplerChain::new(params).with_model(model);

        let max_id = [brace, close, word].into_iter().max().unwrap();
        let mut logits = vec![0.1f32; max_id as usize + 1];
        logits[close as usize] = 5.0;
        logits[word as usize] = 5.0;
        logits[brace as usize] = 0.2;

        assert_eq!(chain.sample(&logits), brace);
    }

    #[test]
    fn literal_grammar_masks_tokens_outside_the_allowed_set() {
        use crate::model::InMemoryModel;

        let model: Arc<dyn Model> = Arc::new(InMemoryModel::default());
        let yes = model.tokenize("yes", false).unwrap()[0];
        let no = model.tokenize("no", false).unwrap()[0];
        let maybe = model.tokenize("maybe", false).unwrap()[0];

        let mut params = GenerationParams::default();
        params.temperature = 0.0;
        params.grammar = Grammar::parse("yes|no");
        let mut chain = SamplerChain::new(params).with_model(model);

        let max_id = [yes, no, maybe].into_iter().max().unwrap();
        let mut logits = vec![0.1f32; max_id as usize + 1];
        logits[yes as usize] = 1.0;
        logits[no as usize] = 5.0;
        logits[maybe as usize] = 9.0;

        assert_eq!(chain.sample(&logits), no);
    }
}
