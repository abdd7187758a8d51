use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::LlamaError;
use crate::token::Token;

/// A loaded model's vocabulary and metadata. Binding to a real GGUF file is
/// an out-of-scope FFI concern; this crate only needs tokenize/detokenize
/// and the handful of special tokens the sampler and decode loop consult.
pub trait Model: Send + Sync {
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>, LlamaError>;
    fn token_to_piece(&self, token: Token) -> Result<String, LlamaError>;
    fn n_vocab(&self) -> usize;
    fn n_ctx_train(&self) -> usize;
    fn bos_token(&self) -> Token;
    fn eos_token(&self) -> Token;
    fn is_eog(&self, token: Token) -> bool {
        token == self.eos_token()
    }
}

/// A whitespace-tokenizing test double: builds its vocabulary lazily from
/// whatever text it is asked to tokenize. Deterministic and dependency-free,
/// standing in for a real GGUF-backed vocabulary in tests and the demo
/// entrypoint.
pub struct InMemoryModel {
    n_ctx_train: usize,
    bos: Token,
    eos: Token,
    vocab: RwLock<Vocab>,
}

struct Vocab {
    word_to_id: HashMap<String, Token>,
    id_to_word: Vec<String>,
}

impl InMemoryModel {
    pub fn new(n_ctx_train: usize) -> Self {
        let mut id_to_word = vec!["<bos>".to_string(), "<eos>".to_string()];
        let mut word_to_id = HashMap::new();
        word_to_id.insert("<bos>".to_string(), 0);
        word_to_id.insert("<eos>".to_string(), 1);
        id_to_word.reserve(256);
        Self {
            n_ctx_train,
            bos: 0,
            eos: 1,
            vocab: RwLock::new(Vocab {
                word_to_id,
                id_to_word,
            }),
        }
    }

    fn intern(&self, word: &str) -> Token {
        if let Some(&id) = self.vocab.read().unwrap().word_to_id.get(word) {
            return id;
        }
        let mut vocab = self.vocab.write().unwrap();
        if let Some(&id) = vocab.word_to_id.get(word) {
            return id;
        }
        let id = vocab.id_to_word.len() as Token;
        vocab.id_to_word.push(word.to_string());
        vocab.word_to_id.insert(word.to_string(), id);
        id
    }
}

impl Default for InMemoryModel {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl Model for InMemoryModel {
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<Token>, LlamaError> {
        let mut out = Vec::new();
        if add_bos {
            out.push(self.bos);
        }
        out.extend(text.split_whitespace().map(|w| self.intern(w)));
        Ok(out)
    }

    fn token_to_piece(&self, token: Token) -> Result<String, LlamaError> {
        let vocab = self.vocab.read().unwrap();
        vocab
            .id_to_word
            .get(token as usize)
            .cloned()
            .ok_or_else(|| LlamaError::DecodeFailed(format!("unknown token {token}")))
    }

    fn n_vocab(&self) -> usize {
        self.vocab.read().unwrap().id_to_word.len().max(32_000)
    }

    fn n_ctx_train(&self) -> usize {
        self.n_ctx_train
    }

    fn bos_token(&self) -> Token {
        self.bos
    }

    fn eos_token(&self) -> Token {
        self.eos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_vocab() {
        let model = InMemoryModel::default();
        let tokens = model.tokenize("hello world", true).unwrap();
        assert_eq!(tokens[0], model.bos_token());
        let pieces: Vec<_> = tokens[1..]
            .iter()
            .map(|&t| model.token_to_piece(t).unwrap())
            .collect();
        assert_eq!(pieces, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn repeated_words_reuse_the_same_id() {
        let model = InMemoryModel::default();
        let tokens = model.tokenize("a b a", false).unwrap();
        assert_eq!(tokens[0], tokens[2]);
        assert_ne!(tokens[0], tokens[1]);
    }
}
