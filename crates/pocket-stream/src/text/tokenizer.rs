//! Tokenizer capability used by the chunker and the text encoder

use crate::error::{Result, SynthesisError};
use std::collections::HashMap;
use std::sync::Mutex;

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, ids: &[u32]) -> Result<String>;

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(self.encode(text)?.len())
    }
}

/// Whitespace tokenizer with a vocabulary that grows on demand.
///
/// Every whitespace-separated word is one token, so decode(encode(x)) is x
/// with whitespace collapsed. Used when no SentencePiece model is available.
#[derive(Default)]
pub struct WordTokenizer {
    vocab: Mutex<Vocab>,
}

#[derive(Default)]
struct Vocab {
    ids: HashMap<String, u32>,
    words: Vec<String>,
}

impl WordTokenizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut vocab = self
            .vocab
            .lock()
            .map_err(|_| SynthesisError::Tokenizer("vocabulary lock poisoned".to_string()))?;
        Ok(text
            .split_whitespace()
            .map(|word| {
                if let Some(&id) = vocab.ids.get(word) {
                    return id;
                }
                let id = vocab.words.len() as u32;
                vocab.words.push(word.to_string());
                vocab.ids.insert(word.to_string(), id);
                id
            })
            .collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let vocab = self
            .vocab
            .lock()
            .map_err(|_| SynthesisError::Tokenizer("vocabulary lock poisoned".to_string()))?;
        let words = ids
            .iter()
            .map(|&id| {
                vocab
                    .words
                    .get(id as usize)
                    .map(String::as_str)
                    .ok_or_else(|| SynthesisError::Tokenizer(format!("unknown token id {}", id)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(words.join(" "))
    }

    fn count_tokens(&self, text: &str) -> Result<usize> {
        Ok(text.split_whitespace().count())
    }
}

#[cfg(feature = "sentencepiece")]
pub use self::sp::SentencePieceTokenizer;

#[cfg(feature = "sentencepiece")]
mod sp {
    use super::Tokenizer;
    use crate::error::{Result, SynthesisError};
    use sentencepiece::SentencePieceProcessor;
    use std::path::Path;

    /// SentencePiece model as shipped with the exported text conditioner
    pub struct SentencePieceTokenizer {
        sp: SentencePieceProcessor,
    }

    impl SentencePieceTokenizer {
        pub fn open(path: &Path) -> Result<Self> {
            let sp = SentencePieceProcessor::open(path).map_err(|e| {
                SynthesisError::Tokenizer(format!("Failed to load tokenizer: {:?}", e))
            })?;
            tracing::debug!(vocab = sp.len(), path = %path.display(), "loaded tokenizer");
            Ok(Self { sp })
        }

        pub fn vocab_size(&self) -> usize {
            self.sp.len()
        }
    }

    impl Tokenizer for SentencePieceTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            let pieces = self.sp.encode(text).map_err(|e| {
                SynthesisError::Tokenizer(format!("Failed to encode text: {:?}", e))
            })?;
            Ok(pieces.iter().map(|p| p.id).collect())
        }

        fn decode(&self, ids: &[u32]) -> Result<String> {
            self.sp.decode_piece_ids(ids).map_err(|e| {
                SynthesisError::Tokenizer(format!("Failed to decode ids: {:?}", e))
            })
        }
    }
}
