pub mod chunker;
pub mod normalize;
pub mod numbers;
pub mod tokenizer;

pub use chunker::{TextChunk, chunk_text, split_sentences};
pub use normalize::normalize;
#[cfg(feature = "sentencepiece")]
pub use tokenizer::SentencePieceTokenizer;
pub use tokenizer::{Tokenizer, WordTokenizer};

use crate::error::{Result, SynthesisError};

/// Normalize and chunk an utterance in one go.
///
/// Fails with `EmptyInput` when normalization leaves nothing to say.
pub fn prepare_chunks(
    text: &str,
    tokenizer: &dyn Tokenizer,
    budget: usize,
) -> Result<Vec<TextChunk>> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return Err(SynthesisError::EmptyInput);
    }
    let chunks = chunk_text(&normalized, tokenizer, budget)?;
    if chunks.is_empty() {
        return Err(SynthesisError::EmptyInput);
    }
    Ok(chunks)
}
