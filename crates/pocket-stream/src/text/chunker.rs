//! Sentence-bounded, token-budgeted chunking

use super::tokenizer::Tokenizer;
use crate::error::Result;
use regex::Regex;
use std::sync::LazyLock;

static SENTENCE_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]+|[^.!?]+$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub text: String,
    pub token_count: usize,
    /// Produced by slicing an over-budget sentence at token boundaries
    pub forced_split: bool,
}

/// Split text into sentences, keeping the terminator attached.
pub fn split_sentences(text: &str) -> Vec<&str> {
    SENTENCE_SPLIT_RE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Group normalized text into chunks of at most `budget` tokens.
///
/// Short sentences are merged greedily. A sentence longer than the budget is
/// emitted on its own as budget-sized token slices decoded back to text.
pub fn chunk_text(text: &str, tokenizer: &dyn Tokenizer, budget: usize) -> Result<Vec<TextChunk>> {
    let budget = budget.max(1);
    let mut chunks = Vec::new();
    let mut current: Option<(String, usize)> = None;

    for sentence in split_sentences(text) {
        let ids = tokenizer.encode(sentence)?;

        if ids.len() > budget {
            if let Some((text, token_count)) = current.take() {
                chunks.push(TextChunk {
                    text,
                    token_count,
                    forced_split: false,
                });
            }
            for slice in ids.chunks(budget) {
                let piece = tokenizer.decode(slice)?;
                let piece = piece.trim();
                if !piece.is_empty() {
                    chunks.push(TextChunk {
                        text: piece.to_string(),
                        token_count: slice.len(),
                        forced_split: true,
                    });
                }
            }
            tracing::debug!(tokens = ids.len(), budget, "hard-split long sentence");
            continue;
        }

        current = match current.take() {
            None => Some((sentence.to_string(), ids.len())),
            Some((acc, acc_tokens)) => {
                let combined = format!("{} {}", acc, sentence);
                let combined_tokens = tokenizer.count_tokens(&combined)?;
                if combined_tokens > budget {
                    chunks.push(TextChunk {
                        text: acc,
                        token_count: acc_tokens,
                        forced_split: false,
                    });
                    Some((sentence.to_string(), ids.len()))
                } else {
                    Some((combined, combined_tokens))
                }
            }
        };
    }

    if let Some((text, token_count)) = current {
        chunks.push(TextChunk {
            text,
            token_count,
            forced_split: false,
        });
    }

    tracing::debug!(chunks = chunks.len(), budget, "chunked text");
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::tokenizer::WordTokenizer;

    fn sentence_of(words: usize, tag: &str) -> String {
        let body = (0..words)
            .map(|i| format!("{}{}", tag, i))
            .collect::<Vec<_>>()
            .join(" ");
        format!("{}.", body)
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(
            split_sentences("Hi there. How are you?! Fine"),
            vec!["Hi there.", "How are you?!", "Fine"]
        );
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn test_short_utterance_is_one_chunk() -> anyhow::Result<()> {
        let tok = WordTokenizer::new();
        let text = format!("{} {} {}", sentence_of(10, "a"), sentence_of(10, "b"), sentence_of(10, "c"));
        let chunks = chunk_text(&text, &tok, 50)?;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 30);
        assert_eq!(chunks[0].text, text);
        Ok(())
    }

    #[test]
    fn test_sentences_near_budget_never_merge() -> anyhow::Result<()> {
        let tok = WordTokenizer::new();
        let sentences: Vec<String> = (0..6).map(|i| sentence_of(40, &format!("s{}w", i))).collect();
        let text = sentences.join(" ");
        let chunks = chunk_text(&text, &tok, 50)?;
        assert_eq!(chunks.len(), 6);
        for (chunk, sentence) in chunks.iter().zip(&sentences) {
            assert!(chunk.token_count <= 50);
            assert!(!chunk.forced_split);
            assert_eq!(&chunk.text, sentence);
        }
        Ok(())
    }

    #[test]
    fn test_reconstruction_and_budget() -> anyhow::Result<()> {
        let tok = WordTokenizer::new();
        let text = "One two three. Four five! Six seven eight nine? Ten. Eleven twelve thirteen.";
        let chunks = chunk_text(text, &tok, 5)?;
        for chunk in &chunks {
            assert!(chunk.token_count <= 5, "{:?}", chunk);
            assert_eq!(chunk.token_count, tok.count_tokens(&chunk.text)?);
        }
        let rebuilt = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ");
        assert_eq!(rebuilt, text);
        assert_eq!(chunks[0].text, "One two three. Four five!");
        Ok(())
    }

    #[test]
    fn test_long_sentence_is_hard_split() -> anyhow::Result<()> {
        let tok = WordTokenizer::new();
        let text = format!("Short one. {}", sentence_of(12, "w"));
        let chunks = chunk_text(&text, &tok, 5)?;
        assert_eq!(chunks[0].text, "Short one.");
        assert!(!chunks[0].forced_split);
        let forced: Vec<_> = chunks.iter().filter(|c| c.forced_split).collect();
        assert_eq!(forced.len(), 3);
        assert_eq!(forced.iter().map(|c| c.token_count).sum::<usize>(), 12);
        assert_eq!(forced[2].text, "w10 w11.");
        Ok(())
    }

    #[test]
    fn test_zero_budget_is_clamped() -> anyhow::Result<()> {
        let tok = WordTokenizer::new();
        let chunks = chunk_text("a b.", &tok, 0)?;
        assert_eq!(chunks.len(), 2);
        Ok(())
    }
}
