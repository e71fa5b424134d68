//! `pocket-stream chunk` - show how text is split before synthesis

use anyhow::Result;
use clap::Parser;
use owo_colors::OwoColorize;
use pocket_stream::config::defaults;
use pocket_stream::text::{Tokenizer, WordTokenizer};
use pocket_stream::prepare_chunks;
use std::path::PathBuf;
use std::sync::Arc;

use super::text_or_stdin;
use crate::models::load_tokenizer;

#[derive(Parser, Debug)]
pub struct ChunkArgs {
    /// Text to chunk; reads stdin when omitted or `-`
    pub text: Option<String>,

    /// Token budget per chunk
    #[arg(long, default_value_t = defaults::CHUNK_TARGET_TOKENS)]
    pub tokens: usize,

    /// SentencePiece model; counts whitespace words when omitted
    #[arg(long)]
    pub tokenizer: Option<PathBuf>,
}

pub fn run(args: ChunkArgs) -> Result<()> {
    let text = text_or_stdin(args.text)?;
    let tokenizer: Arc<dyn Tokenizer> = match &args.tokenizer {
        Some(path) => load_tokenizer(path)?,
        None => Arc::new(WordTokenizer::new()),
    };

    let chunks = prepare_chunks(&text, tokenizer.as_ref(), args.tokens)?;
    for (i, chunk) in chunks.iter().enumerate() {
        let marker = if chunk.forced_split { " split" } else { "" };
        println!(
            "{} {}",
            format!("[{} | {} tokens{}]", i, chunk.token_count, marker).dimmed(),
            chunk.text
        );
    }
    Ok(())
}
