pub mod chunk;
pub mod generate;
pub mod normalize;
pub mod serve;
pub mod speak;
pub mod voices;

use anyhow::{Context, Result};
use std::io::Read;

/// Use the text argument, or read all of stdin when it is absent or `-`.
pub fn text_or_stdin(text: Option<String>) -> Result<String> {
    match text {
        Some(text) if text != "-" => Ok(text),
        _ => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read text from stdin")?;
            Ok(buffer)
        }
    }
}

/// Truncate text for display
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
