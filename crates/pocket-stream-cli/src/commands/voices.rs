use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use pocket_stream::voice::load_voices_bin;
use std::path::PathBuf;

#[derive(Parser, Debug)]
pub struct VoicesArgs {
    /// Path to a voices.bin file
    #[arg(default_value = "models/voices.bin")]
    pub path: PathBuf,
}

pub fn run(args: VoicesArgs) -> Result<()> {
    let voices = load_voices_bin(&args.path)
        .with_context(|| format!("Failed to load voices from {:?}", args.path))?;
    for (name, embedding) in &voices {
        let (_, frames, dim) = embedding.dims3()?;
        println!(
            "  {:<12} {}",
            name.cyan(),
            format!("{} frames x {}", frames, dim).dimmed()
        );
    }
    println!("{} voices", voices.len());
    Ok(())
}
