//! Generate command implementation
//!
//! Provides `pocket-stream generate`, which synthesizes without the
//! playback pipeline: straight to a WAV file, or as raw PCM on stdout.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use pocket_stream::audio::{pcm16_bytes, write_wav};
use pocket_stream::{AudioSegment, Control, Session};
use std::cell::Cell;
use std::io::Write;
use std::path::PathBuf;

use super::truncate_text;
use crate::models::{ModelArgs, read_reference};

/// Default text shown when user runs without --text
pub const DEFAULT_TEXT: &str =
    "Hello world! I am pocket-stream, and I start talking before I have finished thinking.";

#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Text to synthesize (defaults to a greeting if not specified)
    #[arg(short, long, default_value = DEFAULT_TEXT)]
    pub text: String,

    /// Predefined voice name from voices.bin
    #[arg(short, long)]
    pub voice: Option<String>,

    /// WAV file to clone the voice from
    #[arg(long, conflicts_with = "voice")]
    pub reference: Option<PathBuf>,

    /// Output audio file path
    #[arg(short, long, default_value = "output.wav")]
    pub output: PathBuf,

    /// Stream raw 16-bit PCM to stdout (for piping to audio players)
    #[arg(long)]
    pub stream: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    #[command(flatten)]
    pub model: ModelArgs,
}

/// Print styled message (respects quiet mode)
macro_rules! info {
    ($quiet:expr, $($arg:tt)*) => {
        if !$quiet {
            println!($($arg)*);
        }
    };
}

pub fn run(args: GenerateArgs) -> Result<()> {
    let quiet = args.quiet || args.stream;

    if !quiet {
        print_banner();
    }

    info!(quiet, "{} Loading model...", "▶".cyan());
    let (mut session, config) = args.model.session()?;
    info!(
        quiet,
        "  {} Model loaded (sample rate: {}Hz)",
        "✓".green(),
        config.generation.sample_rate
    );

    let voice = match &args.reference {
        Some(path) => {
            let (pcm, sample_rate) = read_reference(path)?;
            let id = session.encode_voice(&pcm, sample_rate)?;
            info!(quiet, "{} Cloned voice from {} as {}", "▶".cyan(), path.display(), id.yellow());
            Some(id)
        }
        None => args.voice.clone(),
    };
    let voice_display = voice
        .clone()
        .or_else(|| session.current_voice().map(|v| format!("{} (default)", v)))
        .unwrap_or_else(|| "none".to_string());
    info!(quiet, "{} Using voice: {}", "▶".cyan(), voice_display.yellow());

    if args.stream {
        run_streaming(&mut session, &args.text, voice.as_deref())
    } else {
        run_to_file(&mut session, &args, voice.as_deref(), quiet)
    }
}

/// Write every segment to stdout as soon as it is decoded
fn run_streaming(session: &mut Session, text: &str, voice: Option<&str>) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    let closed = Cell::new(false);
    let mut write_error = None;

    // a closed pipe stops generation at the next yield point
    let mut control = || closed.get().then_some(Control::Stop);
    let mut sink = |segment: AudioSegment| {
        if closed.get() {
            return;
        }
        let result = stdout
            .write_all(&pcm16_bytes(&segment.samples))
            .and_then(|_| stdout.flush());
        if let Err(e) = result {
            closed.set(true);
            write_error = Some(e);
        }
    };
    session.synthesize(text, voice, &mut control, &mut sink)?;

    match write_error {
        Some(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e.into()),
        _ => Ok(()),
    }
}

/// Run generation to file with progress spinner
fn run_to_file(session: &mut Session, args: &GenerateArgs, voice: Option<&str>, quiet: bool) -> Result<()> {
    info!(
        quiet,
        "{} Generating: \"{}\"",
        "▶".cyan(),
        truncate_text(&args.text, 60).italic()
    );

    let sample_rate = session.config().sample_rate;
    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} [{elapsed_precise}] {pos} segments {msg}")?);
        pb.set_message("generating...");
        pb
    };

    let mut audio = Vec::new();
    let summary = session.synthesize(&args.text, voice, &mut || None, &mut |segment| {
        audio.extend_from_slice(&segment.samples);
        pb.inc(1);
        pb.set_message(format!(
            "{:.2}s generated",
            audio.len() as f32 / sample_rate as f32
        ));
    })?;
    pb.finish_and_clear();

    if audio.is_empty() {
        anyhow::bail!("No audio generated - text may be too short or invalid");
    }

    info!(
        quiet,
        "{} Saving to: {}",
        "▶".cyan(),
        args.output.display().yellow()
    );
    write_wav(&args.output, &audio, sample_rate)?;

    if !quiet {
        println!();
        println!(
            "  {} {}",
            "✓".green().bold(),
            "Audio generated successfully!".green().bold()
        );
        println!(
            "    Duration: {:.2}s ({} samples @ {}Hz)",
            summary.audio_seconds,
            audio.len(),
            sample_rate
        );
        println!(
            "    Speed:    {:.2}x real time ({:.2}s generating)",
            summary.rtfx, summary.gen_time
        );
        println!("    Output:   {}", args.output.display().cyan());
        println!();
    }

    Ok(())
}

/// Print startup banner
pub fn print_banner() {
    println!();
    println!("  {}", "pocket-stream".bold().cyan());
    println!(
        "  {} {}",
        "streaming text-to-speech".dimmed(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!();
}
