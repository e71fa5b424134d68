//! Speak command implementation
//!
//! Runs the full streaming pipeline: a session worker generates, the
//! coordinator routes segments, and a player renders them. The player is
//! either the audio device (`device` feature) or an offline clock that
//! renders blocks in real time and records them to a WAV file.

use anyhow::{Result, bail};
use clap::Parser;
use crossbeam_channel::TryRecvError;
use owo_colors::OwoColorize;
use pocket_stream::audio::write_wav;
use pocket_stream::{Pipeline, PipelineEvent, PlaybackConsumer, playback_channel};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::generate::DEFAULT_TEXT;
use crate::models::{ModelArgs, read_reference};

pub const DEFAULT_RECORDING: &str = "speak.wav";

#[derive(Parser, Debug)]
pub struct SpeakArgs {
    /// Text to speak
    #[arg(short, long, default_value = DEFAULT_TEXT)]
    pub text: String,

    /// Predefined voice name from voices.bin
    #[arg(short, long)]
    pub voice: Option<String>,

    /// WAV file to clone the voice from
    #[arg(long, conflicts_with = "voice")]
    pub reference: Option<PathBuf>,

    /// Record the rendered stream to this WAV instead of playing it
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Samples rendered per block by the offline clock
    #[arg(long, default_value_t = 480)]
    pub block: usize,

    /// Only print errors
    #[arg(short, long)]
    pub quiet: bool,

    #[command(flatten)]
    pub model: ModelArgs,
}

pub fn run(args: SpeakArgs) -> Result<()> {
    let (session, config) = args.model.session()?;
    let sample_rate = config.generation.sample_rate;
    let (player, consumer) = playback_channel(&config.playback, sample_rate);
    let pipeline = Pipeline::start(session.spawn()?, player, &config.playback)?;

    if let Some(path) = &args.reference {
        let (pcm, rate) = read_reference(path)?;
        pipeline.encode_voice(pcm, rate);
    }
    pipeline.speak(args.text.clone(), args.voice.clone());

    let mut report = Report::new(args.quiet);
    match &args.output {
        Some(path) => record(&pipeline, consumer, sample_rate, args.block, path, &mut report)?,
        None => play_device(&pipeline, consumer, sample_rate, args.block, &mut report)?,
    }
    pipeline.shutdown();

    if let Some(error) = report.error {
        bail!(error);
    }
    Ok(())
}

#[cfg(feature = "device")]
fn play_device(
    pipeline: &Pipeline,
    consumer: PlaybackConsumer,
    sample_rate: u32,
    _block: usize,
    report: &mut Report,
) -> Result<()> {
    let _stream = crate::device::open_output(consumer, sample_rate)?;
    loop {
        let Ok(event) = pipeline.events().recv() else {
            bail!("pipeline stopped unexpectedly");
        };
        if report.on_event(event) {
            return Ok(());
        }
    }
}

#[cfg(not(feature = "device"))]
fn play_device(
    pipeline: &Pipeline,
    consumer: PlaybackConsumer,
    sample_rate: u32,
    block: usize,
    report: &mut Report,
) -> Result<()> {
    tracing::info!("built without the device feature, recording to {}", DEFAULT_RECORDING);
    record(pipeline, consumer, sample_rate, block, Path::new(DEFAULT_RECORDING), report)
}

/// Render fixed blocks on a real-time clock until playback completes.
fn record(
    pipeline: &Pipeline,
    mut consumer: PlaybackConsumer,
    sample_rate: u32,
    block: usize,
    path: &Path,
    report: &mut Report,
) -> Result<()> {
    let block = block.max(1);
    let period = Duration::from_secs_f64(block as f64 / sample_rate as f64);
    let mut out = vec![0.0f32; block];
    let mut recorded = Vec::new();
    let mut next = Instant::now();

    loop {
        consumer.render(&mut out);
        recorded.extend_from_slice(&out);

        let mut complete = false;
        loop {
            match pipeline.events().try_recv() {
                Ok(event) => complete |= report.on_event(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => bail!("pipeline stopped unexpectedly"),
            }
        }
        if complete {
            break;
        }

        next += period;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }

    write_wav(path, &recorded, sample_rate)?;
    if !report.quiet {
        println!("  {} Recorded {}", "✓".green(), path.display().cyan());
    }
    Ok(())
}

/// Prints pipeline progress and remembers the first error.
struct Report {
    quiet: bool,
    error: Option<String>,
}

impl Report {
    fn new(quiet: bool) -> Self {
        Self { quiet, error: None }
    }

    /// Returns true once playback is complete.
    fn on_event(&mut self, event: PipelineEvent) -> bool {
        match event {
            PipelineEvent::Error(message) => {
                eprintln!("  {} {}", "✗".red(), message.red());
                self.error.get_or_insert(message);
            }
            PipelineEvent::PlaybackComplete => return true,
            event if !self.quiet => self.print(event),
            _ => {}
        }
        false
    }

    fn print(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::VoiceEncoded { id } => {
                println!("{} Cloned voice {}", "▶".cyan(), id.yellow())
            }
            PipelineEvent::GenerationStarted => println!("{} Generating...", "▶".cyan()),
            PipelineEvent::FirstByte { ttfb } => {
                println!("  first audio after {} ms", ttfb.as_millis())
            }
            PipelineEvent::ModeChanged(mode) => println!("  playback mode: {}", mode.yellow()),
            PipelineEvent::QualityReduced { steps } => println!(
                "  {} behind real time, refinement steps reduced to {}",
                "!".yellow(),
                steps
            ),
            PipelineEvent::PlaybackStarted { latency, .. } => println!(
                "{} Playing ({} ms after request)",
                "▶".cyan(),
                latency.as_millis()
            ),
            PipelineEvent::Underrun { count, .. } => {
                println!("  {} underrun #{}", "!".yellow(), count)
            }
            PipelineEvent::Finished {
                rtfx,
                audio_seconds,
                ..
            } => println!(
                "  {} {:.2}s of audio at {:.2}x real time",
                "✓".green(),
                audio_seconds,
                rtfx
            ),
            _ => {}
        }
    }
}
