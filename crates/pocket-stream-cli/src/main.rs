//! pocket-stream CLI
//!
//! Streaming text-to-speech from the command line.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pocket_stream_cli::commands;

/// pocket-stream - low latency streaming text-to-speech
#[derive(Parser)]
#[command(
    name = "pocket-stream",
    author,
    version,
    about = "pocket-stream - streaming text-to-speech",
    long_about = "Synthesizes speech chunk by chunk and plays it while the rest is\n\
                  still being generated, trading quality for speed when the machine\n\
                  cannot keep up with real time."
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Speak text through the streaming pipeline
    ///
    /// Plays on the default output device when built with the `device`
    /// feature, otherwise records the rendered stream to a WAV file.
    Speak(commands::speak::SpeakArgs),

    /// Synthesize text to a WAV file or raw PCM on stdout
    Generate(commands::generate::GenerateArgs),

    /// Print the normalized form of text
    Normalize(commands::normalize::NormalizeArgs),

    /// Print the chunks text would be synthesized in
    Chunk(commands::chunk::ChunkArgs),

    /// List the voices in a voices.bin file
    Voices(commands::voices::VoicesArgs),

    /// Start the HTTP API server
    Serve(commands::serve::ServeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout may carry audio, keep logs on stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        // CPU-bound, run synchronously
        Commands::Speak(cmd_args) => commands::speak::run(cmd_args),
        Commands::Generate(cmd_args) => commands::generate::run(cmd_args),
        Commands::Normalize(cmd_args) => commands::normalize::run(cmd_args),
        Commands::Chunk(cmd_args) => commands::chunk::run(cmd_args),
        Commands::Voices(cmd_args) => commands::voices::run(cmd_args),
        Commands::Serve(cmd_args) => commands::serve::run(cmd_args).await,
    }
}
