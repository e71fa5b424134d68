use anyhow::Result;
use clap::Parser;
use owo_colors::OwoColorize;

use crate::models::ModelArgs;
use crate::server::routes::{GENERATE_PATH, HEALTH_PATH, STREAM_PATH, VOICES_PATH};

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Host to bind (default: 127.0.0.1)
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on (default: 8000)
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    #[command(flatten)]
    pub model: ModelArgs,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    crate::server::start_server(args).await
}

pub fn print_endpoints(host: &str, port: u16) {
    let base = format!("http://{}:{}", host, port);
    println!();
    println!("  {} Listening on {}", "▶".cyan(), base.bold());
    println!("    GET  {}{}", base, HEALTH_PATH);
    println!("    GET  {}{}", base, VOICES_PATH);
    println!("    POST {}{}  {}", base, GENERATE_PATH, "(WAV)".dimmed());
    println!("    POST {}{}    {}", base, STREAM_PATH, "(16-bit PCM)".dimmed());
    println!();
}
