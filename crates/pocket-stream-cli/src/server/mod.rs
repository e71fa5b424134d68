//! HTTP front end for a single synthesis session
//!
//! Requests share one [`pocket_stream::Session`]; `/generate` returns a WAV
//! and `/stream` returns 16-bit PCM as segments are decoded.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use tracing::info;

use crate::commands::serve::{ServeArgs, print_endpoints};

pub mod handlers;
pub mod routes;
pub mod state;

pub async fn start_server(args: ServeArgs) -> Result<()> {
    let (session, config) = args.model.session()?;
    println!(
        "  {} Model loaded (sample rate: {}Hz, voices: {})",
        "✓".green(),
        config.generation.sample_rate,
        session.voices().names().join(", ")
    );

    let state = state::AppState::new(session);
    let app = routes::create_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "serving");
    print_endpoints(&args.host, args.port);
    axum::serve(listener, app).await?;

    Ok(())
}
