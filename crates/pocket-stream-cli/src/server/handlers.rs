use crate::server::state::AppState;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use pocket_stream::audio::{pcm16_bytes, read_wav_from_bytes, to_mono, write_wav_to_writer};
use pocket_stream::engine::RunSummary;
use pocket_stream::{AudioSegment, Control, Session, SynthesisError};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

pub const SAMPLE_RATE_HEADER: &str = "x-sample-rate";

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
}

pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize, Deserialize)]
pub struct VoicesResponse {
    pub voices: Vec<String>,
    pub default_voice: Option<String>,
}

pub async fn voices(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.lock().await;
    Json(VoicesResponse {
        voices: session.voices().names(),
        default_voice: session.voices().default_voice().map(str::to_string),
    })
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    text: String,
    voice: Option<String>,
    /// Base64 WAV to clone the voice from, optionally as a data URL
    reference: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    fn internal(e: impl std::fmt::Display) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<SynthesisError> for ApiError {
    fn from(e: SynthesisError) -> Self {
        if e.is_input_error() {
            Self::BadRequest(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Decode base64 WAV bytes into mono PCM.
fn decode_reference(spec: &str) -> Result<(Vec<f32>, u32), ApiError> {
    // Strip data URL prefix if present
    let b64_str = match spec.split_once("base64,") {
        Some((_, data)) if spec.starts_with("data:") => data,
        _ => spec,
    };
    let bytes = general_purpose::STANDARD
        .decode(b64_str.trim())
        .map_err(|e| ApiError::BadRequest(format!("Failed to decode base64 audio: {}", e)))?;
    let wav = read_wav_from_bytes(&bytes)
        .map_err(|e| ApiError::BadRequest(format!("Failed to parse WAV: {}", e)))?;
    Ok((to_mono(&wav.channels), wav.sample_rate))
}

fn synthesize_request(
    session: &mut Session,
    request: &GenerateRequest,
    control: &mut dyn FnMut() -> Option<Control>,
    sink: &mut dyn FnMut(AudioSegment),
) -> Result<RunSummary, ApiError> {
    let voice = match &request.reference {
        Some(reference) => {
            let (pcm, sample_rate) = decode_reference(reference)?;
            Some(session.encode_voice(&pcm, sample_rate)?)
        }
        None => request.voice.clone(),
    };
    Ok(session.synthesize(&request.text, voice.as_deref(), control, sink)?)
}

pub async fn generate(
    State(state): State<AppState>,
    Json(payload): Json<GenerateRequest>,
) -> Response {
    let session = state.session.clone();
    let sample_rate = state.sample_rate;

    // Offload to blocking thread
    let result = tokio::task::spawn_blocking(move || {
        let mut session = session.blocking_lock();
        let mut audio = Vec::new();
        let summary = synthesize_request(&mut session, &payload, &mut || None, &mut |segment| {
            audio.extend_from_slice(&segment.samples)
        })?;
        info!(audio_seconds = summary.audio_seconds, rtfx = summary.rtfx, "generated");

        let mut buffer = std::io::Cursor::new(Vec::new());
        write_wav_to_writer(&mut buffer, &audio, sample_rate).map_err(ApiError::internal)?;
        Ok::<Vec<u8>, ApiError>(buffer.into_inner())
    })
    .await;

    match result {
        Ok(Ok(wav_bytes)) => ([(header::CONTENT_TYPE, "audio/wav")], wav_bytes).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(e) => ApiError::internal(format!("Task join error: {}", e)).into_response(),
    }
}

/// Stream raw 16-bit little-endian PCM as segments are decoded.
///
/// Request errors are reported with a status code before the stream starts;
/// failures after that end the body with an error.
pub async fn generate_stream(
    State(state): State<AppState>,
    Json(payload): Json<GenerateRequest>,
) -> Response {
    let mut session = state.session.clone().lock_owned().await;

    if let Err(e) = session.prepare(&payload.text) {
        return ApiError::from(e).into_response();
    }
    if let Some(voice) = &payload.voice
        && let Err(e) = session.voices().get(voice)
    {
        return ApiError::from(e).into_response();
    }

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Vec<u8>, std::io::Error>>(16);

    // The session lock travels with the task and is released when it ends
    tokio::task::spawn_blocking(move || {
        let closed = Cell::new(false);
        let mut control = || closed.get().then_some(Control::Stop);
        let mut sink = |segment: AudioSegment| {
            if !closed.get() && tx.blocking_send(Ok(pcm16_bytes(&segment.samples))).is_err() {
                // client went away
                closed.set(true);
            }
        };
        let result = synthesize_request(&mut session, &payload, &mut control, &mut sink);
        if let Err(e) = result {
            warn!(error = ?e, "stream generation failed");
            let message = match e {
                ApiError::BadRequest(m) | ApiError::Internal(m) => m,
            };
            let _ = tx.blocking_send(Err(std::io::Error::other(message)));
        }
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(SAMPLE_RATE_HEADER, state.sample_rate)
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|e| ApiError::internal(e).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reference_accepts_data_url() -> anyhow::Result<()> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        write_wav_to_writer(&mut buffer, &[0.0, 0.5, -0.5, 0.25], 16_000)?;
        let b64 = general_purpose::STANDARD.encode(buffer.into_inner());

        let (pcm, rate) = decode_reference(&format!("data:audio/wav;base64,{}", b64))
            .map_err(|e| anyhow::anyhow!("{:?}", e))?;
        assert_eq!(rate, 16_000);
        assert_eq!(pcm.len(), 4);

        let (raw, _) = decode_reference(&b64).map_err(|e| anyhow::anyhow!("{:?}", e))?;
        assert_eq!(raw.len(), 4);
        Ok(())
    }

    #[test]
    fn test_bad_base64_is_a_client_error() {
        assert!(matches!(
            decode_reference("not base64 at all!"),
            Err(ApiError::BadRequest(_))
        ));
    }
}
