//! Audio output through cpal
//!
//! The render callback owns the [`PlaybackConsumer`]; it never blocks and
//! never allocates once the stream is running.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use pocket_stream::PlaybackConsumer;
use tracing::{error, info};

/// Frames the callback can render in one call
const MAX_BLOCK_FRAMES: usize = 16_384;

/// Start playing `consumer` on the default output device. Playback stops
/// when the returned stream is dropped.
pub fn open_output(mut consumer: PlaybackConsumer, sample_rate: u32) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .context("No audio output device available")?;
    let channels = device
        .default_output_config()
        .context("Failed to query the output device")?
        .channels()
        .clamp(1, 2);

    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    info!(
        device = device.name().unwrap_or_default(),
        channels, sample_rate, "opening audio output"
    );

    let mut scratch = vec![0.0f32; MAX_BLOCK_FRAMES];
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                consumer.render_interleaved(data, channels as usize, &mut scratch);
            },
            |e| error!(error = %e, "audio output stream error"),
            None,
        )
        .with_context(|| format!("Output device does not support {} Hz playback", sample_rate))?;
    stream.play().context("Failed to start audio output")?;
    Ok(stream)
}
