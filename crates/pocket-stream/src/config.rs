//! Pipeline configuration
//!
//! Every field has a default so a YAML file only needs the values it
//! overrides. Defaults match the exported Pocket TTS models.

use crate::error::{Result, SynthesisError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default values shared by the config structs and the CLI
pub mod defaults {
    pub const SAMPLE_RATE: u32 = 24_000;
    pub const SAMPLES_PER_FRAME: usize = 1920;
    pub const MAX_FRAMES: usize = 500;
    pub const CHUNK_TARGET_TOKENS: usize = 50;
    pub const CHUNK_GAP_SEC: f32 = 0.25;
    pub const MAX_QUALITY: usize = 10;
    pub const EOS_THRESHOLD: f32 = -4.0;
    pub const FRAMES_AFTER_EOS: usize = 3;
    pub const TEMPERATURE: f32 = 0.7;
    pub const LATENT_DIM: usize = 32;
    pub const TEXT_EMBED_DIM: usize = 1024;
    pub const FIRST_FLUSH_FRAMES: usize = 3;
    pub const FLUSH_FRAMES: usize = 12;
    pub const YIELD_EVERY_STEPS: usize = 4;

    pub const MIN_BUFFER_MS: u32 = 300;
    pub const RING_CAPACITY_SECS: u32 = 60;
    pub const SAFETY_MARGIN: usize = 128;
    pub const CAPACITY_REPORT_INTERVAL: u32 = 256;
    pub const MIN_PARTIAL_PUSH: usize = 4096;
    pub const FADE_SAMPLES: usize = 480;
    pub const REALTIME_THRESHOLD: f32 = 1.0;
    pub const EVENT_QUEUE: usize = 1024;

    pub const DEFAULT_VOICE: &str = "cosette";
    pub const MAX_REFERENCE_SECS: f32 = 10.0;
    pub const VOICE_CACHE_ENTRIES: usize = 16;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub generation: GenerationConfig,
    pub playback: PlaybackConfig,
    pub voice: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub sample_rate: u32,
    pub samples_per_frame: usize,
    /// Hard ceiling on autoregressive steps per text chunk
    pub max_frames: usize,
    pub chunk_tokens: usize,
    pub chunk_gap_sec: f32,
    pub reset_generator_state: bool,
    pub reset_vocoder_state: bool,
    /// Refinement steps at full quality
    pub max_quality: usize,
    pub eos_threshold: f32,
    pub frames_after_eos: usize,
    pub temperature: f32,
    pub latent_dim: usize,
    pub text_embed_dim: usize,
    pub first_flush_frames: usize,
    pub flush_frames: usize,
    pub yield_every: usize,
    /// Fixed seed for the refinement noise, entropy when unset
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            samples_per_frame: defaults::SAMPLES_PER_FRAME,
            max_frames: defaults::MAX_FRAMES,
            chunk_tokens: defaults::CHUNK_TARGET_TOKENS,
            chunk_gap_sec: defaults::CHUNK_GAP_SEC,
            reset_generator_state: true,
            reset_vocoder_state: true,
            max_quality: defaults::MAX_QUALITY,
            eos_threshold: defaults::EOS_THRESHOLD,
            frames_after_eos: defaults::FRAMES_AFTER_EOS,
            temperature: defaults::TEMPERATURE,
            latent_dim: defaults::LATENT_DIM,
            text_embed_dim: defaults::TEXT_EMBED_DIM,
            first_flush_frames: defaults::FIRST_FLUSH_FRAMES,
            flush_frames: defaults::FLUSH_FRAMES,
            yield_every: defaults::YIELD_EVERY_STEPS,
            seed: None,
        }
    }
}

impl GenerationConfig {
    /// Length of the silence segment inserted between chunks.
    pub fn gap_samples(&self) -> usize {
        ((self.chunk_gap_sec * self.sample_rate as f32).floor() as usize).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub min_buffer_ms: u32,
    pub capacity_secs: u32,
    pub safety_margin: usize,
    /// Render calls between unsolicited capacity reports
    pub report_interval: u32,
    pub min_partial_push: usize,
    pub fade_samples: usize,
    pub realtime_threshold: f32,
    pub event_queue: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            min_buffer_ms: defaults::MIN_BUFFER_MS,
            capacity_secs: defaults::RING_CAPACITY_SECS,
            safety_margin: defaults::SAFETY_MARGIN,
            report_interval: defaults::CAPACITY_REPORT_INTERVAL,
            min_partial_push: defaults::MIN_PARTIAL_PUSH,
            fade_samples: defaults::FADE_SAMPLES,
            realtime_threshold: defaults::REALTIME_THRESHOLD,
            event_queue: defaults::EVENT_QUEUE,
        }
    }
}

impl PlaybackConfig {
    pub fn capacity(&self, sample_rate: u32) -> usize {
        sample_rate as usize * self.capacity_secs as usize
    }

    pub fn min_buffer_samples(&self, sample_rate: u32) -> usize {
        (self.min_buffer_ms as u64 * sample_rate as u64 / 1000) as usize
    }

    pub fn target_buffer_samples(&self, sample_rate: u32) -> usize {
        self.min_buffer_samples(sample_rate) * 2
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub default_voice: String,
    pub max_reference_secs: f32,
    pub cache_entries: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            default_voice: defaults::DEFAULT_VOICE.to_string(),
            max_reference_secs: defaults::MAX_REFERENCE_SECS,
            cache_entries: defaults::VOICE_CACHE_ENTRIES,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        let g = &self.generation;
        let p = &self.playback;
        let invalid = |msg: &str| Err(SynthesisError::Config(msg.to_string()));

        if g.sample_rate == 0 {
            return invalid("sample_rate must be positive");
        }
        if g.chunk_tokens == 0 {
            return invalid("chunk_tokens must be positive");
        }
        if g.max_frames == 0 || g.max_quality == 0 || g.latent_dim == 0 {
            return invalid("max_frames, max_quality and latent_dim must be positive");
        }
        if g.first_flush_frames == 0 || g.flush_frames == 0 || g.yield_every == 0 {
            return invalid("flush sizes and yield interval must be positive");
        }
        if g.temperature < 0.0 {
            return invalid("temperature must not be negative");
        }
        if p.safety_margin == 0 {
            return invalid("safety_margin must be at least one sample");
        }
        let capacity = p.capacity(g.sample_rate);
        if capacity <= p.safety_margin + p.target_buffer_samples(g.sample_rate) {
            return invalid("ring capacity must exceed the target buffer plus safety margin");
        }
        if p.report_interval == 0 || p.event_queue == 0 {
            return invalid("report_interval and event_queue must be positive");
        }
        Ok(())
    }
}

/// Load a YAML configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<PipelineConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path.display(), e))?;
    let config: PipelineConfig = serde_yaml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation.gap_samples(), 6000);
        assert_eq!(config.playback.min_buffer_samples(24_000), 7200);
        assert_eq!(config.playback.target_buffer_samples(24_000), 14_400);
        assert_eq!(config.playback.capacity(24_000), 1_440_000);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() -> anyhow::Result<()> {
        let yaml = "generation:\n  chunk_tokens: 80\n  seed: 7\nplayback:\n  min_buffer_ms: 500\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        assert_eq!(config.generation.chunk_tokens, 80);
        assert_eq!(config.generation.seed, Some(7));
        assert_eq!(config.generation.max_quality, defaults::MAX_QUALITY);
        assert_eq!(config.playback.min_buffer_ms, 500);
        assert_eq!(config.voice.default_voice, "cosette");
        Ok(())
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut config = PipelineConfig::default();
        config.generation.chunk_tokens = 0;
        assert!(matches!(config.validate(), Err(SynthesisError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_tiny_ring() {
        let mut config = PipelineConfig::default();
        config.playback.capacity_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gap_samples_never_zero() {
        let config = GenerationConfig {
            chunk_gap_sec: 0.0,
            ..Default::default()
        };
        assert_eq!(config.gap_samples(), 1);
    }

    #[test]
    fn test_load_config_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, "voice:\n  default_voice: alba\n")?;
        let config = load_config(&path)?;
        assert_eq!(config.voice.default_voice, "alba");
        Ok(())
    }
}
