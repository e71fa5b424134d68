//! Model loading shared by the CLI commands and the server
//!
//! A model directory holds the exported ONNX graphs, `tokenizer.model` and
//! `voices.bin`. Loading real models needs the `models` feature; the
//! synthetic tone model is always available.

use anyhow::{Context, Result};
use clap::Args;
use pocket_stream::audio::{read_wav, to_mono};
use pocket_stream::config::{PipelineConfig, load_config};
use pocket_stream::ports::ModelPorts;
use pocket_stream::text::{Tokenizer, WordTokenizer};
use pocket_stream::voice::load_voices_bin;
use pocket_stream::{Session, SyntheticModel, VoiceBank};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const VOICES_FILE: &str = "voices.bin";
pub const TOKENIZER_FILE: &str = "tokenizer.model";

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Directory with the exported ONNX models, tokenizer.model and voices.bin
    #[arg(long, default_value = "models")]
    pub models: PathBuf,

    /// YAML configuration file; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use the built-in synthetic tone model instead of real models
    #[arg(long)]
    pub synthetic: bool,

    /// Inference threads per model
    #[arg(long, default_value_t = 4)]
    pub threads: usize,

    /// Sampling temperature (higher = more variation)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Refinement steps at full quality
    #[arg(long)]
    pub quality: Option<usize>,

    /// Seed for the refinement noise
    #[arg(long)]
    pub seed: Option<u64>,

    /// Token budget per text chunk
    #[arg(long)]
    pub chunk_tokens: Option<usize>,
}

impl Default for ModelArgs {
    fn default() -> Self {
        Self {
            models: PathBuf::from("models"),
            config: None,
            synthetic: false,
            threads: 4,
            temperature: None,
            quality: None,
            seed: None,
            chunk_tokens: None,
        }
    }
}

/// Everything needed to build a session
pub struct LoadedModels {
    pub ports: ModelPorts,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub voices: VoiceBank,
    pub config: PipelineConfig,
}

impl LoadedModels {
    pub fn into_session(self) -> Session {
        Session::new(self.ports, self.tokenizer, self.voices, self.config.generation)
    }
}

impl ModelArgs {
    pub fn synthetic() -> Self {
        Self {
            synthetic: true,
            ..Default::default()
        }
    }

    /// The file configuration with command line overrides applied.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => PipelineConfig::default(),
        };
        let generation = &mut config.generation;
        if let Some(temperature) = self.temperature {
            generation.temperature = temperature;
        }
        if let Some(quality) = self.quality {
            generation.max_quality = quality;
        }
        if let Some(chunk_tokens) = self.chunk_tokens {
            generation.chunk_tokens = chunk_tokens;
        }
        if self.seed.is_some() {
            generation.seed = self.seed;
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn load(&self) -> Result<LoadedModels> {
        let config = self.pipeline_config()?;
        if self.synthetic {
            return synthetic_models(config);
        }

        info!(dir = %self.models.display(), "loading models");
        let (ports, tokenizer) = load_exported(&self.models, &config, self.threads)?;
        let voices_path = self.models.join(VOICES_FILE);
        let voices = if voices_path.exists() {
            let table = load_voices_bin(&voices_path)
                .with_context(|| format!("Failed to load voices from {:?}", voices_path))?;
            VoiceBank::new(table, &config.voice)
        } else {
            warn!(path = %voices_path.display(), "no predefined voices, reference audio required");
            VoiceBank::empty(&config.voice)
        };
        Ok(LoadedModels {
            ports,
            tokenizer,
            voices,
            config,
        })
    }

    pub fn session(&self) -> Result<(Session, PipelineConfig)> {
        let models = self.load()?;
        let config = models.config.clone();
        Ok((models.into_session(), config))
    }
}

fn synthetic_models(config: PipelineConfig) -> Result<LoadedModels> {
    let generation = &config.generation;
    let model = SyntheticModel::new(
        generation.latent_dim,
        generation.samples_per_frame,
        generation.sample_rate,
    );
    let voices = VoiceBank::new(
        vec![(config.voice.default_voice.clone(), model.voice()?)],
        &config.voice,
    );
    Ok(LoadedModels {
        ports: model.ports(),
        tokenizer: Arc::new(WordTokenizer::new()),
        voices,
        config,
    })
}

#[cfg(feature = "models")]
fn load_exported(dir: &Path, config: &PipelineConfig, threads: usize) -> Result<(ModelPorts, Arc<dyn Tokenizer>)> {
    let generation = &config.generation;
    let ports = pocket_stream::onnx::load_onnx_ports(
        dir,
        threads,
        generation.latent_dim,
        generation.text_embed_dim,
    )?;
    let tokenizer = load_tokenizer(&dir.join(TOKENIZER_FILE))?;
    Ok((ports, tokenizer))
}

#[cfg(not(feature = "models"))]
fn load_exported(dir: &Path, _config: &PipelineConfig, _threads: usize) -> Result<(ModelPorts, Arc<dyn Tokenizer>)> {
    anyhow::bail!(
        "Cannot load models from {:?}: this build has no model runtime. \
         Rebuild with `--features models`, or pass --synthetic",
        dir
    )
}

/// Open a SentencePiece model.
#[cfg(feature = "models")]
pub fn load_tokenizer(path: &Path) -> Result<Arc<dyn Tokenizer>> {
    let tokenizer = pocket_stream::text::SentencePieceTokenizer::open(path)
        .with_context(|| format!("Failed to load tokenizer from {:?}", path))?;
    Ok(Arc::new(tokenizer))
}

#[cfg(not(feature = "models"))]
pub fn load_tokenizer(path: &Path) -> Result<Arc<dyn Tokenizer>> {
    anyhow::bail!(
        "Cannot load tokenizer {:?}: rebuild with `--features models`",
        path
    )
}

/// Read a WAV file as mono reference audio.
pub fn read_reference(path: &Path) -> Result<(Vec<f32>, u32)> {
    let wav = read_wav(path).with_context(|| format!("Failed to read reference audio {:?}", path))?;
    Ok((to_mono(&wav.channels), wav.sample_rate))
}
