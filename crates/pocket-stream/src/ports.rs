//! Model ports
//!
//! The neural stages are opaque request/response units with fixed tensor
//! contracts. Any runtime can sit behind them; the `onnx` feature ships one.
//!
//! Contracts (batch is always 1):
//! - `TextEncoder`: token ids -> text embeddings `[1, T, D]`
//! - `Conditioner`: (sequence `[1, 0, L]`, embeddings `[1, T, D]`, state) -> `StepOutput`
//! - `StepGenerator`: (latent `[1, 1, L]`, state) -> `StepOutput`
//! - `Refiner`: (conditioning, s `[1, 1]`, t `[1, 1]`, x `[1, L]`) -> direction `[1, L]`
//! - `Vocoder`: (latents `[1, n, L]`, state) -> PCM samples + state
//! - `VoiceEncoder`: PCM `[1, 1, N]` -> voice embedding `[1, F, D]`

use crate::error::Result;
use crate::state::{ModelState, SlotSpec, flow_lm_slots, mimi_decoder_slots};
use candle_core::Tensor;
use std::sync::Arc;

/// Result of one pass through the autoregressive generator
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub conditioning: Tensor,
    pub eos_logit: f32,
    /// Returned state slots keyed by output name (`out_state_N`)
    pub state: ModelState,
}

#[derive(Debug, Clone)]
pub struct VocoderOutput {
    pub pcm: Vec<f32>,
    /// Updated decoder state in slot order
    pub states: Vec<Tensor>,
}

pub trait TextEncoder: Send + Sync {
    fn encode(&self, token_ids: &[u32]) -> Result<Tensor>;
}

pub trait Conditioner: Send + Sync {
    fn condition(
        &self,
        sequence: &Tensor,
        text_embeddings: &Tensor,
        state: &ModelState,
    ) -> Result<StepOutput>;
}

pub trait StepGenerator: Send + Sync {
    fn step(&self, latent: &Tensor, state: &ModelState) -> Result<StepOutput>;
}

pub trait Refiner: Send + Sync {
    fn flow_direction(&self, conditioning: &Tensor, s: &Tensor, t: &Tensor, x: &Tensor)
    -> Result<Tensor>;
}

pub trait Vocoder: Send + Sync {
    fn decode(&self, latents: &Tensor, state: &ModelState) -> Result<VocoderOutput>;
}

pub trait VoiceEncoder: Send + Sync {
    fn encode(&self, pcm: &Tensor) -> Result<Tensor>;
}

/// The full set of model units plus their state tables
#[derive(Clone)]
pub struct ModelPorts {
    pub text_encoder: Arc<dyn TextEncoder>,
    pub conditioner: Arc<dyn Conditioner>,
    pub generator: Arc<dyn StepGenerator>,
    pub refiner: Arc<dyn Refiner>,
    pub vocoder: Arc<dyn Vocoder>,
    pub voice_encoder: Option<Arc<dyn VoiceEncoder>>,
    pub generator_slots: Arc<[SlotSpec]>,
    pub vocoder_slots: Arc<[SlotSpec]>,
}

impl ModelPorts {
    /// Bundle ports using the slot tables of the exported Pocket TTS models.
    pub fn new(
        text_encoder: Arc<dyn TextEncoder>,
        conditioner: Arc<dyn Conditioner>,
        generator: Arc<dyn StepGenerator>,
        refiner: Arc<dyn Refiner>,
        vocoder: Arc<dyn Vocoder>,
    ) -> Self {
        Self {
            text_encoder,
            conditioner,
            generator,
            refiner,
            vocoder,
            voice_encoder: None,
            generator_slots: flow_lm_slots().into(),
            vocoder_slots: mimi_decoder_slots().into(),
        }
    }

    pub fn with_voice_encoder(mut self, encoder: Arc<dyn VoiceEncoder>) -> Self {
        self.voice_encoder = Some(encoder);
        self
    }

    pub fn with_slots(mut self, generator: Vec<SlotSpec>, vocoder: Vec<SlotSpec>) -> Self {
        self.generator_slots = generator.into();
        self.vocoder_slots = vocoder.into();
        self
    }
}

impl std::fmt::Debug for ModelPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelPorts")
            .field("generator_slots", &self.generator_slots.len())
            .field("vocoder_slots", &self.vocoder_slots.len())
            .field("voice_encoder", &self.voice_encoder.is_some())
            .finish()
    }
}
