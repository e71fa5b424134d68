//! Synthetic model ports
//!
//! A tiny deterministic stand-in for the exported models: every text token
//! lasts a fixed number of frames and the vocoder renders a continuous sine
//! tone. Useful for exercising the pipeline end to end without model files,
//! and for simulating slow hardware with a per-step delay.

use crate::error::Result;
use crate::ports::{
    Conditioner, ModelPorts, Refiner, StepGenerator, StepOutput, TextEncoder, Vocoder,
    VocoderOutput, VoiceEncoder,
};
use crate::state::{ModelState, SlotDType, SlotSpec};
use candle_core::{DType, Device, Tensor};
use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

pub const EMBED_DIM: usize = 8;

#[derive(Debug, Clone)]
pub struct SyntheticModel {
    pub latent_dim: usize,
    pub samples_per_frame: usize,
    pub sample_rate: u32,
    pub frames_per_token: usize,
    pub frequency: f32,
    pub step_delay: Duration,
}

impl SyntheticModel {
    pub fn new(latent_dim: usize, samples_per_frame: usize, sample_rate: u32) -> Self {
        Self {
            latent_dim,
            samples_per_frame,
            sample_rate,
            frames_per_token: 3,
            frequency: 220.0,
            step_delay: Duration::ZERO,
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn with_frames_per_token(mut self, frames: usize) -> Self {
        self.frames_per_token = frames.max(1);
        self
    }

    /// Generator slots: `state_0` counts steps, `state_1` holds the frame
    /// budget set by the last conditioning pass.
    pub fn generator_slots() -> Vec<SlotSpec> {
        vec![
            SlotSpec::new(0, &[1], SlotDType::I64),
            SlotSpec::new(1, &[1], SlotDType::I64),
        ]
    }

    /// Vocoder slot `state_0` carries the oscillator phase.
    pub fn vocoder_slots() -> Vec<SlotSpec> {
        vec![SlotSpec::new(0, &[1], SlotDType::F32)]
    }

    pub fn ports(self) -> ModelPorts {
        let model = Arc::new(self);
        ModelPorts::new(
            model.clone(),
            model.clone(),
            model.clone(),
            model.clone(),
            model.clone(),
        )
        .with_voice_encoder(model)
        .with_slots(Self::generator_slots(), Self::vocoder_slots())
    }

    /// A voice embedding the synthetic conditioner accepts.
    pub fn voice(&self) -> Result<Tensor> {
        Ok(Tensor::zeros((1, 4, EMBED_DIM), DType::F32, &Device::Cpu)?)
    }

    fn output(&self, steps: i64, budget: i64, eos_logit: f32) -> Result<StepOutput> {
        let device = Device::Cpu;
        let mut state = ModelState::new();
        state.insert("out_state_0".to_string(), Tensor::new(&[steps], &device)?);
        state.insert("out_state_1".to_string(), Tensor::new(&[budget], &device)?);
        Ok(StepOutput {
            conditioning: Tensor::zeros((1, self.latent_dim), DType::F32, &device)?,
            eos_logit,
            state,
        })
    }
}

fn scalar_i64(state: &ModelState, name: &str) -> Result<i64> {
    match state.get(name) {
        Some(tensor) => Ok(tensor.flatten_all()?.to_vec1::<i64>()?.first().copied().unwrap_or(0)),
        None => Ok(0),
    }
}

impl TextEncoder for SyntheticModel {
    fn encode(&self, token_ids: &[u32]) -> Result<Tensor> {
        Ok(Tensor::zeros(
            (1, token_ids.len(), EMBED_DIM),
            DType::F32,
            &Device::Cpu,
        )?)
    }
}

impl Conditioner for SyntheticModel {
    fn condition(&self, _sequence: &Tensor, text_embeddings: &Tensor, _state: &ModelState) -> Result<StepOutput> {
        let tokens = text_embeddings.dims().get(1).copied().unwrap_or(0);
        self.output(0, (tokens * self.frames_per_token) as i64, -10.0)
    }
}

impl StepGenerator for SyntheticModel {
    fn step(&self, _latent: &Tensor, state: &ModelState) -> Result<StepOutput> {
        if !self.step_delay.is_zero() {
            std::thread::sleep(self.step_delay);
        }
        let steps = scalar_i64(state, "state_0")?;
        let budget = scalar_i64(state, "state_1")?;
        let eos_logit = if steps + 1 >= budget { 10.0 } else { -10.0 };
        self.output(steps + 1, budget, eos_logit)
    }
}

impl Refiner for SyntheticModel {
    fn flow_direction(&self, _conditioning: &Tensor, _s: &Tensor, _t: &Tensor, x: &Tensor) -> Result<Tensor> {
        Ok(x.neg()?)
    }
}

impl Vocoder for SyntheticModel {
    fn decode(&self, latents: &Tensor, state: &ModelState) -> Result<VocoderOutput> {
        let frames = latents.dims().get(1).copied().unwrap_or(0);
        let mut phase = match state.get("state_0") {
            Some(tensor) => tensor.flatten_all()?.to_vec1::<f32>()?.first().copied().unwrap_or(0.0),
            None => 0.0,
        };
        let delta = TAU * self.frequency / self.sample_rate as f32;
        let pcm: Vec<f32> = (0..frames * self.samples_per_frame)
            .map(|_| {
                let sample = 0.2 * phase.sin();
                phase = (phase + delta) % TAU;
                sample
            })
            .collect();
        Ok(VocoderOutput {
            pcm,
            states: vec![Tensor::new(&[phase], &Device::Cpu)?],
        })
    }
}

impl VoiceEncoder for SyntheticModel {
    fn encode(&self, pcm: &Tensor) -> Result<Tensor> {
        let samples = pcm.elem_count();
        let frames = (samples / self.samples_per_frame).max(1);
        Ok(Tensor::zeros((1, frames, EMBED_DIM), DType::F32, &Device::Cpu)?)
    }
}
