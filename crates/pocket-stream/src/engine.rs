//! Generation engine - drives the per-chunk autoregressive loop
//!
//! For each text chunk the engine conditions the generator on the voice and
//! the chunk text, then steps it one latent frame at a time. Every frame is
//! refined from Gaussian noise, batched, and handed to the vocoder; each
//! vocoder call becomes one `AudioSegment`.

use crate::config::GenerationConfig;
use crate::error::{Result, SynthesisError};
use crate::flow::{NoiseSource, refine};
use crate::ports::ModelPorts;
use crate::state::{ModelState, init_state, merge_ordered, merge_outputs};
use crate::text::{TextChunk, Tokenizer};
use candle_core::{DType, Device, Tensor};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    VoiceConditioned,
    TextConditioned,
    Stepping,
    Flushing,
    Done,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentMetrics {
    /// Nominal audio duration
    pub duration_sec: f64,
    /// Wall time spent stepping, refining and decoding since the previous flush
    pub gen_time_sec: f64,
    /// First segment of the utterance
    pub is_first: bool,
    /// Final segment of the final chunk
    pub is_last: bool,
    /// First segment of a text chunk
    pub chunk_start: bool,
    /// Inserted silence between chunks, excluded from RTF accounting
    pub is_silence: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub chunk_index: usize,
    pub metrics: SegmentMetrics,
}

impl AudioSegment {
    pub fn silence(len: usize, sample_rate: u32, chunk_index: usize) -> Self {
        Self {
            samples: vec![0.0; len],
            sample_rate,
            chunk_index,
            metrics: SegmentMetrics {
                duration_sec: len as f64 / sample_rate as f64,
                is_silence: true,
                ..Default::default()
            },
        }
    }
}

/// Control messages picked up at yield points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    SetQuality(usize),
    Stop,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub frames: usize,
    pub segments: usize,
    pub audio_seconds: f64,
    /// Step, refinement and decode time; conditioning excluded
    pub gen_time: f64,
    pub total_time: f64,
    pub rtfx: f64,
    pub cancelled: bool,
}

pub struct GenerationEngine {
    ports: ModelPorts,
    tokenizer: Arc<dyn Tokenizer>,
    config: GenerationConfig,
    cancel: Arc<AtomicBool>,
    quality: usize,
    state: EngineState,
    device: Device,
}

impl GenerationEngine {
    pub fn new(ports: ModelPorts, tokenizer: Arc<dyn Tokenizer>, config: GenerationConfig) -> Self {
        let quality = config.max_quality;
        Self {
            ports,
            tokenizer,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            quality,
            state: EngineState::Idle,
            device: Device::Cpu,
        }
    }

    /// Shared stop flag, observed at the top of every step.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn quality(&self) -> usize {
        self.quality
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Refinement steps for the rest of the run, clamped to [1, max].
    pub fn set_quality(&mut self, steps: usize) {
        let steps = steps.clamp(1, self.config.max_quality);
        if steps != self.quality {
            info!(from = self.quality, to = steps, "refinement steps changed");
            self.quality = steps;
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn poll_control(&mut self, control: &mut dyn FnMut() -> Option<Control>) {
        while let Some(msg) = control() {
            match msg {
                Control::SetQuality(steps) => self.set_quality(steps),
                Control::Stop => self.cancel.store(true, Ordering::SeqCst),
            }
        }
    }

    /// Synthesize all chunks of one utterance.
    ///
    /// Segments are handed to `sink` as soon as they are decoded. `control`
    /// is drained every `yield_every` steps. A stop request ends the run early
    /// with `cancelled` set; it is not an error.
    pub fn run(
        &mut self,
        voice: &Tensor,
        chunks: &[TextChunk],
        control: &mut dyn FnMut() -> Option<Control>,
        sink: &mut dyn FnMut(AudioSegment),
    ) -> Result<RunSummary> {
        if chunks.is_empty() {
            return Err(SynthesisError::EmptyInput);
        }
        let voice = as_sequence(voice, "voice")?;

        self.quality = self.config.max_quality;
        self.state = EngineState::Idle;
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let mut noise = NoiseSource::new(self.config.temperature, self.config.seed);
        let mut first_flush = true;
        let mut step_time = Duration::ZERO;
        let mut decode_time = Duration::ZERO;

        let mut gen_state = ModelState::new();
        let mut voc_state = init_state(&self.ports.vocoder_slots, &self.device)?;

        for (idx, chunk) in chunks.iter().enumerate() {
            if self.cancelled() {
                break;
            }
            let last_chunk = idx + 1 == chunks.len();

            if idx == 0 || self.config.reset_generator_state {
                gen_state = self.condition_voice(&voice)?;
            }
            if idx > 0 && self.config.reset_vocoder_state {
                voc_state = init_state(&self.ports.vocoder_slots, &self.device)?;
            }

            let ids = self.tokenizer.encode(&chunk.text)?;
            if ids.is_empty() {
                warn!(chunk = idx, "chunk produced no tokens, skipping");
                continue;
            }
            self.condition_text(&ids, &mut gen_state)?;
            debug!(chunk = idx, tokens = ids.len(), text = %chunk.text, "text conditioned");

            let outcome = self.step_chunk(
                idx,
                last_chunk,
                &mut gen_state,
                &mut voc_state,
                &mut noise,
                &mut first_flush,
                control,
                sink,
            )?;
            summary.frames += outcome.frames;
            summary.segments += outcome.segments;
            step_time += outcome.step_time;
            decode_time += outcome.decode_time;

            if outcome.stopped
                && !self.cancelled()
                && !last_chunk
                && self.config.reset_generator_state
            {
                sink(AudioSegment::silence(
                    self.config.gap_samples(),
                    self.config.sample_rate,
                    idx,
                ));
                summary.segments += 1;
            }
        }

        summary.cancelled = self.cancelled();
        self.state = if summary.cancelled {
            EngineState::Cancelled
        } else {
            EngineState::Done
        };

        summary.audio_seconds = (summary.frames * self.config.samples_per_frame) as f64
            / self.config.sample_rate as f64;
        summary.gen_time = (step_time + decode_time).as_secs_f64();
        summary.total_time = started.elapsed().as_secs_f64();
        summary.rtfx = if summary.gen_time > 0.0 {
            summary.audio_seconds / summary.gen_time
        } else {
            0.0
        };

        let mean_step_ms = if summary.frames > 0 {
            step_time.as_secs_f64() * 1000.0 / summary.frames as f64
        } else {
            0.0
        };
        info!(
            frames = summary.frames,
            audio_seconds = summary.audio_seconds,
            gen_time = summary.gen_time,
            total_time = summary.total_time,
            rtfx = summary.rtfx,
            mean_step_ms,
            decode_time = decode_time.as_secs_f64(),
            cancelled = summary.cancelled,
            "generation finished"
        );
        Ok(summary)
    }

    fn condition_voice(&mut self, voice: &Tensor) -> Result<ModelState> {
        let mut state = init_state(&self.ports.generator_slots, &self.device)?;
        let empty = self.empty_sequence()?;
        let out = self.ports.conditioner.condition(&empty, voice, &state)?;
        merge_outputs(&mut state, out.state, &self.ports.generator_slots, "conditioner")?;
        self.state = EngineState::VoiceConditioned;
        Ok(state)
    }

    fn condition_text(&mut self, ids: &[u32], state: &mut ModelState) -> Result<()> {
        let embeddings = self.ports.text_encoder.encode(ids)?;
        let embeddings = as_sequence(&embeddings, "text_encoder")?;
        let empty = self.empty_sequence()?;
        let out = self.ports.conditioner.condition(&empty, &embeddings, state)?;
        merge_outputs(state, out.state, &self.ports.generator_slots, "conditioner")?;
        self.state = EngineState::TextConditioned;
        Ok(())
    }

    fn empty_sequence(&self) -> Result<Tensor> {
        Ok(Tensor::zeros(
            (1, 0, self.config.latent_dim),
            DType::F32,
            &self.device,
        )?)
    }

    #[allow(clippy::too_many_arguments)]
    fn step_chunk(
        &mut self,
        chunk_index: usize,
        last_chunk: bool,
        gen_state: &mut ModelState,
        voc_state: &mut ModelState,
        noise: &mut NoiseSource,
        first_flush: &mut bool,
        control: &mut dyn FnMut() -> Option<Control>,
        sink: &mut dyn FnMut(AudioSegment),
    ) -> Result<ChunkOutcome> {
        let cfg = self.config.clone();
        let latent_dim = cfg.latent_dim;
        let mut outcome = ChunkOutcome::default();
        let mut latent = Tensor::full(f32::NAN, (1, 1, latent_dim), &self.device)?;
        let mut pending: Vec<f32> = Vec::with_capacity(cfg.flush_frames * latent_dim);
        let mut eos_step: Option<usize> = None;
        let mut segment_time = Duration::ZERO;
        let mut chunk_start = true;

        self.state = EngineState::Stepping;
        for step in 0..cfg.max_frames {
            if self.cancelled() {
                break;
            }
            if step > 0 && step % cfg.yield_every == 0 {
                self.poll_control(control);
                if self.cancelled() {
                    break;
                }
            }

            let started = Instant::now();
            let out = self.ports.generator.step(&latent, gen_state)?;
            if out.eos_logit > cfg.eos_threshold && eos_step.is_none() {
                eos_step = Some(step);
            }
            let eos_done = eos_step.is_some_and(|eos| step >= eos + cfg.frames_after_eos);

            let frame = refine(
                self.ports.refiner.as_ref(),
                &out.conditioning,
                noise.sample(latent_dim),
                self.quality,
            )?;
            merge_outputs(gen_state, out.state, &self.ports.generator_slots, "generator")?;
            latent = Tensor::from_vec(frame.clone(), (1, 1, latent_dim), &self.device)?;
            pending.extend_from_slice(&frame);
            outcome.frames += 1;

            let elapsed = started.elapsed();
            segment_time += elapsed;
            outcome.step_time += elapsed;

            let hit_cap = step + 1 == cfg.max_frames;
            let stop = eos_done || hit_cap;
            let pending_frames = pending.len() / latent_dim;
            let flush = stop
                || (*first_flush && pending_frames >= cfg.first_flush_frames)
                || pending_frames >= cfg.flush_frames;

            if flush && pending_frames > 0 {
                if stop {
                    self.state = EngineState::Flushing;
                }
                let started = Instant::now();
                let latents = Tensor::from_vec(
                    std::mem::take(&mut pending),
                    (1, pending_frames, latent_dim),
                    &self.device,
                )?;
                let decoded = self.ports.vocoder.decode(&latents, voc_state)?;
                merge_ordered(voc_state, decoded.states, &self.ports.vocoder_slots, "vocoder")?;
                let elapsed = started.elapsed();
                segment_time += elapsed;
                outcome.decode_time += elapsed;

                if decoded.pcm.is_empty() {
                    debug!(chunk = chunk_index, frames = pending_frames, "vocoder returned no samples");
                } else {
                    let samples = decoded.pcm;
                    sink(AudioSegment {
                        metrics: SegmentMetrics {
                            duration_sec: samples.len() as f64 / cfg.sample_rate as f64,
                            gen_time_sec: segment_time.as_secs_f64(),
                            is_first: *first_flush,
                            is_last: stop && last_chunk,
                            chunk_start,
                            is_silence: false,
                        },
                        samples,
                        sample_rate: cfg.sample_rate,
                        chunk_index,
                    });
                    outcome.segments += 1;
                    *first_flush = false;
                    chunk_start = false;
                }
                segment_time = Duration::ZERO;
            }

            if stop {
                if !eos_done {
                    warn!(chunk = chunk_index, max_frames = cfg.max_frames, "no end of speech before frame limit");
                }
                debug!(
                    chunk = chunk_index,
                    eos_step = ?eos_step,
                    stopped_at = step,
                    frames = outcome.frames,
                    "chunk finished"
                );
                outcome.stopped = true;
                break;
            }
        }
        Ok(outcome)
    }
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    frames: usize,
    segments: usize,
    step_time: Duration,
    decode_time: Duration,
    stopped: bool,
}

/// Accept `[T, D]` or `[1, T, D]` and return the batched form.
fn as_sequence(tensor: &Tensor, port: &'static str) -> Result<Tensor> {
    match tensor.rank() {
        2 => Ok(tensor.unsqueeze(0)?),
        3 => Ok(tensor.clone()),
        rank => Err(SynthesisError::contract(
            port,
            format!("expected a [1, T, D] sequence, got rank {}", rank),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{
        Conditioner, Refiner, StepGenerator, StepOutput, TextEncoder, Vocoder, VocoderOutput,
    };
    use crate::state::{SlotDType, SlotSpec};
    use crate::text::WordTokenizer;
    use std::sync::Mutex;

    const LATENT: usize = 4;
    const PCM_PER_FRAME: usize = 8;

    /// Flow model whose eos score crosses the threshold at a fixed step
    struct ScriptedFlow {
        eos_at: usize,
        steps: Mutex<usize>,
    }

    impl ScriptedFlow {
        fn output(&self, eos_logit: f32, state: &ModelState) -> Result<StepOutput> {
            let counter = state["state_0"].to_vec1::<i64>()?[0];
            let mut out = ModelState::new();
            out.insert(
                "out_state_0".to_string(),
                Tensor::new(&[counter + 1], &Device::Cpu)?,
            );
            Ok(StepOutput {
                conditioning: Tensor::zeros((1, LATENT), DType::F32, &Device::Cpu)?,
                eos_logit,
                state: out,
            })
        }
    }

    impl Conditioner for ScriptedFlow {
        fn condition(&self, _seq: &Tensor, _emb: &Tensor, state: &ModelState) -> Result<StepOutput> {
            *self.steps.lock().map_err(|_| SynthesisError::backend("flow", "poisoned"))? = 0;
            self.output(-10.0, state)
        }
    }

    impl StepGenerator for ScriptedFlow {
        fn step(&self, _latent: &Tensor, state: &ModelState) -> Result<StepOutput> {
            let mut steps = self.steps.lock().map_err(|_| SynthesisError::backend("flow", "poisoned"))?;
            let eos = if *steps >= self.eos_at { 0.0 } else { -10.0 };
            *steps += 1;
            self.output(eos, state)
        }
    }

    struct UnitFlow;
    impl Refiner for UnitFlow {
        fn flow_direction(&self, _c: &Tensor, _s: &Tensor, _t: &Tensor, x: &Tensor) -> Result<Tensor> {
            Ok(x.ones_like()?)
        }
    }

    struct Embed;
    impl TextEncoder for Embed {
        fn encode(&self, ids: &[u32]) -> Result<Tensor> {
            Ok(Tensor::zeros((ids.len(), 6), DType::F32, &Device::Cpu)?)
        }
    }

    struct Frames;
    impl Vocoder for Frames {
        fn decode(&self, latents: &Tensor, _state: &ModelState) -> Result<VocoderOutput> {
            let frames = latents.dims()[1];
            Ok(VocoderOutput {
                pcm: vec![0.5; frames * PCM_PER_FRAME],
                states: vec![Tensor::zeros((1, 2, frames), DType::F32, &Device::Cpu)?],
            })
        }
    }

    fn engine(eos_at: usize, config: GenerationConfig) -> GenerationEngine {
        let flow = Arc::new(ScriptedFlow {
            eos_at,
            steps: Mutex::new(0),
        });
        let ports = ModelPorts::new(
            Arc::new(Embed),
            flow.clone(),
            flow,
            Arc::new(UnitFlow),
            Arc::new(Frames),
        )
        .with_slots(
            vec![SlotSpec::new(0, &[1], SlotDType::I64)],
            vec![SlotSpec::new(0, &[1, 2, 0], SlotDType::F32)],
        );
        GenerationEngine::new(ports, Arc::new(WordTokenizer::new()), config)
    }

    fn test_config() -> GenerationConfig {
        GenerationConfig {
            samples_per_frame: PCM_PER_FRAME,
            sample_rate: 80,
            latent_dim: LATENT,
            max_quality: 3,
            seed: Some(7),
            ..Default::default()
        }
    }

    fn chunk(text: &str) -> TextChunk {
        TextChunk {
            text: text.to_string(),
            token_count: text.split_whitespace().count(),
            forced_split: false,
        }
    }

    fn voice() -> Tensor {
        Tensor::zeros((1, 2, 6), DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_single_chunk_flush_schedule() -> anyhow::Result<()> {
        // eos at step 20, grace of 3 frames -> 24 frames total
        let mut engine = engine(20, test_config());
        let mut segments = Vec::new();
        let summary = engine.run(&voice(), &[chunk("hello there.")], &mut || None, &mut |s| {
            segments.push(s)
        })?;

        assert_eq!(summary.frames, 24);
        let frames: Vec<usize> = segments.iter().map(|s| s.samples.len() / PCM_PER_FRAME).collect();
        assert_eq!(frames, vec![3, 12, 9]);
        assert!(segments[0].metrics.is_first && segments[0].metrics.chunk_start);
        assert!(!segments[1].metrics.is_first && !segments[1].metrics.chunk_start);
        assert!(segments[2].metrics.is_last);
        assert!(segments.iter().all(|s| !s.metrics.is_silence));
        assert_eq!(engine.state(), EngineState::Done);
        assert!((summary.audio_seconds - 24.0 * 8.0 / 80.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_multi_chunk_inserts_silence_gap() -> anyhow::Result<()> {
        let config = test_config();
        let gap = config.gap_samples();
        let mut engine = engine(0, config);
        let mut segments = Vec::new();
        engine.run(
            &voice(),
            &[chunk("one."), chunk("two.")],
            &mut || None,
            &mut |s| segments.push(s),
        )?;

        // each chunk stops after 4 frames; the first also takes the early flush
        let frames: Vec<usize> = segments.iter().map(|s| s.samples.len() / PCM_PER_FRAME).collect();
        assert_eq!(segments.len(), 4);
        assert_eq!(frames[0], 3);
        assert_eq!(frames[1], 1);
        assert!(segments[0].metrics.is_first && !segments[0].metrics.is_last);
        assert!(!segments[1].metrics.is_last);
        assert!(segments[2].metrics.is_silence);
        assert_eq!(segments[2].samples.len(), gap);
        assert!(segments[2].samples.iter().all(|v| *v == 0.0));
        assert_eq!(frames[3], 4);
        assert!(segments[3].metrics.chunk_start && segments[3].metrics.is_last);
        assert!(!segments[3].metrics.is_first);
        assert_eq!(segments[3].chunk_index, 1);
        Ok(())
    }

    #[test]
    fn test_carry_over_skips_gap() -> anyhow::Result<()> {
        let config = GenerationConfig {
            reset_generator_state: false,
            reset_vocoder_state: false,
            ..test_config()
        };
        let mut engine = engine(0, config);
        let mut segments = Vec::new();
        engine.run(
            &voice(),
            &[chunk("one."), chunk("two.")],
            &mut || None,
            &mut |s| segments.push(s),
        )?;
        assert_eq!(segments.len(), 3);
        assert!(segments.iter().all(|s| !s.metrics.is_silence));
        Ok(())
    }

    #[test]
    fn test_frame_cap_is_a_stop() -> anyhow::Result<()> {
        let config = GenerationConfig {
            max_frames: 5,
            ..test_config()
        };
        let mut engine = engine(1000, config);
        let mut segments = Vec::new();
        let summary = engine.run(&voice(), &[chunk("never ends")], &mut || None, &mut |s| {
            segments.push(s)
        })?;
        assert_eq!(summary.frames, 5);
        assert_eq!(segments.len(), 2);
        assert!(segments[1].metrics.is_last);
        Ok(())
    }

    #[test]
    fn test_stop_at_yield_point() -> anyhow::Result<()> {
        let mut engine = engine(1000, test_config());
        let mut segments = Vec::new();
        let mut polls = 0;
        let summary = engine.run(
            &voice(),
            &[chunk("a."), chunk("b.")],
            &mut || {
                polls += 1;
                (polls == 2).then_some(Control::Stop)
            },
            &mut |s| segments.push(s),
        )?;
        assert!(summary.cancelled);
        assert_eq!(engine.state(), EngineState::Cancelled);
        // stopped at step 8, before its frame was generated
        assert_eq!(summary.frames, 8);
        assert!(segments.iter().all(|s| s.chunk_index == 0));
        Ok(())
    }

    #[test]
    fn test_quality_control_is_clamped() -> anyhow::Result<()> {
        let mut engine = engine(6, test_config());
        let mut sent = false;
        engine.run(
            &voice(),
            &[chunk("x.")],
            &mut || {
                if sent {
                    return None;
                }
                sent = true;
                Some(Control::SetQuality(0))
            },
            &mut |_| {},
        )?;
        assert_eq!(engine.quality(), 1);
        engine.set_quality(99);
        assert_eq!(engine.quality(), 3);
        Ok(())
    }

    #[test]
    fn test_empty_chunks_rejected() {
        let mut engine = engine(0, test_config());
        let err = engine.run(&voice(), &[], &mut || None, &mut |_| {}).unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn test_bad_voice_rank_is_contract_error() {
        let mut engine = engine(0, test_config());
        let flat = Tensor::zeros(6, DType::F32, &Device::Cpu).unwrap();
        let err = engine
            .run(&flat, &[chunk("x.")], &mut || None, &mut |_| {})
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
