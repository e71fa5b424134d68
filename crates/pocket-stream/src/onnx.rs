//! ONNX Runtime backed model ports
//!
//! Loads the exported Pocket TTS graphs:
//!
//! | file | port | inputs | outputs |
//! |------|------|--------|---------|
//! | `text_conditioner.onnx` | `TextEncoder` | `token_ids` | embeddings |
//! | `flow_lm_main.onnx` | `Conditioner`, `StepGenerator` | `sequence`, `text_embeddings`, `state_*` | `conditioning`, `eos_logit`, `out_state_*` |
//! | `flow_lm_flow.onnx` | `Refiner` | `c`, `s`, `t`, `x` | `flow_dir` |
//! | `mimi_decoder.onnx` | `Vocoder` | `latent`, `state_*` | audio, then states in slot order |
//! | `mimi_encoder.onnx` | `VoiceEncoder` | `audio` | embedding |

use crate::error::{Result, SynthesisError};
use crate::ports::{
    Conditioner, ModelPorts, Refiner, StepGenerator, StepOutput, TextEncoder, Vocoder,
    VocoderOutput, VoiceEncoder,
};
use crate::state::ModelState;
use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::value::{DynValue, Tensor as OrtTensor, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub const TEXT_CONDITIONER: &str = "text_conditioner.onnx";
pub const FLOW_LM_MAIN: &str = "flow_lm_main.onnx";
pub const FLOW_LM_FLOW: &str = "flow_lm_flow.onnx";
pub const MIMI_DECODER: &str = "mimi_decoder.onnx";
pub const MIMI_ENCODER: &str = "mimi_encoder.onnx";

type Inputs = Vec<(String, SessionInputValue<'static>)>;

/// One loaded graph. `Session::run` needs exclusive access.
struct OnnxModel {
    port: &'static str,
    session: Mutex<Session>,
    outputs: Vec<String>,
}

impl OnnxModel {
    fn load(path: &Path, port: &'static str, threads: usize) -> anyhow::Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads.max(1))?
            .commit_from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        let outputs: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        debug!(port, model = %path.display(), inputs = session.inputs.len(), outputs = outputs.len(), "loaded onnx model");
        Ok(Self {
            port,
            session: Mutex::new(session),
            outputs,
        })
    }

    /// Run the graph and convert every output, in declaration order.
    fn run(&self, inputs: Inputs) -> Result<Vec<(String, Tensor)>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| SynthesisError::backend(self.port, "session lock poisoned"))?;
        let outputs = session
            .run(inputs)
            .map_err(|e| SynthesisError::backend(self.port, e))?;
        self.outputs
            .iter()
            .map(|name| {
                let value = outputs.get(name.as_str()).ok_or_else(|| {
                    SynthesisError::contract(self.port, format!("missing output {}", name))
                })?;
                Ok((name.clone(), to_candle(value, self.port)?))
            })
            .collect()
    }
}

fn dims(shape: &[i64]) -> Vec<usize> {
    shape.iter().map(|&d| d.max(0) as usize).collect()
}

fn to_candle(value: &DynValue, port: &'static str) -> Result<Tensor> {
    let device = Device::Cpu;
    if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
        return Ok(Tensor::from_vec(data.to_vec(), dims(&shape), &device)?);
    }
    if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
        return Ok(Tensor::from_vec(data.to_vec(), dims(&shape), &device)?);
    }
    if let Ok((shape, data)) = value.try_extract_tensor::<bool>() {
        let bytes: Vec<u8> = data.iter().map(|b| *b as u8).collect();
        return Ok(Tensor::from_vec(bytes, dims(&shape), &device)?);
    }
    Err(SynthesisError::contract(port, "output is not a f32, i64 or bool tensor"))
}

fn to_ort(tensor: &Tensor, port: &'static str) -> Result<SessionInputValue<'static>> {
    let shape = tensor.dims().to_vec();
    let flat = tensor.flatten_all()?;
    let backend = |e: ort::Error| SynthesisError::backend(port, e);
    let value: DynValue = match tensor.dtype() {
        DType::F32 => Value::from(OrtTensor::from_array((shape, flat.to_vec1::<f32>()?)).map_err(backend)?),
        DType::I64 => Value::from(OrtTensor::from_array((shape, flat.to_vec1::<i64>()?)).map_err(backend)?),
        DType::U8 => {
            let data: Vec<bool> = flat.to_vec1::<u8>()?.into_iter().map(|v| v != 0).collect();
            Value::from(OrtTensor::from_array((shape, data)).map_err(backend)?)
        }
        other => {
            return Err(SynthesisError::contract(
                port,
                format!("unsupported input dtype {:?}", other),
            ));
        }
    };
    Ok(SessionInputValue::Owned(value))
}

fn state_inputs(inputs: &mut Inputs, state: &ModelState, port: &'static str) -> Result<()> {
    for (name, tensor) in state {
        inputs.push((name.clone(), to_ort(tensor, port)?));
    }
    Ok(())
}

pub struct OnnxTextEncoder {
    model: OnnxModel,
}

impl TextEncoder for OnnxTextEncoder {
    fn encode(&self, token_ids: &[u32]) -> Result<Tensor> {
        let ids: Vec<i64> = token_ids.iter().map(|&id| id as i64).collect();
        let n = ids.len();
        let ids = Tensor::from_vec(ids, (1, n), &Device::Cpu)?;
        let inputs = vec![("token_ids".to_string(), to_ort(&ids, self.model.port)?)];
        self.model
            .run(inputs)?
            .into_iter()
            .next()
            .map(|(_, t)| t)
            .ok_or_else(|| SynthesisError::contract(self.model.port, "no outputs"))
    }
}

/// `flow_lm_main` serves both conditioning passes and autoregressive steps.
pub struct OnnxFlowLm {
    model: OnnxModel,
    latent_dim: usize,
    text_embed_dim: usize,
}

impl OnnxFlowLm {
    fn run_main(&self, sequence: &Tensor, text_embeddings: &Tensor, state: &ModelState) -> Result<StepOutput> {
        let port = self.model.port;
        let mut inputs = vec![
            ("sequence".to_string(), to_ort(sequence, port)?),
            ("text_embeddings".to_string(), to_ort(text_embeddings, port)?),
        ];
        state_inputs(&mut inputs, state, port)?;

        let mut conditioning = None;
        let mut eos_logit = None;
        let mut new_state = ModelState::new();
        for (name, tensor) in self.model.run(inputs)? {
            match name.as_str() {
                "conditioning" => conditioning = Some(tensor),
                "eos_logit" => eos_logit = tensor.flatten_all()?.to_vec1::<f32>()?.first().copied(),
                n if n.starts_with("out_state_") => {
                    new_state.insert(name, tensor);
                }
                _ => {}
            }
        }
        Ok(StepOutput {
            conditioning: conditioning
                .ok_or_else(|| SynthesisError::contract(port, "no conditioning output"))?,
            eos_logit: eos_logit.ok_or_else(|| SynthesisError::contract(port, "no eos_logit output"))?,
            state: new_state,
        })
    }
}

impl Conditioner for OnnxFlowLm {
    fn condition(&self, sequence: &Tensor, text_embeddings: &Tensor, state: &ModelState) -> Result<StepOutput> {
        self.run_main(sequence, text_embeddings, state)
    }
}

impl StepGenerator for OnnxFlowLm {
    fn step(&self, latent: &Tensor, state: &ModelState) -> Result<StepOutput> {
        if latent.dims().last() != Some(&self.latent_dim) {
            return Err(SynthesisError::contract(
                self.model.port,
                format!("latent has shape {:?}", latent.dims()),
            ));
        }
        let empty = Tensor::zeros((1, 0, self.text_embed_dim), DType::F32, &Device::Cpu)?;
        self.run_main(latent, &empty, state)
    }
}

pub struct OnnxFlow {
    model: OnnxModel,
}

impl Refiner for OnnxFlow {
    fn flow_direction(&self, conditioning: &Tensor, s: &Tensor, t: &Tensor, x: &Tensor) -> Result<Tensor> {
        let port = self.model.port;
        let inputs = vec![
            ("c".to_string(), to_ort(conditioning, port)?),
            ("s".to_string(), to_ort(s, port)?),
            ("t".to_string(), to_ort(t, port)?),
            ("x".to_string(), to_ort(x, port)?),
        ];
        self.model
            .run(inputs)?
            .into_iter()
            .find(|(name, _)| name == "flow_dir")
            .map(|(_, t)| t)
            .ok_or_else(|| SynthesisError::contract(port, "no flow_dir output"))
    }
}

pub struct OnnxMimiDecoder {
    model: OnnxModel,
}

impl Vocoder for OnnxMimiDecoder {
    fn decode(&self, latents: &Tensor, state: &ModelState) -> Result<VocoderOutput> {
        let port = self.model.port;
        let mut inputs = vec![("latent".to_string(), to_ort(latents, port)?)];
        state_inputs(&mut inputs, state, port)?;

        let mut outputs = self.model.run(inputs)?.into_iter();
        let (_, audio) = outputs
            .next()
            .ok_or_else(|| SynthesisError::contract(port, "no audio output"))?;
        Ok(VocoderOutput {
            pcm: audio.flatten_all()?.to_vec1::<f32>()?,
            states: outputs.map(|(_, t)| t).collect(),
        })
    }
}

pub struct OnnxMimiEncoder {
    model: OnnxModel,
}

impl VoiceEncoder for OnnxMimiEncoder {
    fn encode(&self, pcm: &Tensor) -> Result<Tensor> {
        let inputs = vec![("audio".to_string(), to_ort(pcm, self.model.port)?)];
        self.model
            .run(inputs)?
            .into_iter()
            .next()
            .map(|(_, t)| t)
            .ok_or_else(|| SynthesisError::contract(self.model.port, "no embedding output"))
    }
}

/// Load every graph from `dir`. The voice encoder is optional.
pub fn load_onnx_ports(
    dir: &Path,
    threads: usize,
    latent_dim: usize,
    text_embed_dim: usize,
) -> anyhow::Result<ModelPorts> {
    let load = |file: &str, port: &'static str| OnnxModel::load(&dir.join(file), port, threads);

    let text_encoder = Arc::new(OnnxTextEncoder {
        model: load(TEXT_CONDITIONER, "text_encoder")?,
    });
    let flow_lm = Arc::new(OnnxFlowLm {
        model: load(FLOW_LM_MAIN, "step_generator")?,
        latent_dim,
        text_embed_dim,
    });
    let refiner = Arc::new(OnnxFlow {
        model: load(FLOW_LM_FLOW, "refiner")?,
    });
    let vocoder = Arc::new(OnnxMimiDecoder {
        model: load(MIMI_DECODER, "vocoder")?,
    });

    let mut ports = ModelPorts::new(text_encoder, flow_lm.clone(), flow_lm, refiner, vocoder);
    let encoder_path = dir.join(MIMI_ENCODER);
    if encoder_path.exists() {
        ports = ports.with_voice_encoder(Arc::new(OnnxMimiEncoder {
            model: OnnxModel::load(&encoder_path, "voice_encoder", threads)?,
        }));
    } else {
        info!(path = %encoder_path.display(), "no voice encoder, reference audio disabled");
    }
    Ok(ports)
}
