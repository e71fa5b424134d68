//! Voice embeddings
//!
//! Predefined voices come from a `voices.bin` table. Reference audio is
//! encoded once and cached under the SHA-256 of the prepared PCM, so
//! uploading the same clip twice skips the encoder.

use crate::audio::resample;
use crate::config::VoiceConfig;
use crate::error::{Result, SynthesisError};
use crate::ports::VoiceEncoder;
use candle_core::{Device, Tensor};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info};

/// Name under which the most recently encoded reference voice is selectable
pub const CUSTOM_VOICE: &str = "custom";

const NAME_BYTES: usize = 32;

/// Parse a `voices.bin` table.
///
/// Layout, all little endian: `u32` voice count, then per voice a 32 byte
/// NUL-padded name, `u32` frames, `u32` dim and `frames * dim` `f32` values.
pub fn parse_voices_bin(bytes: &[u8]) -> Result<Vec<(String, Tensor)>> {
    let mut reader = ByteReader { bytes, offset: 0 };
    let count = reader.u32()? as usize;
    let mut voices = Vec::with_capacity(count.min(256));

    for _ in 0..count {
        let raw = reader.take(NAME_BYTES)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(NAME_BYTES);
        let name = String::from_utf8_lossy(&raw[..end]).trim().to_string();
        let frames = reader.u32()? as usize;
        let dim = reader.u32()? as usize;
        let len = frames
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| SynthesisError::InvalidVoiceData(format!("voice '{}' is too large", name)))?;
        let data: Vec<f32> = reader
            .take(len)?
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        debug!(voice = %name, frames, dim, "loaded voice");
        voices.push((name, Tensor::from_vec(data, (1, frames, dim), &Device::Cpu)?));
    }
    Ok(voices)
}

pub fn load_voices_bin<P: AsRef<Path>>(path: P) -> Result<Vec<(String, Tensor)>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| SynthesisError::InvalidVoiceData(format!("{}: {}", path.display(), e)))?;
    parse_voices_bin(&bytes)
}

/// Serialize voices in `voices.bin` layout.
pub fn write_voices_bin(voices: &[(String, Tensor)]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&(voices.len() as u32).to_le_bytes());
    for (name, tensor) in voices {
        let mut raw = [0u8; NAME_BYTES];
        let bytes = name.as_bytes();
        let n = bytes.len().min(NAME_BYTES - 1);
        raw[..n].copy_from_slice(&bytes[..n]);
        out.extend_from_slice(&raw);

        let (_, frames, dim) = tensor.dims3()?;
        out.extend_from_slice(&(frames as u32).to_le_bytes());
        out.extend_from_slice(&(dim as u32).to_le_bytes());
        for v in tensor.flatten_all()?.to_vec1::<f32>()? {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    Ok(out)
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.offset.saturating_add(n);
        let slice = self.bytes.get(self.offset..end).ok_or_else(|| {
            SynthesisError::InvalidVoiceData(format!(
                "truncated at byte {}, wanted {} more",
                self.offset, n
            ))
        })?;
        self.offset = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Resample mono reference audio to the model rate and cap its length.
pub fn prepare_reference(
    pcm: &[f32],
    sample_rate: u32,
    target_rate: u32,
    max_secs: f32,
) -> Result<Vec<f32>> {
    if pcm.is_empty() {
        return Err(SynthesisError::InvalidVoiceData("reference audio is empty".into()));
    }
    let mut audio = resample(pcm, sample_rate, target_rate)?;
    let max_samples = (max_secs.max(0.0) * target_rate as f32) as usize;
    if max_samples > 0 && audio.len() > max_samples {
        audio.truncate(max_samples);
    }
    Ok(audio)
}

/// Content identity of prepared reference audio
pub fn reference_digest(pcm: &[f32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for sample in pcm {
        hasher.update(sample.to_le_bytes());
    }
    hasher.finalize().into()
}

fn short_id(digest: &[u8; 32]) -> String {
    let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("ref-{}", hex)
}

struct CachedVoice {
    digest: [u8; 32],
    id: String,
    embedding: Tensor,
}

pub struct VoiceBank {
    voices: Vec<(String, Tensor)>,
    default_voice: Option<String>,
    cache: VecDeque<CachedVoice>,
    cache_entries: usize,
    max_reference_secs: f32,
    custom: Option<Tensor>,
}

impl VoiceBank {
    pub fn new(voices: Vec<(String, Tensor)>, config: &VoiceConfig) -> Self {
        let default_voice = voices
            .iter()
            .find(|(name, _)| *name == config.default_voice)
            .or_else(|| voices.first())
            .map(|(name, _)| name.clone());
        Self {
            voices,
            default_voice,
            cache: VecDeque::new(),
            cache_entries: config.cache_entries.max(1),
            max_reference_secs: config.max_reference_secs,
            custom: None,
        }
    }

    pub fn empty(config: &VoiceConfig) -> Self {
        Self::new(Vec::new(), config)
    }

    pub fn names(&self) -> Vec<String> {
        self.voices.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn default_voice(&self) -> Option<&str> {
        self.default_voice.as_deref()
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Look up a predefined voice, an encoded reference by id, or `custom`.
    pub fn get(&self, name: &str) -> Result<Tensor> {
        if let Some((_, tensor)) = self.voices.iter().find(|(n, _)| n == name) {
            return Ok(tensor.clone());
        }
        if name == CUSTOM_VOICE
            && let Some(tensor) = &self.custom
        {
            return Ok(tensor.clone());
        }
        self.cache
            .iter()
            .find(|c| c.id == name)
            .map(|c| c.embedding.clone())
            .ok_or_else(|| SynthesisError::UnknownVoice(name.to_string()))
    }

    /// Encode mono reference audio, reusing a cached embedding for
    /// identical input. Returns the cache id and the embedding, which also
    /// becomes the `custom` voice.
    pub fn encode_reference(
        &mut self,
        encoder: &dyn VoiceEncoder,
        pcm: &[f32],
        sample_rate: u32,
        target_rate: u32,
    ) -> Result<(String, Tensor)> {
        let prepared = prepare_reference(pcm, sample_rate, target_rate, self.max_reference_secs)?;
        let digest = reference_digest(&prepared);

        if let Some(hit) = self.cache.iter().find(|c| c.digest == digest) {
            debug!(id = %hit.id, "reference voice cache hit");
            self.custom = Some(hit.embedding.clone());
            return Ok((hit.id.clone(), hit.embedding.clone()));
        }

        let n = prepared.len();
        let input = Tensor::from_vec(prepared, (1, 1, n), &Device::Cpu)?;
        let embedding = encoder.encode(&input)?;
        if embedding.elem_count() == 0 {
            return Err(SynthesisError::contract("voice_encoder", "empty embedding"));
        }

        let id = short_id(&digest);
        info!(id = %id, samples = n, shape = ?embedding.dims(), "encoded reference voice");
        if self.cache.len() >= self.cache_entries {
            self.cache.pop_front();
        }
        self.cache.push_back(CachedVoice {
            digest,
            id: id.clone(),
            embedding: embedding.clone(),
        });
        self.custom = Some(embedding.clone());
        Ok((id, embedding))
    }
}

impl std::fmt::Debug for VoiceBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceBank")
            .field("voices", &self.names())
            .field("default_voice", &self.default_voice)
            .field("cached", &self.cache.len())
            .finish()
    }
}
