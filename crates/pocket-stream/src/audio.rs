use crate::error::{Result, SynthesisError};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::{Read, Seek, Write};
use std::path::Path;

/// Decoded WAV audio, one vector per channel
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl WavAudio {
    pub fn to_mono(&self) -> Vec<f32> {
        to_mono(&self.channels)
    }
}

pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<WavAudio> {
    let reader = WavReader::open(path)?;
    read_wav_internal(reader)
}

pub fn read_wav_from_bytes(bytes: &[u8]) -> Result<WavAudio> {
    let reader = WavReader::new(std::io::Cursor::new(bytes))?;
    read_wav_internal(reader)
}

fn read_wav_internal<R: Read + Seek>(mut reader: WavReader<R>) -> Result<WavAudio> {
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };

    let frames = interleaved.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (channel, sample) in planar.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }

    Ok(WavAudio {
        channels: planar,
        sample_rate: spec.sample_rate,
    })
}

/// Average all channels into one.
pub fn to_mono(channels: &[Vec<f32>]) -> Vec<f32> {
    match channels {
        [] => Vec::new(),
        [only] => only.clone(),
        _ => {
            let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
            let scale = 1.0 / channels.len() as f32;
            (0..frames)
                .map(|i| channels.iter().map(|c| c[i]).sum::<f32>() * scale)
                .collect()
        }
    }
}

/// 16-bit mono WAV spec used for every file this crate writes
pub fn mono_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let file = std::fs::File::create(path).map_err(|e| SynthesisError::Audio(e.to_string()))?;
    write_wav_to_writer(std::io::BufWriter::new(file), samples, sample_rate)
}

pub fn write_wav_to_writer<W: Write + Seek>(writer: W, samples: &[f32], sample_rate: u32) -> Result<()> {
    let mut wav_writer = WavWriter::new(writer, mono_spec(sample_rate))?;
    for sample in samples {
        wav_writer.write_sample(to_i16(*sample))?;
    }
    wav_writer.finalize()?;
    Ok(())
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Little-endian PCM16 bytes, as served by the streaming endpoint
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|s| to_i16(*s).to_le_bytes())
        .collect()
}

/// Resample mono audio with a septic polynomial interpolator.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err(SynthesisError::Audio(format!(
            "cannot resample {} Hz to {} Hz",
            from_rate, to_rate
        )));
    }

    use rubato::{FastFixedIn, PolynomialDegree, Resampler};

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Septic, samples.len(), 1)
            .map_err(|e| SynthesisError::Audio(e.to_string()))?;
    let mut out = resampler
        .process(&[samples], None)
        .map_err(|e| SynthesisError::Audio(e.to_string()))?;
    Ok(out.pop().unwrap_or_default())
}

/// Linear ramp from silence over the first `len` samples.
pub fn fade_in(samples: &mut [f32], len: usize) {
    let n = len.min(samples.len());
    for (i, s) in samples[..n].iter_mut().enumerate() {
        *s *= i as f32 / n as f32;
    }
}

/// Linear ramp to silence over the last `len` samples.
pub fn fade_out(samples: &mut [f32], len: usize) {
    let n = len.min(samples.len());
    let start = samples.len() - n;
    for (i, s) in samples[start..].iter_mut().enumerate() {
        *s *= 1.0 - i as f32 / n as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample() -> anyhow::Result<()> {
        let input_samples = 1024;
        let data: Vec<f32> = (0..input_samples).map(|i| (i as f32 * 0.1).sin()).collect();

        let resampled = resample(&data, 12_000, 24_000)?;
        let expected = 2048i64;
        let diff = (resampled.len() as i64 - expected).abs();
        assert!(
            diff <= 50,
            "Output samples {} deviates too much from expected {}",
            resampled.len(),
            expected
        );
        Ok(())
    }

    #[test]
    fn test_resample_same_rate_is_identity() -> anyhow::Result<()> {
        let data = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&data, 24_000, 24_000)?, data);
        Ok(())
    }

    #[test]
    fn test_wav_io() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("io.wav");
        let samples = vec![0.0f32, 0.5, -0.5, 0.1];
        write_wav(&path, &samples, 16_000)?;

        let audio = read_wav(&path)?;
        assert_eq!(audio.sample_rate, 16_000);
        assert_eq!(audio.channels.len(), 1);
        for (a, b) in audio.channels[0].iter().zip(&samples) {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
        Ok(())
    }

    #[test]
    fn test_stereo_read_and_downmix() -> anyhow::Result<()> {
        let mut bytes = std::io::Cursor::new(Vec::new());
        {
            let spec = WavSpec {
                channels: 2,
                sample_rate: 8000,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            };
            let mut writer = WavWriter::new(&mut bytes, spec)?;
            for (l, r) in [(0.2f32, 0.4f32), (-1.0, 1.0), (0.5, 0.5)] {
                writer.write_sample(l)?;
                writer.write_sample(r)?;
            }
            writer.finalize()?;
        }
        let audio = read_wav_from_bytes(bytes.get_ref())?;
        assert_eq!(audio.channels.len(), 2);
        let mono = audio.to_mono();
        assert_eq!(mono.len(), 3);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_pcm16_bytes_clamps() {
        let bytes = pcm16_bytes(&[1.5, -2.0, 0.0]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32767);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), 0);
    }

    #[test]
    fn test_fades() {
        let mut samples = vec![1.0f32; 10];
        fade_in(&mut samples, 4);
        assert_eq!(&samples[..5], &[0.0, 0.25, 0.5, 0.75, 1.0]);

        let mut samples = vec![1.0f32; 10];
        fade_out(&mut samples, 4);
        assert_eq!(&samples[6..], &[1.0, 0.75, 0.5, 0.25]);
        assert_eq!(samples[5], 1.0);
    }

    #[test]
    fn test_fade_longer_than_segment() {
        let mut samples = vec![1.0f32; 2];
        fade_in(&mut samples, 480);
        assert_eq!(samples, vec![0.0, 0.5]);
    }
}
