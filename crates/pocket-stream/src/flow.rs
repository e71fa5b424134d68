//! Latent refinement: Gaussian noise integrated along the predicted flow

use crate::error::{Result, SynthesisError};
use crate::ports::Refiner;
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seedable Gaussian noise for the refinement start point
pub struct NoiseSource {
    rng: StdRng,
    std: f32,
}

impl NoiseSource {
    pub fn new(temperature: f32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            std: temperature.max(0.0).sqrt(),
        }
    }

    /// Box-Muller sample per dimension, scaled by sqrt(temperature).
    pub fn sample(&mut self, dim: usize) -> Vec<f32> {
        (0..dim)
            .map(|_| {
                let u = self.nonzero_uniform();
                let v = self.nonzero_uniform();
                let z = (-2.0 * u.ln()).sqrt() * (2.0 * std::f64::consts::PI * v).cos();
                z as f32 * self.std
            })
            .collect()
    }

    fn nonzero_uniform(&mut self) -> f64 {
        loop {
            let u: f64 = self.rng.random();
            if u > 0.0 {
                return u;
            }
        }
    }
}

/// Euler integration of `x` from s=0 to t=1 in `steps` equal intervals.
///
/// Returns the refined latent as a flat vector.
pub fn refine(
    refiner: &dyn Refiner,
    conditioning: &Tensor,
    mut x: Vec<f32>,
    steps: usize,
) -> Result<Vec<f32>> {
    let steps = steps.max(1);
    let dim = x.len();
    let dt = 1.0 / steps as f32;
    let device = Device::Cpu;

    for j in 0..steps {
        let s = j as f32 / steps as f32;
        let t = s + dt;
        let s = Tensor::from_vec(vec![s], (1, 1), &device)?;
        let t = Tensor::from_vec(vec![t], (1, 1), &device)?;
        let xt = Tensor::from_vec(x.clone(), (1, dim), &device)?;

        let direction = refiner
            .flow_direction(conditioning, &s, &t, &xt)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        if direction.len() != dim {
            return Err(SynthesisError::contract(
                "refiner",
                format!("flow_dir has {} values, expected {}", direction.len(), dim),
            ));
        }
        for (xi, vi) in x.iter_mut().zip(&direction) {
            *xi += vi * dt;
        }
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Constant direction, records the (s, t) pairs it was called with
    struct ConstantFlow {
        value: f32,
        calls: Mutex<Vec<(f32, f32)>>,
    }

    impl Refiner for ConstantFlow {
        fn flow_direction(&self, _c: &Tensor, s: &Tensor, t: &Tensor, x: &Tensor) -> Result<Tensor> {
            let s = s.flatten_all()?.to_vec1::<f32>()?[0];
            let t = t.flatten_all()?.to_vec1::<f32>()?[0];
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((s, t));
            }
            Ok(x.ones_like()?.affine(self.value as f64, 0.0)?)
        }
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let a = NoiseSource::new(0.7, Some(42)).sample(32);
        let b = NoiseSource::new(0.7, Some(42)).sample(32);
        let c = NoiseSource::new(0.7, Some(43)).sample(32);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_zero_temperature_gives_zero_noise() {
        let noise = NoiseSource::new(0.0, Some(1)).sample(8);
        assert!(noise.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_refine_integrates_direction() -> anyhow::Result<()> {
        let flow = ConstantFlow {
            value: 2.0,
            calls: Mutex::new(Vec::new()),
        };
        let c = Tensor::zeros((1, 4), candle_core::DType::F32, &Device::Cpu)?;
        let out = refine(&flow, &c, vec![1.0; 4], 4)?;
        for v in out {
            assert!((v - 3.0).abs() < 1e-5);
        }
        let calls = flow.calls.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(calls.len(), 4);
        assert!((calls[0].0 - 0.0).abs() < 1e-6);
        assert!((calls[3].1 - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_refine_rejects_wrong_width() -> anyhow::Result<()> {
        struct Narrow;
        impl Refiner for Narrow {
            fn flow_direction(&self, _c: &Tensor, _s: &Tensor, _t: &Tensor, _x: &Tensor) -> Result<Tensor> {
                Ok(Tensor::zeros((1, 2), candle_core::DType::F32, &Device::Cpu)?)
            }
        }
        let c = Tensor::zeros((1, 4), candle_core::DType::F32, &Device::Cpu)?;
        let err = refine(&Narrow, &c, vec![0.0; 4], 1).unwrap_err();
        assert!(err.is_fatal());
        Ok(())
    }
}
