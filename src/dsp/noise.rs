//! White noise buffer.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Independent uniform samples in [-1, 1], played back from its start.
#[derive(Debug, Clone)]
pub struct NoiseBuffer {
    samples: Vec<f32>,
}

impl NoiseBuffer {
    /// `duration` seconds of noise at `sample_rate`, generated from `seed`.
    pub fn new(duration: f64, sample_rate: f64, seed: u64) -> Self {
        let len = ((duration.max(0.0) * sample_rate) as usize).max(1);
        let mut rng = StdRng::seed_from_u64(seed);
        let samples = (0..len).map(|_| rng.gen_range(-1.0_f32..=1.0)).collect();
        NoiseBuffer { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample at playback position `index`; silent past the end.
    pub fn sample(&self, index: usize) -> f64 {
        self.samples.get(index).copied().unwrap_or(0.0) as f64
    }
}
