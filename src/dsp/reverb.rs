//! Reverb effect — convolution with a synthetic impulse response.
//!
//! The impulse response is exponentially decaying stereo noise rather than a
//! measured room. Convolution is uniformly partitioned overlap-add: the IR is
//! cut into render-quantum-sized partitions whose spectra are precomputed, so
//! each block costs one forward FFT, one spectral multiply-accumulate per
//! partition and one inverse FFT per channel, with no added latency.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::EngineError;

// WebAudio ConvolverNode normalization constants.
const GAIN_CALIBRATION: f32 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;
const MIN_POWER: f32 = 0.000125;

/// Two channels of decaying noise, `decay` seconds long.
pub fn impulse_response(decay: f64, sample_rate: f64, seed: u64) -> [Vec<f32>; 2] {
    let len = ((decay * sample_rate) as usize).max(1);
    let time_constant = sample_rate * decay / 10.0;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut channel = || -> Vec<f32> {
        (0..len)
            .map(|i| {
                let noise: f64 = rng.gen_range(-1.0..=1.0);
                (noise * (-(i as f64) / time_constant).exp()) as f32
            })
            .collect()
    };
    let left = channel();
    let right = channel();
    [left, right]
}

/// Scale factor WebAudio applies to a normalized impulse response.
fn normalization_scale(ir: &[Vec<f32>; 2], sample_rate: f64) -> f32 {
    let len = ir[0].len().max(1);
    let energy: f32 = ir.iter().flat_map(|ch| ch.iter()).map(|s| s * s).sum();
    let mut power = (energy / (2 * len) as f32).sqrt();
    if !power.is_finite() || power < MIN_POWER {
        power = MIN_POWER;
    }
    GAIN_CALIBRATION / power * (GAIN_CALIBRATION_SAMPLE_RATE / sample_rate as f32)
}

/// Mono-in, stereo-out partitioned convolver.
pub struct Convolver {
    block_size: usize,
    fft_size: usize,
    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,
    /// Per channel, per partition IR spectra.
    ir_spectra: [Vec<Vec<Complex<f32>>>; 2],
    /// Ring of the most recent input block spectra, one per partition.
    history: Vec<Vec<Complex<f32>>>,
    head: usize,
    overlap: [Vec<f32>; 2],
    time_scratch: Vec<f32>,
    accumulator: Vec<Complex<f32>>,
}

impl std::fmt::Debug for Convolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Convolver")
            .field("block_size", &self.block_size)
            .field("partitions", &self.history.len())
            .finish()
    }
}

impl Convolver {
    /// Build a convolver for `ir`, processing blocks of `block_size` frames.
    pub fn new(
        ir: [Vec<f32>; 2],
        block_size: usize,
        sample_rate: f64,
    ) -> Result<Self, EngineError> {
        let fft_size = block_size * 2;
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(fft_size);
        let c2r = planner.plan_fft_inverse(fft_size);

        let scale = normalization_scale(&ir, sample_rate);
        let partitions = ir[0].len().div_ceil(block_size).max(1);

        let spectra_for = |channel: &[f32]| -> Result<Vec<Vec<Complex<f32>>>, EngineError> {
            let mut out = Vec::with_capacity(partitions);
            for p in 0..partitions {
                let start = p * block_size;
                let end = (start + block_size).min(channel.len());
                let mut padded = r2c.make_input_vec();
                for (dst, src) in padded.iter_mut().zip(&channel[start.min(end)..end]) {
                    *dst = src * scale;
                }
                let mut spectrum = r2c.make_output_vec();
                r2c.process(&mut padded, &mut spectrum)
                    .map_err(|e| EngineError::Fft(e.to_string()))?;
                out.push(spectrum);
            }
            Ok(out)
        };
        let [left, right] = ir;
        let ir_spectra = [spectra_for(&left)?, spectra_for(&right)?];

        let spectrum_len = fft_size / 2 + 1;
        Ok(Convolver {
            block_size,
            fft_size,
            history: vec![vec![Complex::new(0.0, 0.0); spectrum_len]; partitions],
            head: 0,
            overlap: [vec![0.0; block_size], vec![0.0; block_size]],
            time_scratch: vec![0.0; fft_size],
            accumulator: vec![Complex::new(0.0, 0.0); spectrum_len],
            r2c,
            c2r,
            ir_spectra,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Convolve one block. All slices must be `block_size` long.
    pub fn process_block(
        &mut self,
        input: &[f32],
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) -> Result<(), EngineError> {
        let b = self.block_size;
        self.time_scratch[..b].copy_from_slice(&input[..b]);
        self.time_scratch[b..].fill(0.0);
        self.r2c
            .process(&mut self.time_scratch, &mut self.history[self.head])
            .map_err(|e| EngineError::Fft(e.to_string()))?;

        let partitions = self.history.len();
        let norm = 1.0 / self.fft_size as f32;
        let last = self.accumulator.len() - 1;

        for (ch, out) in [out_left, out_right].into_iter().enumerate() {
            self.accumulator.fill(Complex::new(0.0, 0.0));
            for p in 0..partitions {
                let x = &self.history[(self.head + partitions - p) % partitions];
                let h = &self.ir_spectra[ch][p];
                for ((acc, xv), hv) in self.accumulator.iter_mut().zip(x).zip(h) {
                    *acc += xv * hv;
                }
            }
            // A real signal's DC and Nyquist bins carry no imaginary part.
            self.accumulator[0].im = 0.0;
            self.accumulator[last].im = 0.0;
            self.c2r
                .process(&mut self.accumulator, &mut self.time_scratch)
                .map_err(|e| EngineError::Fft(e.to_string()))?;

            let overlap = &mut self.overlap[ch];
            for i in 0..b {
                out[i] = self.time_scratch[i] * norm + overlap[i];
                overlap[i] = self.time_scratch[b + i] * norm;
            }
        }

        self.head = (self.head + 1) % partitions;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 128;

    #[test]
    fn impulse_response_decays() {
        let [left, right] = impulse_response(0.5, 44100.0, 9);
        assert_eq!(left.len(), 22050);
        assert_eq!(right.len(), 22050);
        let head: f32 = left[..2000].iter().map(|s| s.abs()).sum();
        let tail: f32 = left[20050..].iter().map(|s| s.abs()).sum();
        assert!(head > tail * 100.0, "IR should decay: head {head}, tail {tail}");
        assert_ne!(left, right, "Channels should be decorrelated");
    }

    #[test]
    fn impulse_reproduces_scaled_ir() {
        // Convolving a unit impulse must return the (normalized) IR itself.
        let ir = [vec![1.0, 0.5, 0.25, 0.0], vec![0.0, 1.0, 0.0, 0.0]];
        let scale = normalization_scale(&ir, 44100.0);
        let mut conv = Convolver::new(ir, BLOCK, 44100.0).unwrap();

        let mut input = vec![0.0_f32; BLOCK];
        input[0] = 1.0;
        let mut l = vec![0.0_f32; BLOCK];
        let mut r = vec![0.0_f32; BLOCK];
        conv.process_block(&input, &mut l, &mut r).unwrap();

        let tol = scale * 1e-3;
        assert!((l[0] - scale).abs() < tol, "got {}, expected {scale}", l[0]);
        assert!((l[1] - 0.5 * scale).abs() < tol);
        assert!((l[2] - 0.25 * scale).abs() < tol);
        assert!(l[3].abs() < tol);
        assert!(r[0].abs() < tol);
        assert!((r[1] - scale).abs() < tol);
    }

    #[test]
    fn tail_spans_multiple_blocks() {
        let ir = impulse_response(0.1, 44100.0, 4);
        let mut conv = Convolver::new(ir, BLOCK, 44100.0).unwrap();

        let mut input = vec![0.0_f32; BLOCK];
        input[0] = 1.0;
        let mut l = vec![0.0_f32; BLOCK];
        let mut r = vec![0.0_f32; BLOCK];
        conv.process_block(&input, &mut l, &mut r).unwrap();

        input[0] = 0.0;
        let mut late_energy = 0.0_f32;
        for _ in 0..10 {
            conv.process_block(&input, &mut l, &mut r).unwrap();
            late_energy += l.iter().chain(r.iter()).map(|s| s * s).sum::<f32>();
        }
        assert!(late_energy > 0.0, "Reverb tail should continue after the impulse block");
    }

    #[test]
    fn silence_in_silence_out() {
        let ir = impulse_response(0.05, 44100.0, 5);
        let mut conv = Convolver::new(ir, BLOCK, 44100.0).unwrap();
        let input = vec![0.0_f32; BLOCK];
        let mut l = vec![1.0_f32; BLOCK];
        let mut r = vec![1.0_f32; BLOCK];
        conv.process_block(&input, &mut l, &mut r).unwrap();
        assert!(l.iter().chain(r.iter()).all(|s| s.abs() < 1e-6));
    }
}
