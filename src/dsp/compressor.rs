//! Compressor — feed-forward dynamics on a stereo pair.
//!
//! Threshold/ratio/knee/attack/release follow the WebAudio
//! DynamicsCompressorNode parameter ranges.

const KNEE_DB: f64 = 6.0;

#[inline]
fn linear_to_db(linear: f64) -> f64 {
    if linear <= 1e-6 { -120.0 } else { 20.0 * linear.log10() }
}

#[inline]
fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

#[derive(Debug, Clone)]
pub struct Compressor {
    threshold: f64,
    ratio: f64,
    attack_coef: f64,
    release_coef: f64,
    /// Peak detector state (linear).
    envelope: f64,
}

impl Compressor {
    pub fn new(sample_rate: f64, threshold: f64, ratio: f64, attack: f64, release: f64) -> Self {
        let attack = attack.clamp(0.0001, 1.0);
        let release = release.clamp(0.001, 5.0);
        Compressor {
            threshold: threshold.clamp(-100.0, 0.0),
            ratio: ratio.clamp(1.0, 20.0),
            attack_coef: (-1.0 / (attack * sample_rate)).exp(),
            release_coef: (-1.0 / (release * sample_rate)).exp(),
            envelope: 0.0,
        }
    }

    /// Gain reduction in dB (≤ 0) for a detector level in dB, soft knee.
    fn gain_reduction(&self, level_db: f64) -> f64 {
        let slope = 1.0 - 1.0 / self.ratio;
        let over = level_db - self.threshold;
        if over <= -KNEE_DB / 2.0 {
            0.0
        } else if over >= KNEE_DB / 2.0 {
            -over * slope
        } else {
            let x = over + KNEE_DB / 2.0;
            -slope * x * x / (2.0 * KNEE_DB)
        }
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let level = left.abs().max(right.abs()) as f64;
        let coef = if level > self.envelope {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.envelope = coef * self.envelope + (1.0 - coef) * level;

        let gain = db_to_linear(self.gain_reduction(linear_to_db(self.envelope))) as f32;
        (left * gain, right * gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_signal_passes_unchanged() {
        let mut comp = Compressor::new(44100.0, -20.0, 4.0, 0.001, 0.1);
        let mut out = (0.0, 0.0);
        for _ in 0..2000 {
            out = comp.process(0.02, 0.02);
        }
        assert!((out.0 - 0.02).abs() < 1e-4, "Below threshold should pass, got {}", out.0);
    }

    #[test]
    fn loud_signal_is_reduced_by_ratio() {
        let mut comp = Compressor::new(44100.0, -12.0, 4.0, 0.001, 0.1);
        let mut out = (0.0, 0.0);
        for _ in 0..5000 {
            out = comp.process(1.0, 1.0);
        }
        // 12 dB over a 4:1 threshold → 9 dB of reduction.
        let expected = db_to_linear(-9.0) as f32;
        assert!(
            (out.0 - expected).abs() < 0.02,
            "Expected about {expected}, got {}",
            out.0
        );
    }

    #[test]
    fn ratio_one_is_transparent() {
        let mut comp = Compressor::new(44100.0, -40.0, 1.0, 0.003, 0.25);
        for _ in 0..1000 {
            let (l, r) = comp.process(0.9, -0.9);
            assert!((l - 0.9).abs() < 1e-6 && (r + 0.9).abs() < 1e-6);
        }
    }

    #[test]
    fn knee_is_continuous() {
        let comp = Compressor::new(44100.0, -20.0, 8.0, 0.003, 0.25);
        let below = comp.gain_reduction(-20.0 - KNEE_DB / 2.0 - 1e-9);
        let at_low = comp.gain_reduction(-20.0 - KNEE_DB / 2.0);
        let at_high = comp.gain_reduction(-20.0 + KNEE_DB / 2.0);
        let above = comp.gain_reduction(-20.0 + KNEE_DB / 2.0 + 1e-9);
        assert!((below - at_low).abs() < 1e-6);
        assert!((above - at_high).abs() < 1e-6);
    }
}
