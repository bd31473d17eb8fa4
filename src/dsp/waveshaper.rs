//! Waveshaping distortion with 4x oversampling.

use std::f64::consts::PI;

/// Number of points in the distortion lookup table.
pub const CURVE_SIZE: usize = 44100;

const OVERSAMPLE: usize = 4;

/// Saturation curve over x ∈ [-1, 1]; steepness grows with `amount` (0..1).
pub fn distortion_curve(amount: f64) -> Vec<f32> {
    let k = amount * 100.0;
    let deg = PI / 180.0;
    (0..CURVE_SIZE)
        .map(|i| {
            let x = i as f64 * 2.0 / CURVE_SIZE as f64 - 1.0;
            ((3.0 + k) * x * 20.0 * deg / (PI + k * x.abs())) as f32
        })
        .collect()
}

/// A lookup-table waveshaper, evaluated on a 4x upsampled signal.
#[derive(Debug, Clone)]
pub struct WaveShaper {
    curve: Vec<f32>,
    previous: f64,
}

impl WaveShaper {
    pub fn new(amount: f64) -> Self {
        WaveShaper {
            curve: distortion_curve(amount),
            previous: 0.0,
        }
    }

    /// Map one sample through the curve, interpolating between table points.
    fn shape(&self, x: f64) -> f64 {
        let last = self.curve.len() - 1;
        let pos = (x.clamp(-1.0, 1.0) + 1.0) * 0.5 * last as f64;
        let i = pos.floor() as usize;
        if i >= last {
            return self.curve[last] as f64;
        }
        let frac = pos - i as f64;
        let a = self.curve[i] as f64;
        let b = self.curve[i + 1] as f64;
        a + (b - a) * frac
    }

    pub fn process(&mut self, input: f64) -> f64 {
        // Linear upsample between the previous and current input, shape each
        // sub-sample, then average back down.
        let mut acc = 0.0;
        for step in 1..=OVERSAMPLE {
            let t = step as f64 / OVERSAMPLE as f64;
            let x = self.previous + (input - self.previous) * t;
            acc += self.shape(x);
        }
        self.previous = input;
        acc / OVERSAMPLE as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_is_odd_and_bounded() {
        let curve = distortion_curve(0.5);
        assert_eq!(curve.len(), CURVE_SIZE);
        let first = curve[0];
        let last = curve[CURVE_SIZE - 1];
        assert!(first < 0.0 && last > 0.0);
        for v in &curve {
            assert!(v.is_finite() && v.abs() < 2.0, "Curve value out of bounds: {v}");
        }
    }

    #[test]
    fn more_amount_saturates_harder() {
        // Relative to its own peak, a harder curve is higher at small inputs.
        let soft = WaveShaper::new(0.1);
        let hard = WaveShaper::new(1.0);
        let ratio = |s: &WaveShaper| s.shape(0.1) / s.shape(1.0);
        assert!(ratio(&hard) > ratio(&soft));
    }

    #[test]
    fn zero_maps_to_zero() {
        let mut s = WaveShaper::new(0.7);
        for _ in 0..8 {
            assert!(s.process(0.0).abs() < 1e-3);
        }
    }
}
