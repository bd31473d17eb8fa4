//! Anti-aliased oscillators using PolyBLEP.

use std::f64::consts::TAU;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Shape {
    /// One sample at `phase` in [0, 1), given the per-sample increment `dt`.
    fn at(self, phase: f64, dt: f64) -> f64 {
        match self {
            Shape::Sine => (TAU * phase).sin(),
            Shape::Sawtooth => 2.0 * phase - 1.0 - blep(phase, dt),
            Shape::Square => {
                let level = if phase < 0.5 { 1.0 } else { -1.0 };
                level + blep(phase, dt) - blep((phase + 0.5).fract(), dt)
            }
            // Corners only; no step to correct.
            Shape::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

/// Residual that smooths a unit step at phase 0 across one sample either side.
fn blep(phase: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }
    if phase < dt {
        let x = phase / dt;
        x + x - x * x - 1.0
    } else if phase > 1.0 - dt {
        let x = (phase - 1.0) / dt;
        x * x + x + x + 1.0
    } else {
        0.0
    }
}

/// Cents equivalent of a frequency ratio.
pub fn ratio_to_cents(ratio: f64) -> f64 {
    1200.0 * ratio.log2()
}

/// A band-limited oscillator. The frequency is supplied per sample so
/// sweeps and LFOs can drive it.
#[derive(Debug, Clone)]
pub struct Oscillator {
    pub shape: Shape,
    /// Fixed offset in cents.
    pub detune: f64,
    phase: f64,
    sample_rate: f64,
}

impl Oscillator {
    pub fn new(shape: Shape, sample_rate: f64) -> Self {
        Oscillator {
            shape,
            detune: 0.0,
            phase: 0.0,
            sample_rate,
        }
    }

    pub fn with_detune(self, cents: f64) -> Self {
        Oscillator { detune: cents, ..self }
    }

    fn increment(&self, frequency: f64) -> f64 {
        let hz = frequency * (self.detune / 1200.0).exp2();
        (hz / self.sample_rate).clamp(0.0, 0.5)
    }

    pub fn next_sample(&mut self, frequency: f64) -> f64 {
        let dt = self.increment(frequency);
        let out = self.shape.at(self.phase, dt);
        self.phase = (self.phase + dt).fract();
        out
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 44100.0;

    #[test]
    fn starts_at_the_bottom_of_the_cycle() {
        let mut sine = Oscillator::new(Shape::Sine, SR);
        assert!(sine.next_sample(440.0).abs() < 1e-12);
        let mut tri = Oscillator::new(Shape::Triangle, SR);
        assert_eq!(tri.next_sample(440.0), -1.0);
    }

    #[test]
    fn every_shape_stays_bounded() {
        for shape in [Shape::Sine, Shape::Sawtooth, Shape::Square, Shape::Triangle] {
            let mut osc = Oscillator::new(shape, SR);
            for i in 0..SR as usize {
                // Sweep 40 Hz to 10 kHz like a kick or a riser would.
                let hz = 40.0 + 10_000.0 * i as f64 / SR;
                let s = osc.next_sample(hz);
                assert!(s.abs() <= 1.5, "{shape:?} out of range: {s}");
            }
        }
    }

    #[test]
    fn square_and_saw_average_to_zero() {
        for shape in [Shape::Square, Shape::Sawtooth] {
            let mut osc = Oscillator::new(shape, SR);
            // 441 Hz: exactly 441 cycles per second.
            let mean = (0..SR as usize).map(|_| osc.next_sample(441.0)).sum::<f64>() / SR;
            assert!(mean.abs() < 0.01, "{shape:?} has DC {mean}");
        }
    }

    #[test]
    fn detune_by_an_octave_doubles_the_rate() {
        let plain = Oscillator::new(Shape::Sine, SR);
        let up = Oscillator::new(Shape::Sine, SR).with_detune(1200.0);
        assert!((up.increment(440.0) - 2.0 * plain.increment(440.0)).abs() < 1e-12);
    }

    #[test]
    fn cents_of_common_ratios() {
        assert!((ratio_to_cents(2.0) - 1200.0).abs() < 1e-9);
        let thick = ratio_to_cents(1.01);
        assert!(thick > 17.0 && thick < 17.5);
    }

    #[test]
    fn one_period_returns_to_zero() {
        let mut osc = Oscillator::new(Shape::Sine, SR);
        for _ in 0..100 {
            osc.next_sample(441.0);
        }
        assert!(osc.next_sample(441.0).abs() < 1e-6);
    }

    #[test]
    fn reset_restarts_the_cycle() {
        let mut osc = Oscillator::new(Shape::Sawtooth, SR);
        let first = osc.next_sample(100.0);
        for _ in 0..37 {
            osc.next_sample(100.0);
        }
        osc.reset();
        assert_eq!(osc.next_sample(100.0), first);
    }
}
