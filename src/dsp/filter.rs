//! Biquad filter — the response shapes of WebAudio's BiquadFilterNode.
//!
//! Coefficients follow the RBJ Audio EQ Cookbook; shelves use slope 1.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

const MIN_FREQUENCY: f64 = 10.0;
const MIN_Q: f64 = 1e-4;
const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
    Peaking,
    Lowshelf,
    Highshelf,
}

/// Normalized transfer function: `b` feed-forward, `a` feedback (a0 = 1).
#[derive(Debug, Clone, Copy, PartialEq)]
struct Coefficients {
    b: [f64; 3],
    a: [f64; 2],
}

impl Coefficients {
    fn design(kind: FilterType, sample_rate: f64, frequency: f64, q: f64, gain_db: f64) -> Self {
        let frequency = frequency.clamp(MIN_FREQUENCY, sample_rate * 0.495);
        let (sin, cos) = (TAU * frequency / sample_rate).sin_cos();
        let alpha = sin / (2.0 * q.max(MIN_Q));
        let amp = 10.0_f64.powf(gain_db / 40.0);
        let resonant = [1.0 + alpha, -2.0 * cos, 1.0 - alpha];

        let (b, a) = match kind {
            FilterType::Lowpass => {
                let k = 1.0 - cos;
                ([k / 2.0, k, k / 2.0], resonant)
            }
            FilterType::Highpass => {
                let k = 1.0 + cos;
                ([k / 2.0, -k, k / 2.0], resonant)
            }
            FilterType::Bandpass => ([alpha, 0.0, -alpha], resonant),
            FilterType::Notch => ([1.0, -2.0 * cos, 1.0], resonant),
            FilterType::Peaking => (
                [1.0 + alpha * amp, -2.0 * cos, 1.0 - alpha * amp],
                [1.0 + alpha / amp, -2.0 * cos, 1.0 - alpha / amp],
            ),
            FilterType::Lowshelf => shelf(amp, sin, cos, 1.0),
            FilterType::Highshelf => shelf(amp, sin, cos, -1.0),
        };

        let a0 = a[0];
        Coefficients {
            b: [b[0] / a0, b[1] / a0, b[2] / a0],
            a: [a[1] / a0, a[2] / a0],
        }
    }
}

/// A high shelf is the low shelf mirrored around Nyquist/2 (`side` = -1).
fn shelf(amp: f64, sin: f64, cos: f64, side: f64) -> ([f64; 3], [f64; 3]) {
    let c = side * cos;
    let k = amp.sqrt() * sin * std::f64::consts::SQRT_2;
    let (up, down) = (amp + 1.0, amp - 1.0);
    (
        [
            amp * (up - down * c + k),
            2.0 * side * amp * (down - up * c),
            amp * (up - down * c - k),
        ],
        [
            up + down * c + k,
            -2.0 * side * (down + up * c),
            up + down * c - k,
        ],
    )
}

/// Second-order IIR section, transposed direct form II.
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    pub filter_type: FilterType,
    sample_rate: f64,
    frequency: f64,
    q: f64,
    gain_db: f64,
    coeffs: Coefficients,
    state: [f64; 2],
    stale: bool,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, sample_rate: f64) -> Self {
        BiquadFilter::eq_band(filter_type, sample_rate, 1000.0, BUTTERWORTH_Q, 0.0)
    }

    pub fn with_params(filter_type: FilterType, sample_rate: f64, frequency: f64, q: f64) -> Self {
        BiquadFilter::eq_band(filter_type, sample_rate, frequency, q, 0.0)
    }

    /// A filter with a gain, for the peaking and shelf types.
    pub fn eq_band(
        filter_type: FilterType,
        sample_rate: f64,
        frequency: f64,
        q: f64,
        gain_db: f64,
    ) -> Self {
        BiquadFilter {
            filter_type,
            sample_rate,
            frequency,
            q,
            gain_db,
            coeffs: Coefficients::design(filter_type, sample_rate, frequency, q, gain_db),
            state: [0.0; 2],
            stale: false,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn q(&self) -> f64 {
        self.q
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        if self.stale {
            self.coeffs = Coefficients::design(
                self.filter_type,
                self.sample_rate,
                self.frequency,
                self.q,
                self.gain_db,
            );
            self.stale = false;
        }
        let Coefficients { b, a } = self.coeffs;
        let out = b[0] * input + self.state[0];
        self.state[0] = b[1] * input - a[0] * out + self.state[1];
        self.state[1] = b[2] * input - a[1] * out;
        out
    }

    pub fn reset(&mut self) {
        self.state = [0.0; 2];
    }

    /// Retune. Coefficients are only redesigned when the value changes, so
    /// a held cutoff costs nothing per sample.
    pub fn set_frequency(&mut self, frequency: f64) {
        if frequency != self.frequency {
            self.frequency = frequency;
            self.stale = true;
        }
    }

    pub fn set_q(&mut self, q: f64) {
        if q != self.q {
            self.q = q;
            self.stale = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 44100.0;

    fn settle(f: &mut BiquadFilter, input: f64, n: usize) -> f64 {
        (0..n).fold(0.0, |_, _| f.process(input))
    }

    /// Steady-state amplitude of a sine at `hz` after the filter.
    fn response(f: &mut BiquadFilter, hz: f64) -> f64 {
        f.reset();
        let mut peak = 0.0_f64;
        for i in 0..8820 {
            let out = f.process((TAU * hz * i as f64 / SR).sin());
            if i > 4410 {
                peak = peak.max(out.abs());
            }
        }
        peak
    }

    #[test]
    fn lowpass_keeps_bass_and_drops_fizz() {
        let mut f = BiquadFilter::with_params(FilterType::Lowpass, SR, 800.0, BUTTERWORTH_Q);
        assert!((settle(&mut f, 1.0, 2000) - 1.0).abs() < 1e-3, "DC passes");
        assert!(response(&mut f, 8000.0) < 0.02, "8 kHz is 3+ octaves above cutoff");
    }

    #[test]
    fn hat_highpass_removes_rumble() {
        let mut f = BiquadFilter::with_params(FilterType::Highpass, SR, 7000.0, 1.0);
        assert!(settle(&mut f, 1.0, 2000).abs() < 1e-3);
        assert!(response(&mut f, 100.0) < 1e-3);
        assert!(response(&mut f, 15000.0) > 0.9);
    }

    #[test]
    fn notch_nulls_its_centre() {
        let mut f = BiquadFilter::with_params(FilterType::Notch, SR, 1000.0, 5.0);
        assert!(response(&mut f, 1000.0) < 0.02);
        assert!(response(&mut f, 200.0) > 0.9);
    }

    #[test]
    fn bandpass_peaks_at_centre() {
        let mut f = BiquadFilter::with_params(FilterType::Bandpass, SR, 2000.0, 2.0);
        let centre = response(&mut f, 2000.0);
        assert!((centre - 1.0).abs() < 0.05, "unity at centre, got {centre}");
        assert!(response(&mut f, 200.0) < 0.2);
    }

    #[test]
    fn shelves_scale_their_side_only() {
        let boost = 10.0_f64.powf(6.0 / 20.0);
        let mut low = BiquadFilter::eq_band(FilterType::Lowshelf, SR, 320.0, 1.0, 6.0);
        assert!((settle(&mut low, 1.0, 5000) - boost).abs() < 0.01);

        let mut high = BiquadFilter::eq_band(FilterType::Highshelf, SR, 3200.0, 1.0, 6.0);
        assert!((settle(&mut high, 1.0, 5000) - 1.0).abs() < 0.01, "DC untouched");
        assert!((response(&mut high, 16000.0) - boost).abs() < 0.1);
    }

    #[test]
    fn peaking_with_zero_gain_is_transparent() {
        let mut f = BiquadFilter::eq_band(FilterType::Peaking, SR, 1000.0, 0.5, 0.0);
        assert!((response(&mut f, 1000.0) - 1.0).abs() < 0.01);
    }

    #[test]
    fn retuning_takes_effect_on_the_next_sample() {
        let mut f = BiquadFilter::with_params(FilterType::Lowpass, SR, 8000.0, BUTTERWORTH_Q);
        let open = response(&mut f, 4000.0);
        f.set_frequency(200.0);
        assert_eq!(f.frequency(), 200.0);
        let closed = response(&mut f, 4000.0);
        assert!(open > 0.9 && closed < 0.01, "open {open}, closed {closed}");
    }

    #[test]
    fn extreme_settings_stay_finite() {
        let mut f = BiquadFilter::with_params(FilterType::Lowpass, SR, 40000.0, 0.0);
        f.set_q(30.0);
        for i in 0..5000 {
            let out = f.process(if i % 2 == 0 { 1.0 } else { -1.0 });
            assert!(out.is_finite(), "diverged at sample {i}");
        }
    }
}
