//! Low-frequency oscillator modulation.

use std::f64::consts::PI;

use crate::sound::{LfoTarget, SoundParameters};

/// Pitch swing at full depth, in cents.
const PITCH_CENTS: f64 = 100.0;
/// Filter swing at full depth, in octaves.
const FILTER_OCTAVES: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lfo {
    pub rate: f64,
    pub depth: f64,
    /// Starting phase in radians.
    pub phase: f64,
    pub target: LfoTarget,
}

impl Lfo {
    /// The record's LFO, or `None` when rate or depth is zero.
    pub fn from_params(params: &SoundParameters) -> Option<Lfo> {
        let rate = params.lfo_rate;
        let depth = params.lfo_depth();
        if !(rate.is_finite() && rate > 0.0 && depth > 0.0) {
            return None;
        }
        let phase = if params.lfo_phase.is_finite() {
            params.lfo_phase.to_radians()
        } else {
            0.0
        };
        Some(Lfo {
            rate,
            depth,
            phase,
            target: params.lfo_target,
        })
    }

    /// Raw LFO value in [-1, 1] at `elapsed` seconds since the voice origin.
    pub fn value(&self, elapsed: f64) -> f64 {
        (2.0 * PI * self.rate * elapsed + self.phase).sin()
    }

    /// Multiplier applied to generator frequencies.
    pub fn pitch_factor(&self, elapsed: f64) -> f64 {
        if self.target != LfoTarget::Pitch {
            return 1.0;
        }
        (2.0_f64).powf(self.value(elapsed) * self.depth * PITCH_CENTS / 1200.0)
    }

    /// Multiplier applied to the filter cutoff.
    pub fn cutoff_factor(&self, elapsed: f64) -> f64 {
        if self.target != LfoTarget::Filter {
            return 1.0;
        }
        (2.0_f64).powf(self.value(elapsed) * self.depth * FILTER_OCTAVES)
    }

    /// Multiplier applied to the main gain; dips by up to `depth`.
    pub fn gain_factor(&self, elapsed: f64) -> f64 {
        if self.target != LfoTarget::Volume {
            return 1.0;
        }
        1.0 - self.depth * (1.0 - self.value(elapsed)) * 0.5
    }

    /// Offset added to the pan position.
    pub fn pan_offset(&self, elapsed: f64) -> f64 {
        if self.target != LfoTarget::Pan {
            return 0.0;
        }
        self.value(elapsed) * self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lfo(target: LfoTarget) -> Lfo {
        let params = SoundParameters {
            lfo_rate: 1.0,
            lfo_depth: Some(1.0),
            lfo_target: target,
            ..Default::default()
        };
        Lfo::from_params(&params).unwrap()
    }

    #[test]
    fn disabled_without_rate_or_depth() {
        let p = SoundParameters::default();
        assert!(Lfo::from_params(&p).is_none());
        let p = SoundParameters {
            lfo_rate: 5.0,
            ..Default::default()
        };
        assert!(Lfo::from_params(&p).is_none());
    }

    #[test]
    fn legacy_amount_is_used_as_depth() {
        let p = SoundParameters {
            lfo_rate: 2.0,
            lfo_amount: Some(0.5),
            ..Default::default()
        };
        assert_eq!(Lfo::from_params(&p).unwrap().depth, 0.5);
    }

    #[test]
    fn only_the_target_is_modulated() {
        let l = lfo(LfoTarget::Volume);
        assert_eq!(l.pitch_factor(0.25), 1.0);
        assert_eq!(l.cutoff_factor(0.25), 1.0);
        assert_eq!(l.pan_offset(0.25), 0.0);
        // Peak of the sine: no dip. Trough: full dip.
        assert!((l.gain_factor(0.25) - 1.0).abs() < 1e-9);
        assert!(l.gain_factor(0.75).abs() < 1e-9);
    }

    #[test]
    fn pitch_swings_one_semitone_at_full_depth() {
        let l = lfo(LfoTarget::Pitch);
        let up = l.pitch_factor(0.25);
        assert!((up - 2.0_f64.powf(1.0 / 12.0)).abs() < 1e-9);
    }
}
