//! ADSR envelope shaping.
//!
//! Envelopes are not stepped per sample; they are written as automation
//! onto an `AudioParam` once, at voice start. Sustain is a gain fraction,
//! not a time.

use super::param::AudioParam;

/// Level treated as silence at the end of exponential decays.
pub const SILENCE: f64 = 0.001;

/// ADSR envelope with linear attack/decay/release segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adsr {
    /// Attack time in seconds.
    pub attack: f64,
    /// Decay time in seconds.
    pub decay: f64,
    /// Sustain level [0, 1].
    pub sustain: f64,
    /// Release time in seconds.
    pub release: f64,
}

impl Default for Adsr {
    fn default() -> Self {
        Adsr {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.3,
        }
    }
}

impl Adsr {
    /// Instant (relative to the envelope origin) at which release begins.
    ///
    /// Release is fitted inside `duration`: it starts at `duration - release`
    /// unless that would cut into attack + decay.
    pub fn release_start(&self, duration: f64) -> f64 {
        (self.attack + self.decay).max(duration - self.release)
    }

    /// Instant (relative to the origin) at which the envelope reaches zero.
    pub fn end(&self, duration: f64) -> f64 {
        duration.max(self.attack + self.decay)
    }

    /// Write the envelope onto `param`: 0 → `peak` over attack, → `peak * sustain`
    /// over decay, hold, then → 0 by the end of `duration`.
    pub fn apply(&self, param: &mut AudioParam, origin: f64, peak: f64, duration: f64) {
        let sustain_level = peak * self.sustain;
        let attack_end = origin + self.attack;
        let decay_end = attack_end + self.decay;
        let release_start = origin + self.release_start(duration);
        let end = origin + self.end(duration);

        param.set_value_at_time(0.0, origin);
        param.linear_ramp_to_value_at_time(peak, attack_end);
        param.linear_ramp_to_value_at_time(sustain_level, decay_end);
        param.set_value_at_time(sustain_level, release_start);
        param.linear_ramp_to_value_at_time(0.0, end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shaped(adsr: Adsr, peak: f64, duration: f64) -> AudioParam {
        let mut p = AudioParam::new(0.0);
        adsr.apply(&mut p, 0.0, peak, duration);
        p
    }

    #[test]
    fn envelope_matches_reference_points() {
        let adsr = Adsr {
            attack: 0.1,
            decay: 0.2,
            sustain: 0.6,
            release: 0.3,
        };
        let p = shaped(adsr, 0.8, 1.0);
        assert_eq!(p.value_at(0.0), 0.0);
        assert!((p.value_at(0.1) - 0.8).abs() < 1e-9);
        assert!((p.value_at(0.3) - 0.48).abs() < 1e-9);
        assert!(p.value_at(1.0).abs() < 1e-9, "Envelope should be silent at duration");
    }

    #[test]
    fn sustain_holds_until_release() {
        let adsr = Adsr {
            attack: 0.01,
            decay: 0.01,
            sustain: 0.5,
            release: 0.2,
        };
        let p = shaped(adsr, 1.0, 1.0);
        assert!((p.value_at(0.5) - 0.5).abs() < 1e-9);
        assert!((p.value_at(0.8) - 0.5).abs() < 1e-9);
        assert!((p.value_at(0.9) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn long_release_never_cuts_into_decay() {
        let adsr = Adsr {
            attack: 0.1,
            decay: 0.1,
            sustain: 0.5,
            release: 5.0,
        };
        assert_eq!(adsr.release_start(1.0), 0.2);
        let p = shaped(adsr, 1.0, 1.0);
        assert!((p.value_at(0.2) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn envelope_stays_in_range() {
        let p = shaped(Adsr::default(), 1.0, 0.5);
        for i in 0..=1000 {
            let v = p.value_at(i as f64 / 1000.0);
            assert!((0.0..=1.0).contains(&v), "Envelope out of range: {v}");
        }
    }

    #[test]
    fn origin_offset_shifts_the_shape() {
        let adsr = Adsr::default();
        let mut p = AudioParam::new(0.0);
        adsr.apply(&mut p, -0.5, 1.0, 1.0);
        let q = shaped(adsr, 1.0, 1.0);
        assert!((p.value_at(0.0) - q.value_at(0.5)).abs() < 1e-12);
    }
}
