//! Sound parameter model.
//!
//! `SoundParameters` is the flat record the UI edits and the engine
//! consumes as an immutable snapshot. Every numeric knob has a default, so
//! a partially populated JSON document always hydrates into something the
//! synthesizer can play.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::dsp::delay;
use crate::dsp::envelope::Adsr;
use crate::dsp::filter::FilterType;
use crate::dsp::oscillator::Shape;

/// Current layout version of `SoundParameters`.
pub const PARAMETERS_VERSION: u32 = 1;

pub const DEFAULT_FILTER_CUTOFF: f64 = 2000.0;

/// Longest a single sound may ring, after time stretch, in seconds.
pub const MAX_SOUND_DURATION: f64 = 60.0;

// ── Archetypes ──────────────────────────────────────────────

/// Named sound category. Each archetype has its own synthesis recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SoundKind {
    BassKick,
    Snare,
    HiHat,
    Clap,
    Percussion,
    Impact,
    Bass,
    BassSynth,
    SubBass,
    Lead,
    Synth,
    Pad,
    Ambient,
    Fx,
    /// Anything else; synthesized by the generic waveform path.
    Custom,
}

impl SoundKind {
    pub const ALL: [SoundKind; 15] = [
        SoundKind::BassKick,
        SoundKind::Snare,
        SoundKind::HiHat,
        SoundKind::Clap,
        SoundKind::Percussion,
        SoundKind::Impact,
        SoundKind::Bass,
        SoundKind::BassSynth,
        SoundKind::SubBass,
        SoundKind::Lead,
        SoundKind::Synth,
        SoundKind::Pad,
        SoundKind::Ambient,
        SoundKind::Fx,
        SoundKind::Custom,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SoundKind::BassKick => "Bass Kick",
            SoundKind::Snare => "Snare",
            SoundKind::HiHat => "Hi-Hat",
            SoundKind::Clap => "Clap",
            SoundKind::Percussion => "Percussion",
            SoundKind::Impact => "Impact",
            SoundKind::Bass => "Bass",
            SoundKind::BassSynth => "Bass Synth",
            SoundKind::SubBass => "Sub Bass",
            SoundKind::Lead => "Lead",
            SoundKind::Synth => "Synth",
            SoundKind::Pad => "Pad",
            SoundKind::Ambient => "Ambient",
            SoundKind::Fx => "FX",
            SoundKind::Custom => "Custom",
        }
    }

    pub fn parse(s: &str) -> SoundKind {
        let norm: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match norm.as_str() {
            "basskick" | "kick" => SoundKind::BassKick,
            "snare" => SoundKind::Snare,
            "hihat" | "hat" => SoundKind::HiHat,
            "clap" => SoundKind::Clap,
            "percussion" | "perc" => SoundKind::Percussion,
            "impact" => SoundKind::Impact,
            "bass" => SoundKind::Bass,
            "basssynth" => SoundKind::BassSynth,
            "subbass" => SoundKind::SubBass,
            "lead" => SoundKind::Lead,
            "synth" => SoundKind::Synth,
            "pad" => SoundKind::Pad,
            "ambient" => SoundKind::Ambient,
            "fx" => SoundKind::Fx,
            _ => SoundKind::Custom,
        }
    }

    /// Percussive archetypes use fixed recipes rather than the record's ADSR.
    pub fn is_percussive(self) -> bool {
        matches!(
            self,
            SoundKind::BassKick
                | SoundKind::Snare
                | SoundKind::HiHat
                | SoundKind::Clap
                | SoundKind::Percussion
                | SoundKind::Impact
        )
    }

    fn default_sustain(self) -> f64 {
        match self {
            SoundKind::Snare | SoundKind::Clap | SoundKind::Percussion => 0.5,
            _ => 0.7,
        }
    }
}

impl Default for SoundKind {
    fn default() -> Self {
        SoundKind::Synth
    }
}

impl fmt::Display for SoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for SoundKind {
    fn from(s: String) -> Self {
        SoundKind::parse(&s)
    }
}

impl From<SoundKind> for String {
    fn from(kind: SoundKind) -> Self {
        kind.label().to_string()
    }
}

// ── Enumerated knobs ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
    Noise,
}

impl Waveform {
    /// Oscillator shape, or `None` for the noise generator.
    pub fn shape(self) -> Option<Shape> {
        match self {
            Waveform::Sine => Some(Shape::Sine),
            Waveform::Square => Some(Shape::Square),
            Waveform::Sawtooth => Some(Shape::Sawtooth),
            Waveform::Triangle => Some(Shape::Triangle),
            Waveform::Noise => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LfoTarget {
    #[default]
    Pitch,
    Filter,
    Volume,
    Pan,
}

/// A time-varying sweep independent of the main ADSR.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepEnvelope {
    pub attack: f64,
    pub decay: f64,
    pub amount: f64,
}

impl Default for SweepEnvelope {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.0,
            amount: 0.0,
        }
    }
}

impl SweepEnvelope {
    pub fn is_active(&self) -> bool {
        self.amount != 0.0 && self.amount.is_finite()
    }
}

// ── The record ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SoundParameters {
    pub version: u32,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SoundKind,
    pub name: String,

    pub volume: f64,
    pub pan: f64,
    /// Semitones.
    pub pitch: f64,
    pub time_stretch: f64,
    /// Seconds.
    pub duration: f64,
    pub waveform: Waveform,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_cutoff: Option<f64>,
    pub filter_resonance: f64,
    pub filter_type: FilterType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attack: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sustain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<f64>,

    pub lfo_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lfo_depth: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lfo_amount: Option<f64>,
    /// Degrees.
    pub lfo_phase: f64,
    pub lfo_target: LfoTarget,

    pub distortion: f64,
    pub reverb_mix: f64,
    pub reverb_decay: f64,
    pub delay_time: f64,
    pub delay_feedback: f64,
    pub delay_mix: f64,

    /// Band gains in dB.
    pub eq_low: f64,
    pub eq_mid: f64,
    pub eq_high: f64,

    pub compression_threshold: f64,
    pub compression_ratio: f64,
    pub compression_attack: f64,
    pub compression_release: f64,

    pub stereo_width: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch_envelope: Option<SweepEnvelope>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_envelope: Option<SweepEnvelope>,
}

impl Default for SoundParameters {
    fn default() -> Self {
        Self {
            version: PARAMETERS_VERSION,
            id: String::new(),
            kind: SoundKind::default(),
            name: String::new(),
            volume: 0.8,
            pan: 0.0,
            pitch: 0.0,
            time_stretch: 1.0,
            duration: 1.0,
            waveform: Waveform::Sine,
            filter_cutoff: None,
            filter_resonance: 1.0,
            filter_type: FilterType::Lowpass,
            attack: None,
            decay: None,
            sustain: None,
            release: None,
            lfo_rate: 0.0,
            lfo_depth: None,
            lfo_amount: None,
            lfo_phase: 0.0,
            lfo_target: LfoTarget::Pitch,
            distortion: 0.0,
            reverb_mix: 0.0,
            reverb_decay: 2.0,
            delay_time: 0.3,
            delay_feedback: 0.3,
            delay_mix: 0.0,
            eq_low: 0.0,
            eq_mid: 0.0,
            eq_high: 0.0,
            compression_threshold: -24.0,
            compression_ratio: 1.0,
            compression_attack: 0.003,
            compression_release: 0.25,
            stereo_width: 1.0,
            pitch_envelope: None,
            filter_envelope: None,
        }
    }
}

/// Substitute `default` for non-finite values.
fn finite_or(value: f64, default: f64) -> f64 {
    if value.is_finite() { value } else { default }
}

impl SoundParameters {
    /// A fresh record for `kind` with archetype-flavored defaults and a new id.
    pub fn new(kind: SoundKind) -> Self {
        let mut p = SoundParameters {
            id: crate::timeline::mint_id(),
            kind,
            name: kind.label().to_string(),
            ..Default::default()
        };
        match kind {
            SoundKind::BassKick => {
                p.duration = 0.5;
                p.release = Some(0.4);
                p.volume = 0.9;
            }
            SoundKind::Snare => {
                p.duration = 0.3;
                p.attack = Some(0.001);
                p.decay = Some(0.1);
                p.release = Some(0.1);
                p.waveform = Waveform::Noise;
                p.filter_cutoff = Some(5000.0);
            }
            SoundKind::HiHat => {
                p.duration = 0.15;
                p.volume = 0.5;
                p.filter_type = FilterType::Highpass;
                p.filter_cutoff = Some(8000.0);
                p.waveform = Waveform::Noise;
            }
            SoundKind::Clap | SoundKind::Percussion => {
                p.duration = 0.3;
                p.waveform = Waveform::Noise;
            }
            SoundKind::Impact => {
                p.duration = 1.5;
                p.reverb_mix = 0.3;
                p.reverb_decay = 2.5;
            }
            SoundKind::Bass | SoundKind::BassSynth | SoundKind::SubBass => {
                p.waveform = if kind == SoundKind::SubBass {
                    Waveform::Sine
                } else {
                    Waveform::Sawtooth
                };
                p.filter_cutoff = Some(800.0);
            }
            SoundKind::Lead | SoundKind::Synth => {
                p.waveform = Waveform::Sawtooth;
                p.filter_cutoff = Some(4000.0);
            }
            SoundKind::Pad | SoundKind::Ambient => {
                p.duration = 3.0;
                p.attack = Some(0.5);
                p.release = Some(1.0);
                p.waveform = Waveform::Triangle;
                p.reverb_mix = 0.4;
            }
            SoundKind::Fx | SoundKind::Custom => {}
        }
        p
    }

    pub fn volume(&self) -> f64 {
        finite_or(self.volume, 0.8).clamp(0.0, 1.0)
    }

    pub fn pan(&self) -> f64 {
        finite_or(self.pan, 0.0).clamp(-1.0, 1.0)
    }

    /// Frequency multiplier for the `pitch` knob.
    pub fn pitch_ratio(&self) -> f64 {
        (2.0_f64).powf(finite_or(self.pitch, 0.0) / 12.0)
    }

    /// How long the sound sounds: `duration * time_stretch`, within
    /// [0.01, `MAX_SOUND_DURATION`].
    pub fn sounding_duration(&self) -> f64 {
        let d = finite_or(self.duration, 1.0).max(0.0);
        let stretch = finite_or(self.time_stretch, 1.0);
        let stretch = if stretch > 0.0 { stretch } else { 1.0 };
        (d * stretch).clamp(0.01, MAX_SOUND_DURATION)
    }

    pub fn filter_cutoff(&self) -> f64 {
        self.filter_cutoff
            .filter(|c| c.is_finite() && *c > 0.0)
            .unwrap_or(DEFAULT_FILTER_CUTOFF)
    }

    pub fn filter_q(&self) -> f64 {
        finite_or(self.filter_resonance, 1.0).max(0.0001)
    }

    /// The record's ADSR with the archetype's defaults filled in.
    pub fn adsr(&self) -> Adsr {
        let defaults = Adsr::default();
        let pick = |v: Option<f64>, d: f64| v.filter(|x| x.is_finite() && *x >= 0.0).unwrap_or(d);
        Adsr {
            attack: pick(self.attack, defaults.attack),
            decay: pick(self.decay, defaults.decay),
            sustain: pick(self.sustain, self.kind.default_sustain()).clamp(0.0, 1.0),
            release: pick(self.release, defaults.release),
        }
    }

    /// LFO depth in [0, 1]; `lfoDepth` wins over the legacy `lfoAmount`.
    pub fn lfo_depth(&self) -> f64 {
        self.lfo_depth
            .or(self.lfo_amount)
            .filter(|d| d.is_finite())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }

    pub fn reverb_mix(&self) -> f64 {
        finite_or(self.reverb_mix, 0.0).clamp(0.0, 1.0)
    }

    pub fn reverb_decay(&self) -> f64 {
        finite_or(self.reverb_decay, 2.0).clamp(0.1, 10.0)
    }

    pub fn delay_mix(&self) -> f64 {
        finite_or(self.delay_mix, 0.0).clamp(0.0, 1.0)
    }

    pub fn delay_time(&self) -> f64 {
        finite_or(self.delay_time, 0.3).clamp(0.001, delay::MAX_DELAY_SECONDS)
    }

    pub fn delay_feedback(&self) -> f64 {
        finite_or(self.delay_feedback, 0.3).clamp(0.0, delay::MAX_FEEDBACK)
    }

    pub fn stereo_width(&self) -> f64 {
        finite_or(self.stereo_width, 1.0).clamp(0.0, 2.0)
    }

    /// Seconds of reverb/delay ring-out to allow after the sound ends.
    pub fn effect_tail(&self, config: &EngineConfig) -> f64 {
        let reverb = self.reverb_mix() > 0.0;
        let delay = self.delay_mix() > 0.0;
        if !reverb && !delay {
            return 0.0;
        }
        let reverb_tail = if reverb { self.reverb_decay() * 2.0 } else { 0.0 };
        let delay_tail = if delay {
            self.delay_time() * 10.0 * self.delay_feedback()
        } else {
            0.0
        };
        reverb_tail
            .max(delay_tail)
            .clamp(config.tail_min, config.tail_max)
    }

    /// Stable per-sound noise seed so preview and export render the same noise.
    pub fn noise_seed(&self, base: u64) -> u64 {
        // FNV-1a
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.id.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash ^ base
    }
}
