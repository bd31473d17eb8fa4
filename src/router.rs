//! Effects Router — wires a synthesized voice through its processing chain.
//!
//! ```text
//! voice → main gain → filter → EQ → distortion → [reverb dry/wet]
//!       → [delay dry/wet] → compressor → pan → width → destination
//! ```
//!
//! Stages that the record bypasses are not built at all. The voice stays
//! mono until the reverb (stereo impulse response) widens it, and the panner
//! uses the mono or stereo law accordingly.

use crate::config::EngineConfig;
use crate::context::RENDER_QUANTUM;
use crate::dsp::compressor::Compressor;
use crate::dsp::delay::FeedbackDelay;
use crate::dsp::filter::{BiquadFilter, FilterType};
use crate::dsp::lfo::Lfo;
use crate::dsp::panner::{pan_mono, pan_stereo, stereo_width};
use crate::dsp::param::AudioParam;
use crate::dsp::reverb::{Convolver, impulse_response};
use crate::dsp::waveshaper::WaveShaper;
use crate::error::EngineError;
use crate::sound::SoundParameters;
use crate::synth::VoiceHandle;

const EQ_LOW_HZ: f64 = 320.0;
const EQ_MID_HZ: f64 = 1000.0;
const EQ_MID_Q: f64 = 0.5;
const EQ_HIGH_HZ: f64 = 3200.0;

/// Track-level gain and pan applied on top of the sound's own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelMix {
    pub volume: f64,
    pub pan: f64,
}

impl Default for ChannelMix {
    fn default() -> Self {
        ChannelMix {
            volume: 1.0,
            pan: 0.0,
        }
    }
}

#[derive(Debug)]
struct ReverbStage {
    convolver: Convolver,
    dry: f32,
    wet: f32,
    wet_left: Vec<f32>,
    wet_right: Vec<f32>,
    input: Vec<f32>,
}

/// A fully routed voice, ready to be mounted in a context.
#[derive(Debug)]
pub struct VoiceGraph {
    voice: VoiceHandle,
    sample_rate: f64,
    main_gain: f64,
    lfo: Option<Lfo>,
    filter: BiquadFilter,
    cutoff: AudioParam,
    eq: Vec<BiquadFilter>,
    shaper: Option<WaveShaper>,
    reverb: Option<ReverbStage>,
    delay: Option<FeedbackDelay>,
    compressor: Option<Compressor>,
    pan: f64,
    width: f64,
    /// Hard stop: the graph is silent and ended from this instant on.
    cut: Option<f64>,
    mono: Vec<f32>,
    /// Frames that went through the processing chain.
    processed: u64,
}

impl VoiceGraph {
    pub fn voice(&self) -> &VoiceHandle {
        &self.voice
    }

    pub fn origin(&self) -> f64 {
        self.voice.origin
    }

    pub fn effective_duration(&self) -> f64 {
        self.voice.effective_duration
    }

    /// Absolute time at which the graph stops producing sound.
    pub fn end_time(&self) -> f64 {
        let natural = self.voice.stop_time();
        match self.cut {
            Some(cut) => cut.min(natural),
            None => natural,
        }
    }

    pub fn has_ended(&self, t: f64) -> bool {
        t >= self.end_time()
    }

    pub fn processed_frames(&self) -> u64 {
        self.processed
    }

    /// Silence the graph from `time` on, as a disconnect would.
    pub fn cut_at(&mut self, time: f64) {
        self.cut = Some(self.cut.map_or(time, |c| c.min(time)));
    }

    /// Names of the stages that were built, in signal order.
    pub fn stages(&self) -> Vec<&'static str> {
        let mut stages = vec!["gain", "filter"];
        if !self.eq.is_empty() {
            stages.push("eq");
        }
        if self.shaper.is_some() {
            stages.push("distortion");
        }
        if self.reverb.is_some() {
            stages.push("reverb");
        }
        if self.delay.is_some() {
            stages.push("delay");
        }
        if self.compressor.is_some() {
            stages.push("compressor");
        }
        stages.push("pan");
        stages
    }

    /// Mix `out_left.len()` frames starting at `block_start` into the outputs.
    pub fn render(
        &mut self,
        block_start: f64,
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) -> Result<(), EngineError> {
        let frames = out_left.len().min(out_right.len());
        let sr = self.sample_rate;
        let origin = self.voice.origin;
        let end = self.end_time();

        // Before the voice starts every stage is silent and at rest.
        if block_start + frames as f64 / sr <= self.voice.start {
            return Ok(());
        }
        self.processed += frames as u64;

        self.mono.clear();
        self.mono.resize(frames, 0.0);
        let mut live = 0;
        for i in 0..frames {
            let t = block_start + i as f64 / sr;
            if t >= end {
                break;
            }
            live = i + 1;
            let elapsed = t - origin;
            let (pitch, gain, cutoff_factor) = match &self.lfo {
                Some(lfo) => (
                    lfo.pitch_factor(elapsed),
                    lfo.gain_factor(elapsed),
                    lfo.cutoff_factor(elapsed),
                ),
                None => (1.0, 1.0, 1.0),
            };

            let mut s = self.voice.next_sample(t, pitch) * self.main_gain * gain;
            self.filter.set_frequency(self.cutoff.value_at(t) * cutoff_factor);
            s = self.filter.process(s);
            for band in &mut self.eq {
                s = band.process(s);
            }
            if let Some(shaper) = &mut self.shaper {
                s = shaper.process(s);
            }
            self.mono[i] = s as f32;
        }

        let stereo = self.reverb.is_some();
        if let Some(reverb) = &mut self.reverb {
            let block = reverb.convolver.block_size();
            let padded = frames.div_ceil(block) * block;
            reverb.input.clear();
            reverb.input.extend_from_slice(&self.mono);
            reverb.input.resize(padded, 0.0);
            reverb.wet_left.resize(padded, 0.0);
            reverb.wet_right.resize(padded, 0.0);
            let chunks = reverb
                .input
                .chunks(block)
                .zip(reverb.wet_left.chunks_mut(block))
                .zip(reverb.wet_right.chunks_mut(block));
            for ((input, l), r) in chunks {
                reverb.convolver.process_block(input, l, r)?;
            }
        }

        for i in 0..live {
            let t = block_start + i as f64 / sr;
            let dry = self.mono[i];
            let (mut l, mut r) = match &self.reverb {
                Some(reverb) => (
                    dry * reverb.dry + reverb.wet_left[i] * reverb.wet,
                    dry * reverb.dry + reverb.wet_right[i] * reverb.wet,
                ),
                None => (dry, dry),
            };
            if let Some(delay) = &mut self.delay {
                (l, r) = delay.process(l, r);
            }
            if let Some(comp) = &mut self.compressor {
                (l, r) = comp.process(l, r);
            }
            let pan_offset = self.lfo.as_ref().map_or(0.0, |lfo| lfo.pan_offset(t - origin));
            let pan = (self.pan + pan_offset).clamp(-1.0, 1.0);
            let (pl, pr) = if stereo {
                let (pl, pr) = pan_stereo(l, r, pan);
                stereo_width(pl, pr, self.width)
            } else {
                pan_mono(l, pan)
            };
            out_left[i] += pl;
            out_right[i] += pr;
        }
        Ok(())
    }
}

/// Route `voice` through the stages `params` asks for.
pub fn route(
    voice: VoiceHandle,
    params: &SoundParameters,
    mix: ChannelMix,
    sample_rate: f64,
    config: &EngineConfig,
) -> Result<VoiceGraph, EngineError> {
    let origin = voice.origin;

    // Filter, with its sweep envelope.
    let base = params.filter_cutoff();
    let mut cutoff = AudioParam::new(base);
    if let Some(env) = params.filter_envelope.filter(|e| e.is_active()) {
        let attack_end = origin + env.attack.max(0.0);
        cutoff
            .set_value_at_time(base, origin)
            .linear_ramp_to_value_at_time((base + env.amount).max(10.0), attack_end);
        if env.decay > 0.0 {
            cutoff.linear_ramp_to_value_at_time(base, attack_end + env.decay);
        }
    }
    let filter =
        BiquadFilter::with_params(params.filter_type, sample_rate, base, params.filter_q());

    let mut eq = Vec::new();
    let bands = [
        (FilterType::Lowshelf, EQ_LOW_HZ, 1.0, params.eq_low),
        (FilterType::Peaking, EQ_MID_HZ, EQ_MID_Q, params.eq_mid),
        (FilterType::Highshelf, EQ_HIGH_HZ, 1.0, params.eq_high),
    ];
    if bands.iter().any(|b| b.3.is_finite() && b.3 != 0.0) {
        for (kind, hz, q, gain_db) in bands {
            let gain_db = if gain_db.is_finite() { gain_db.clamp(-40.0, 40.0) } else { 0.0 };
            eq.push(BiquadFilter::eq_band(kind, sample_rate, hz, q, gain_db));
        }
    }

    let shaper = (params.distortion.is_finite() && params.distortion > 0.0)
        .then(|| WaveShaper::new(params.distortion.min(1.0)));

    let reverb = if params.reverb_mix() > 0.0 {
        let seed = params.noise_seed(config.noise_seed) ^ 0x7265_7665_7262;
        let ir = impulse_response(params.reverb_decay(), sample_rate, seed);
        let mix = params.reverb_mix();
        Some(ReverbStage {
            convolver: Convolver::new(ir, RENDER_QUANTUM, sample_rate)?,
            dry: (1.0 - mix) as f32,
            wet: mix as f32,
            wet_left: Vec::with_capacity(RENDER_QUANTUM),
            wet_right: Vec::with_capacity(RENDER_QUANTUM),
            input: Vec::with_capacity(RENDER_QUANTUM),
        })
    } else {
        None
    };

    let delay = (params.delay_mix() > 0.0).then(|| {
        FeedbackDelay::new(
            sample_rate,
            params.delay_time(),
            params.delay_feedback(),
            params.delay_mix(),
        )
    });

    let compress = params.compression_ratio.is_finite() && params.compression_ratio > 1.0;
    let compressor = compress.then(|| {
        Compressor::new(
            sample_rate,
            params.compression_threshold,
            params.compression_ratio,
            params.compression_attack,
            params.compression_release,
        )
    });

    let track_volume = if mix.volume.is_finite() { mix.volume.max(0.0) } else { 1.0 };
    let track_pan = if mix.pan.is_finite() { mix.pan } else { 0.0 };

    Ok(VoiceGraph {
        voice,
        sample_rate,
        main_gain: track_volume,
        lfo: Lfo::from_params(params),
        filter,
        cutoff,
        eq,
        shaper,
        reverb,
        delay,
        compressor,
        pan: (params.pan() + track_pan).clamp(-1.0, 1.0),
        width: params.stereo_width(),
        cut: None,
        mono: Vec::with_capacity(RENDER_QUANTUM),
        processed: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::{SoundKind, SweepEnvelope};
    use crate::synth::synthesize;

    const SR: f64 = 44100.0;

    fn graph(params: &SoundParameters, mix: ChannelMix) -> VoiceGraph {
        let cfg = EngineConfig::default();
        let voice = synthesize(params, 0.0, 0.0, SR, &cfg).unwrap();
        route(voice, params, mix, SR, &cfg).unwrap()
    }

    fn lead() -> SoundParameters {
        SoundParameters {
            id: "lead".into(),
            kind: SoundKind::Lead,
            filter_cutoff: Some(8000.0),
            ..Default::default()
        }
    }

    /// Render `blocks` quanta and return (left, right).
    fn render(g: &mut VoiceGraph, blocks: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = Vec::new();
        let mut right = Vec::new();
        for b in 0..blocks {
            let mut l = vec![0.0; RENDER_QUANTUM];
            let mut r = vec![0.0; RENDER_QUANTUM];
            let t = (b * RENDER_QUANTUM) as f64 / SR;
            g.render(t, &mut l, &mut r).unwrap();
            left.extend(l);
            right.extend(r);
        }
        (left, right)
    }

    fn energy(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s * s).sum()
    }

    #[test]
    fn bypassed_stages_are_not_built() {
        let g = graph(&lead(), ChannelMix::default());
        assert_eq!(g.stages(), vec!["gain", "filter", "pan"]);
    }

    #[test]
    fn enabled_stages_appear_in_signal_order() {
        let p = SoundParameters {
            eq_mid: 3.0,
            distortion: 0.4,
            reverb_mix: 0.3,
            delay_mix: 0.2,
            compression_ratio: 4.0,
            ..lead()
        };
        let g = graph(&p, ChannelMix::default());
        assert_eq!(
            g.stages(),
            vec!["gain", "filter", "eq", "distortion", "reverb", "delay", "compressor", "pan"]
        );
    }

    #[test]
    fn hard_left_pan_silences_right_channel() {
        let p = SoundParameters { pan: -1.0, ..lead() };
        let mut g = graph(&p, ChannelMix::default());
        let (l, r) = render(&mut g, 20);
        assert!(energy(&l) > 0.0);
        assert!(energy(&r) < 1e-9, "Right should be silent, got {}", energy(&r));
    }

    #[test]
    fn track_pan_adds_to_sound_pan() {
        let p = SoundParameters { pan: -0.5, ..lead() };
        let g = graph(
            &p,
            ChannelMix {
                volume: 1.0,
                pan: -0.8,
            },
        );
        assert_eq!(g.pan, -1.0);
    }

    #[test]
    fn muted_track_volume_is_silent() {
        let mut g = graph(
            &lead(),
            ChannelMix {
                volume: 0.0,
                pan: 0.0,
            },
        );
        let (l, r) = render(&mut g, 10);
        assert_eq!(energy(&l) + energy(&r), 0.0);
    }

    #[test]
    fn reverb_widens_to_stereo() {
        let p = SoundParameters {
            reverb_mix: 0.8,
            reverb_decay: 0.5,
            ..lead()
        };
        let mut g = graph(&p, ChannelMix::default());
        let (l, r) = render(&mut g, 40);
        assert!(l.iter().zip(&r).any(|(a, b)| (a - b).abs() > 1e-6));
    }

    #[test]
    fn filter_envelope_sweeps_cutoff() {
        let p = SoundParameters {
            filter_envelope: Some(SweepEnvelope {
                attack: 0.1,
                decay: 0.2,
                amount: 3000.0,
            }),
            ..lead()
        };
        let g = graph(&p, ChannelMix::default());
        assert!((g.cutoff.value_at(0.0) - 8000.0).abs() < 1e-9);
        assert!((g.cutoff.value_at(0.1) - 11000.0).abs() < 1e-9);
        assert!((g.cutoff.value_at(0.3) - 8000.0).abs() < 1e-9);
    }

    #[test]
    fn cut_silences_and_ends_the_graph() {
        let mut g = graph(&lead(), ChannelMix::default());
        let cut = 64.0 / SR;
        g.cut_at(cut);
        assert!(g.has_ended(cut));
        let (l, _) = render(&mut g, 2);
        assert!(l[64..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn render_accumulates_into_outputs() {
        let mut g = graph(&lead(), ChannelMix::default());
        let mut l = vec![1.0; RENDER_QUANTUM];
        let mut r = vec![1.0; RENDER_QUANTUM];
        g.render(0.0, &mut l, &mut r).unwrap();
        assert_eq!(l[0], 1.0, "Envelope starts at zero");
        assert!(l.iter().any(|&s| s != 1.0));
    }

    #[test]
    fn blocks_before_a_late_start_cost_nothing() {
        let cfg = EngineConfig::default();
        let params = SoundParameters {
            kind: SoundKind::Pad,
            duration: 0.2,
            reverb_mix: 0.5,
            ..lead()
        };
        let start = (16 * RENDER_QUANTUM) as f64 / SR;
        let early = synthesize(&params, 0.0, 0.0, SR, &cfg).unwrap();
        let late = synthesize(&params, start, start, SR, &cfg).unwrap();
        let mut early = route(early, &params, ChannelMix::default(), SR, &cfg).unwrap();
        let mut late = route(late, &params, ChannelMix::default(), SR, &cfg).unwrap();

        let (left, _) = render(&mut late, 48);
        let (reference, _) = render(&mut early, 32);
        let (lead_in, shifted) = left.split_at(16 * RENDER_QUANTUM);
        assert!(lead_in.iter().all(|&s| s == 0.0));
        assert_eq!(late.processed_frames(), (32 * RENDER_QUANTUM) as u64);
        assert_eq!(late.processed_frames(), early.processed_frames());
        assert!(energy(shifted) > 0.0);
        for (a, b) in shifted.iter().zip(&reference) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }
}
