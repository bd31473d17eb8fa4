//! Voice Synthesizer — turns a `SoundParameters` record into generators and
//! a gain envelope.
//!
//! Each archetype has its own recipe. Recipes only *schedule*: frequencies,
//! layer gains and the output envelope are written as automation relative to
//! the voice's origin, and the handle is then pulled sample by sample by the
//! effects router.
//!
//! A voice started `offset` seconds into its sound gets `origin = start -
//! offset`. Everything is scheduled from the origin, so the voice sounds as
//! if it had been playing all along.

use crate::config::EngineConfig;
use crate::dsp::envelope::{Adsr, SILENCE};
use crate::dsp::filter::{BiquadFilter, FilterType};
use crate::dsp::noise::NoiseBuffer;
use crate::dsp::oscillator::{Oscillator, Shape, ratio_to_cents};
use crate::dsp::param::AudioParam;
use crate::error::{EngineError, ensure_finite};
use crate::sound::{SoundKind, SoundParameters, Waveform};

const KICK_START_HZ: f64 = 160.0;
const KICK_END_HZ: f64 = 40.0;
const KICK_SWEEP: f64 = 0.03;
const KICK_MIN_DECAY: f64 = 0.2;

const SNARE_TONE_HZ: f64 = 180.0;

const HIHAT_CUTOFF_HZ: f64 = 7000.0;
const HIHAT_MAX_ATTACK: f64 = 0.01;
const HIHAT_DECAY_FRACTION: f64 = 0.8;

const PERC_TONE_HZ: f64 = 200.0;
const PERC_NOISE_GAIN: f64 = 0.8;
const PERC_TONE_GAIN: f64 = 0.3;
const PERC_TONE_DECAY: f64 = 0.1;
const PERC_ATTACK: f64 = 0.002;
const PERC_DECAY: f64 = 0.2;

const CLAP_CENTER_HZ: f64 = 1200.0;
const CLAP_Q: f64 = 1.5;
const CLAP_BURSTS: usize = 3;
const CLAP_SPACING: f64 = 0.01;
const CLAP_MIN_TAIL: f64 = 0.15;

const IMPACT_START_HZ: f64 = 100.0;
const IMPACT_END_HZ: f64 = 30.0;
const IMPACT_SWEEP: f64 = 0.5;
const IMPACT_NOISE_CUTOFF_HZ: f64 = 400.0;
const IMPACT_NOISE_DECAY: f64 = 0.3;

const BASS_ROOT_HZ: f64 = 55.0;
const BASS_DOUBLE_RATIO: f64 = 1.01;
const LEAD_ROOT_HZ: f64 = 440.0;
const PAD_ROOT_HZ: f64 = 220.0;
const GENERIC_ROOT_HZ: f64 = 440.0;

// ── Generators ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Source {
    Oscillator(Oscillator),
    Noise(NoiseBuffer),
}

/// A scheduled signal source: sounds in `[start, stop)`.
#[derive(Debug, Clone)]
pub struct Generator {
    source: Source,
    /// Hz. Ignored by noise sources.
    pub frequency: AudioParam,
    origin: f64,
    start: f64,
    stop: f64,
    sample_rate: f64,
}

impl Generator {
    pub fn is_noise(&self) -> bool {
        matches!(self.source, Source::Noise(_))
    }

    pub fn detune(&self) -> f64 {
        match &self.source {
            Source::Oscillator(osc) => osc.detune,
            Source::Noise(_) => 0.0,
        }
    }

    pub fn stop_time(&self) -> f64 {
        self.stop
    }

    pub fn is_active(&self, t: f64) -> bool {
        t >= self.start && t < self.stop
    }

    pub fn next_sample(&mut self, t: f64, pitch_factor: f64) -> f64 {
        if !self.is_active(t) {
            return 0.0;
        }
        match &mut self.source {
            Source::Oscillator(osc) => osc.next_sample(self.frequency.value_at(t) * pitch_factor),
            Source::Noise(buffer) => {
                let pos = ((t - self.origin) * self.sample_rate).round();
                if pos < 0.0 { 0.0 } else { buffer.sample(pos as usize) }
            }
        }
    }
}

/// A generator with its own mixing gain and optional filter.
#[derive(Debug, Clone)]
pub struct Layer {
    pub generator: Generator,
    pub gain: AudioParam,
    filter: Option<BiquadFilter>,
}

impl Layer {
    fn new(generator: Generator, gain: f64) -> Self {
        Layer {
            generator,
            gain: AudioParam::new(gain),
            filter: None,
        }
    }

    fn with_filter(mut self, filter: BiquadFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn filter_type(&self) -> Option<FilterType> {
        self.filter.as_ref().map(|f| f.filter_type)
    }

    fn next_sample(&mut self, t: f64, pitch_factor: f64) -> f64 {
        let raw = self.generator.next_sample(t, pitch_factor);
        let shaped = match &mut self.filter {
            Some(filter) => filter.process(raw),
            None => raw,
        };
        shaped * self.gain.value_at(t)
    }
}

/// Everything a synthesized voice owns before routing.
#[derive(Debug, Clone)]
pub struct VoiceHandle {
    pub kind: SoundKind,
    pub primary: Layer,
    pub auxiliary: Vec<Layer>,
    /// Mixing gain carrying the amplitude envelope (peak = volume).
    pub output: AudioParam,
    /// Seconds from the origin until the generators stop, tails included.
    pub effective_duration: f64,
    pub origin: f64,
    pub start: f64,
}

impl VoiceHandle {
    /// Absolute time the generators stop.
    pub fn stop_time(&self) -> f64 {
        self.origin + self.effective_duration
    }

    pub fn has_ended(&self, t: f64) -> bool {
        t >= self.stop_time()
    }

    pub fn generator_count(&self) -> usize {
        1 + self.auxiliary.len()
    }

    /// Mixed, enveloped mono output at absolute time `t`.
    pub fn next_sample(&mut self, t: f64, pitch_factor: f64) -> f64 {
        let mut sum = self.primary.next_sample(t, pitch_factor);
        for layer in &mut self.auxiliary {
            sum += layer.next_sample(t, pitch_factor);
        }
        sum * self.output.value_at(t)
    }
}

// ── Recipes ─────────────────────────────────────────────────

struct Recipe {
    primary: Layer,
    auxiliary: Vec<Layer>,
    output: AudioParam,
    /// How long the recipe sounds, relative to the origin.
    body: f64,
}

struct Build<'a> {
    params: &'a SoundParameters,
    origin: f64,
    sample_rate: f64,
    ratio: f64,
    volume: f64,
    duration: f64,
    adsr: Adsr,
    seed: u64,
}

impl Build<'_> {
    fn generator(&self, source: Source, hz: f64) -> Generator {
        Generator {
            source,
            frequency: AudioParam::new(hz),
            origin: self.origin,
            start: self.origin,
            stop: self.origin,
            sample_rate: self.sample_rate,
        }
    }

    fn oscillator(&self, shape: Shape, hz: f64) -> Generator {
        self.generator(Source::Oscillator(Oscillator::new(shape, self.sample_rate)), hz)
    }

    /// An oscillator at `hz` detuned by `ratio`, following the pitch envelope.
    fn swept_oscillator(&self, shape: Shape, hz: f64, ratio: f64) -> Generator {
        let osc = Oscillator::new(shape, self.sample_rate).with_detune(ratio_to_cents(ratio));
        let mut generator = self.generator(Source::Oscillator(osc), hz);
        if let Some(env) = self.params.pitch_envelope.filter(|e| e.is_active()) {
            let swept = hz * (2.0_f64).powf(env.amount / 12.0);
            if swept.is_finite() && swept > 0.0 {
                generator
                    .frequency
                    .set_value_at_time(swept, self.origin)
                    .exponential_ramp_to_value_at_time(hz, self.origin + env.attack.max(0.001));
            }
        }
        generator
    }

    /// Noise lasting the sounding duration; `stream` decorrelates layers.
    fn noise(&self, stream: u64) -> Generator {
        let seed = self.seed.wrapping_add(stream);
        let buffer = NoiseBuffer::new(self.duration, self.sample_rate, seed);
        self.generator(Source::Noise(buffer), 0.0)
    }

    fn adsr_output(&self) -> AudioParam {
        let mut output = AudioParam::new(0.0);
        self.adsr.apply(&mut output, self.origin, self.volume, self.duration);
        output
    }

    /// 0 → volume over `attack`, then exponentially down to silence at `end`.
    fn strike_output(&self, attack: f64, end: f64) -> AudioParam {
        let o = self.origin;
        let mut output = AudioParam::new(0.0);
        output
            .set_value_at_time(0.0, o)
            .linear_ramp_to_value_at_time(self.volume, o + attack)
            .exponential_ramp_to_value_at_time(SILENCE, o + end.max(attack + 0.001));
        output
    }
}

fn bass_kick(b: &Build) -> Recipe {
    let o = b.origin;
    let mut generator = b.oscillator(Shape::Sine, KICK_START_HZ * b.ratio);
    generator
        .frequency
        .set_value_at_time(KICK_START_HZ * b.ratio, o)
        .exponential_ramp_to_value_at_time(KICK_END_HZ * b.ratio, o + KICK_SWEEP);

    // Attack is ignored to keep the punch.
    let decay = b.adsr.release.max(KICK_MIN_DECAY);
    let mut output = AudioParam::new(0.0);
    output
        .set_value_at_time(b.volume, o)
        .linear_ramp_to_value_at_time(SILENCE, o + decay);

    Recipe {
        primary: Layer::new(generator, 1.0),
        auxiliary: Vec::new(),
        output,
        body: decay,
    }
}

fn snare(b: &Build) -> Recipe {
    let noise_ratio = (0.5 + b.params.filter_cutoff() / 20000.0).clamp(0.5, 0.9);
    let tone = b.oscillator(Shape::Triangle, SNARE_TONE_HZ * b.ratio);
    Recipe {
        primary: Layer::new(b.noise(0), noise_ratio),
        auxiliary: vec![Layer::new(tone, 1.0 - noise_ratio)],
        output: b.adsr_output(),
        body: b.adsr.end(b.duration),
    }
}

fn hi_hat(b: &Build) -> Recipe {
    let cutoff = HIHAT_CUTOFF_HZ * b.ratio;
    let highpass = BiquadFilter::with_params(FilterType::Highpass, b.sample_rate, cutoff, 1.0);
    let attack = b.adsr.attack.min(HIHAT_MAX_ATTACK);
    Recipe {
        primary: Layer::new(b.noise(0), 1.0).with_filter(highpass),
        auxiliary: Vec::new(),
        output: b.strike_output(attack, HIHAT_DECAY_FRACTION * b.duration),
        body: b.duration,
    }
}

fn percussion(b: &Build) -> Recipe {
    let o = b.origin;
    let bandpass = BiquadFilter::with_params(
        FilterType::Bandpass,
        b.sample_rate,
        b.params.filter_cutoff(),
        b.params.filter_q(),
    );
    let mut tone = Layer::new(b.oscillator(Shape::Sine, PERC_TONE_HZ * b.ratio), PERC_TONE_GAIN);
    tone.gain
        .set_value_at_time(PERC_TONE_GAIN, o)
        .exponential_ramp_to_value_at_time(SILENCE, o + PERC_TONE_DECAY);

    Recipe {
        primary: Layer::new(b.noise(0), PERC_NOISE_GAIN).with_filter(bandpass),
        auxiliary: vec![tone],
        output: b.strike_output(PERC_ATTACK, PERC_DECAY),
        body: PERC_DECAY,
    }
}

fn clap(b: &Build) -> Recipe {
    let o = b.origin;
    let centre = CLAP_CENTER_HZ * b.ratio;
    let bandpass = BiquadFilter::with_params(FilterType::Bandpass, b.sample_rate, centre, CLAP_Q);

    let mut output = AudioParam::new(0.0);
    let last = o + CLAP_SPACING * (CLAP_BURSTS - 1) as f64;
    for i in 0..CLAP_BURSTS - 1 {
        let t = o + CLAP_SPACING * i as f64;
        output
            .set_value_at_time(0.0, t)
            .linear_ramp_to_value_at_time(b.volume, t + 0.001)
            .exponential_ramp_to_value_at_time(b.volume * 0.2, t + CLAP_SPACING * 0.9);
    }
    let tail = b.adsr.release.max(CLAP_MIN_TAIL);
    output
        .set_value_at_time(0.0, last)
        .linear_ramp_to_value_at_time(b.volume, last + 0.001)
        .exponential_ramp_to_value_at_time(SILENCE, last + tail);

    Recipe {
        primary: Layer::new(b.noise(0), 1.0).with_filter(bandpass),
        auxiliary: Vec::new(),
        output,
        body: last - o + tail,
    }
}

fn impact(b: &Build) -> Recipe {
    let o = b.origin;
    let mut boom = b.oscillator(Shape::Sine, IMPACT_START_HZ * b.ratio);
    boom.frequency
        .set_value_at_time(IMPACT_START_HZ * b.ratio, o)
        .exponential_ramp_to_value_at_time(IMPACT_END_HZ * b.ratio, o + IMPACT_SWEEP);

    let lowpass = BiquadFilter::with_params(
        FilterType::Lowpass,
        b.sample_rate,
        IMPACT_NOISE_CUTOFF_HZ * b.ratio,
        1.0,
    );
    let mut burst = Layer::new(b.noise(1), 0.6).with_filter(lowpass);
    burst
        .gain
        .set_value_at_time(0.6, o)
        .exponential_ramp_to_value_at_time(SILENCE, o + IMPACT_NOISE_DECAY);

    let body = b.duration.max(IMPACT_SWEEP);
    Recipe {
        primary: Layer::new(boom, 1.0),
        auxiliary: vec![burst],
        output: b.strike_output(0.005, body),
        body,
    }
}

/// Layered oscillators at `root` Hz; each entry is `(detune ratio, gain)`.
fn tonal(b: &Build, root: f64, stack: &[(f64, f64)]) -> Recipe {
    let hz = root * b.ratio;
    let output = b.adsr_output();
    let body = b.adsr.end(b.duration);

    let Some(shape) = b.params.waveform.shape() else {
        return Recipe {
            primary: Layer::new(b.noise(0), 1.0),
            auxiliary: Vec::new(),
            output,
            body,
        };
    };

    let mut layers = stack
        .iter()
        .map(|&(ratio, gain)| Layer::new(b.swept_oscillator(shape, hz, ratio), gain));
    let primary = match layers.next() {
        Some(layer) => layer,
        None => Layer::new(b.swept_oscillator(shape, hz, 1.0), 1.0),
    };
    Recipe {
        primary,
        auxiliary: layers.collect(),
        output,
        body,
    }
}

fn bass(b: &Build) -> Recipe {
    match b.params.waveform {
        Waveform::Sawtooth | Waveform::Square => {
            tonal(b, BASS_ROOT_HZ, &[(1.0, 0.5), (BASS_DOUBLE_RATIO, 0.5)])
        }
        _ => tonal(b, BASS_ROOT_HZ, &[(1.0, 1.0)]),
    }
}

// ── Entry point ─────────────────────────────────────────────

/// Build the voice for `params`, scheduled from `origin` and sounding from `start`.
pub fn synthesize(
    params: &SoundParameters,
    origin: f64,
    start: f64,
    sample_rate: f64,
    config: &EngineConfig,
) -> Result<VoiceHandle, EngineError> {
    ensure_finite("origin", origin)?;
    ensure_finite("start", start)?;
    if !(sample_rate.is_finite() && sample_rate > 0.0) {
        return Err(EngineError::InvalidParameter {
            field: "sampleRate",
            value: sample_rate,
        });
    }
    let ratio = params.pitch_ratio();
    if !(ratio.is_finite() && ratio > 0.0) {
        return Err(EngineError::InvalidParameter {
            field: "pitch",
            value: params.pitch,
        });
    }

    let b = Build {
        params,
        origin,
        sample_rate,
        ratio,
        volume: params.volume(),
        duration: params.sounding_duration(),
        adsr: params.adsr(),
        seed: params.noise_seed(config.noise_seed),
    };

    let recipe = match params.kind {
        SoundKind::BassKick => bass_kick(&b),
        SoundKind::Snare => snare(&b),
        SoundKind::HiHat => hi_hat(&b),
        SoundKind::Clap => clap(&b),
        SoundKind::Percussion => percussion(&b),
        SoundKind::Impact => impact(&b),
        SoundKind::Bass | SoundKind::BassSynth | SoundKind::SubBass => bass(&b),
        SoundKind::Lead | SoundKind::Synth => tonal(&b, LEAD_ROOT_HZ, &[(1.0, 1.0)]),
        SoundKind::Pad | SoundKind::Ambient => {
            tonal(&b, PAD_ROOT_HZ, &[(1.0, 0.5), (1.003, 0.3), (0.993, 0.3)])
        }
        SoundKind::Fx | SoundKind::Custom => tonal(&b, GENERIC_ROOT_HZ, &[(1.0, 1.0)]),
    };

    let effective_duration =
        recipe.body.max(b.duration) + config.safety_buffer + params.effect_tail(config);
    let stop = origin + effective_duration;

    let Recipe {
        mut primary,
        mut auxiliary,
        output,
        ..
    } = recipe;
    for layer in std::iter::once(&mut primary).chain(auxiliary.iter_mut()) {
        layer.generator.start = start;
        layer.generator.stop = stop;
    }

    Ok(VoiceHandle {
        kind: params.kind,
        primary,
        auxiliary,
        output,
        effective_duration,
        origin,
        start,
    })
}
