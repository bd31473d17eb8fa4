//! Delay effect — stereo feedback delay with a dry/wet split.
//!
//! The wet path is `input → delay line → wet gain`, and the delay line's
//! output is also fed back into itself through a feedback gain.

/// Buffer capacity of every delay line.
pub const MAX_DELAY_SECONDS: f64 = 5.0;

/// Highest feedback gain; repeats always die away.
pub const MAX_FEEDBACK: f64 = 0.95;

#[derive(Debug, Clone)]
struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    fn new(capacity: usize) -> Self {
        DelayLine {
            buffer: vec![0.0; capacity.max(2)],
            write_pos: 0,
        }
    }

    /// Read `delay` samples behind the write head, interpolating fractional delays.
    fn read(&self, delay: f64) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(1.0, (len - 1) as f64);
        let whole = delay.floor() as usize;
        let frac = (delay - whole as f64) as f32;
        let a = self.buffer[(self.write_pos + len - whole) % len];
        let b = self.buffer[(self.write_pos + len - whole - 1) % len];
        a + (b - a) * frac
    }

    fn write(&mut self, value: f32) {
        self.buffer[self.write_pos] = value;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }
}

/// A stereo feedback delay.
#[derive(Debug, Clone)]
pub struct FeedbackDelay {
    left: DelayLine,
    right: DelayLine,
    delay_samples: f64,
    feedback: f32,
    dry: f32,
    wet: f32,
}

impl FeedbackDelay {
    /// `time` seconds (capped at `MAX_DELAY_SECONDS`), `feedback` gain and
    /// wet `mix`; the dry path gets `1 - mix`.
    pub fn new(sample_rate: f64, time: f64, feedback: f64, mix: f64) -> Self {
        let capacity = (sample_rate * MAX_DELAY_SECONDS) as usize + 1;
        let time = time.clamp(0.0, MAX_DELAY_SECONDS);
        let mix = mix.clamp(0.0, 1.0);
        FeedbackDelay {
            left: DelayLine::new(capacity),
            right: DelayLine::new(capacity),
            delay_samples: time * sample_rate,
            feedback: feedback.clamp(0.0, MAX_FEEDBACK) as f32,
            dry: (1.0 - mix) as f32,
            wet: mix as f32,
        }
    }

    /// Process one stereo frame.
    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        let delayed_l = self.left.read(self.delay_samples);
        let delayed_r = self.right.read(self.delay_samples);
        self.left.write(left + delayed_l * self.feedback);
        self.right.write(right + delayed_r * self.feedback);
        (
            left * self.dry + delayed_l * self.wet,
            right * self.dry + delayed_r * self.wet,
        )
    }
}
