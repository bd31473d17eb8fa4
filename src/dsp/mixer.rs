//! Mixer — Sums voice graph outputs into the stereo master bus.

/// A summing stereo bus with master gain and optional soft clipping.
#[derive(Debug, Clone)]
pub struct Mixer {
    pub master_gain: f64,
    pub soft_clip: bool,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl Mixer {
    pub fn new(master_gain: f64, soft_clip: bool) -> Self {
        Mixer {
            master_gain,
            soft_clip,
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    /// Prepare `num_frames` frames of silence.
    pub fn clear(&mut self, num_frames: usize) {
        self.left.clear();
        self.left.resize(num_frames, 0.0);
        self.right.clear();
        self.right.resize(num_frames, 0.0);
    }

    /// Accumulate a stereo block starting at frame 0.
    pub fn add_block(&mut self, left: &[f32], right: &[f32]) {
        for (acc, s) in self.left.iter_mut().zip(left) {
            *acc += s;
        }
        for (acc, s) in self.right.iter_mut().zip(right) {
            *acc += s;
        }
    }

    /// Write the bus, with master gain (and soft clip) applied, into `left`/`right`.
    pub fn output_into(&self, left: &mut [f32], right: &mut [f32]) {
        let gain = self.master_gain as f32;
        let clip = self.soft_clip;
        let shape = |s: f32| {
            let v = s * gain;
            if clip { soft_clip(v) } else { v }
        };
        for (dst, &s) in left.iter_mut().zip(&self.left) {
            *dst = shape(s);
        }
        for (dst, &s) in right.iter_mut().zip(&self.right) {
            *dst = shape(s);
        }
    }

    /// Frames in the bus.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

/// Soft clipper using tanh to prevent harsh digital clipping.
fn soft_clip(x: f32) -> f32 {
    x.tanh()
}
