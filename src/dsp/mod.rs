//! DSP primitives — the node types voice graphs are built from.
//!
//! Everything here is sample-accurate and deterministic, so a live preview
//! and an offline export of the same sound produce the same samples.

pub mod compressor;
pub mod delay;
pub mod envelope;
pub mod filter;
pub mod lfo;
pub mod mixer;
pub mod noise;
pub mod oscillator;
pub mod panner;
pub mod param;
pub mod reverb;
pub mod waveshaper;
