//! Equal-power stereo panning and mid/side width.

use std::f64::consts::FRAC_PI_2;

/// Pan a stereo frame the way a WebAudio StereoPannerNode does.
///
/// `pan` is in [-1, 1]. For a dual-mono input (`left == right`) this is the
/// familiar equal-power law.
#[inline]
pub fn pan_stereo(left: f32, right: f32, pan: f64) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let x = if pan <= 0.0 { pan + 1.0 } else { pan };
    let gain_l = (x * FRAC_PI_2).cos() as f32;
    let gain_r = (x * FRAC_PI_2).sin() as f32;
    if pan <= 0.0 {
        (left + right * gain_l, right * gain_r)
    } else {
        (left * gain_l, right + left * gain_r)
    }
}

/// Equal-power pan of a mono sample.
#[inline]
pub fn pan_mono(sample: f32, pan: f64) -> (f32, f32) {
    let x = (pan.clamp(-1.0, 1.0) + 1.0) / 2.0;
    (
        sample * (x * FRAC_PI_2).cos() as f32,
        sample * (x * FRAC_PI_2).sin() as f32,
    )
}

/// Scale the side component: 0 collapses to mono, 1 is unchanged.
#[inline]
pub fn stereo_width(left: f32, right: f32, width: f64) -> (f32, f32) {
    let mid = (left + right) * 0.5;
    let side = (left - right) * 0.5 * width as f32;
    (mid + side, mid - side)
}
