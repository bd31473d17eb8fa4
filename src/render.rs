//! Offline renderer. Replays the live synthesis and routing against an
//! offline context and returns one stereo buffer ready to encode.

use crate::config::{EngineConfig, NormalizeConfig};
use crate::context::{AudioContext, StereoBuffer};
use crate::error::EngineError;
use crate::router::{ChannelMix, route};
use crate::sound::SoundParameters;
use crate::synth::synthesize;
use crate::timeline::{MAX_TIMELINE_DURATION, TimelineClip, TimelineState};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    /// Seconds to render; the timeline duration when `None`.
    pub duration: Option<f64>,
    pub normalize: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            duration: None,
            normalize: true,
        }
    }
}

fn frames_for(duration: f64, sample_rate: u32) -> Result<usize, EngineError> {
    if !(duration.is_finite() && duration > 0.0 && duration <= MAX_TIMELINE_DURATION) {
        return Err(EngineError::InvalidParameter {
            field: "duration",
            value: duration,
        });
    }
    Ok((duration * sample_rate as f64).ceil() as usize)
}

/// Mount one clip's voice. Failures skip the clip.
fn mount_clip(
    ctx: &mut AudioContext,
    sound: &SoundParameters,
    clip: &TimelineClip,
    mix: ChannelMix,
    config: &EngineConfig,
) -> Result<(), EngineError> {
    let start = clip.start_time;
    let origin = start - clip.offset.max(0.0);
    let voice = synthesize(sound, origin, start, ctx.sample_rate(), config)?;
    let mut graph = route(voice, sound, mix, ctx.sample_rate(), config)?;
    graph.cut_at(clip.end_time());
    ctx.connect(graph)?;
    Ok(())
}

/// Render the whole timeline.
///
/// `progress` receives 0 on start, one value per track up to 80, 80 after
/// the render pass and 100 when the buffer is final.
pub fn render_timeline(
    timeline: &TimelineState,
    sounds: &[SoundParameters],
    options: RenderOptions,
    config: &EngineConfig,
    progress: &mut dyn FnMut(f64),
) -> Result<StereoBuffer, EngineError> {
    progress(0.0);
    let duration = options.duration.unwrap_or(timeline.duration);
    let frames = frames_for(duration, config.sample_rate)?;
    let mut ctx = AudioContext::offline(config.sample_rate);
    progress(10.0);

    let any_solo = timeline.any_solo();
    let track_count = timeline.tracks.len();
    let mut mounted = 0;
    for (i, track) in timeline.tracks.iter().enumerate() {
        let sound = sounds.iter().find(|s| s.id == track.sound_id);
        match sound {
            Some(sound) if track.is_audible(any_solo) => {
                let mix = ChannelMix {
                    volume: track.volume(),
                    pan: track.pan(),
                };
                for clip in &track.clips {
                    if clip.start_time < 0.0 || clip.start_time >= duration {
                        continue;
                    }
                    match mount_clip(&mut ctx, sound, clip, mix, config) {
                        Ok(()) => mounted += 1,
                        Err(e) => {
                            log::error!("Skipping clip {} on track {}: {e}", clip.id, track.id)
                        }
                    }
                }
            }
            Some(_) => log::debug!("Track {} is silent; skipping", track.id),
            None => log::warn!("Track {} references missing sound {}", track.id, track.sound_id),
        }
        progress(10.0 + 70.0 * (i + 1) as f64 / track_count as f64);
    }

    log::info!("Rendering {duration:.2}s offline ({mounted} clips)");
    let mut buffer = ctx.render(frames)?;
    progress(80.0);

    if options.normalize {
        normalize(&mut buffer, &config.normalize);
    }
    progress(100.0);
    Ok(buffer)
}

/// Render a single sound from time zero through its full tail.
pub fn render_sound(
    sound: &SoundParameters,
    normalize_output: bool,
    config: &EngineConfig,
) -> Result<StereoBuffer, EngineError> {
    let mut ctx = AudioContext::offline(config.sample_rate);
    let voice = synthesize(sound, 0.0, 0.0, ctx.sample_rate(), config)?;
    let graph = route(voice, sound, ChannelMix::default(), ctx.sample_rate(), config)?;
    let frames = frames_for(graph.end_time(), config.sample_rate)?;
    ctx.connect(graph)?;
    let mut buffer = ctx.render(frames)?;
    if normalize_output {
        normalize(&mut buffer, &config.normalize);
    }
    Ok(buffer)
}

/// Rescale `buffer` to the target peak when it clips or is barely audible.
///
/// Returns the gain applied, or `None` when the buffer was left alone.
pub fn normalize(buffer: &mut StereoBuffer, config: &NormalizeConfig) -> Option<f32> {
    let peak = buffer.peak() as f64;
    if peak <= 0.0 || !peak.is_finite() {
        return None;
    }
    if peak <= config.clip_threshold && peak >= config.audibility_floor {
        return None;
    }
    let gain = (config.target_amplitude / peak) as f32;
    log::info!("Normalizing peak {peak:.3} by {gain:.3}");
    buffer.scale(gain);
    Some(gain)
}
