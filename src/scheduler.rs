//! Timeline Scheduler — decides, tick by tick, which clips start and stop.
//!
//! While playing, the host calls `tick` once per frame. Each tick:
//!
//! 1. retires voices that ended or timed out,
//! 2. computes the transport position from the wall clock,
//! 3. handles a loop wrap or the end of the timeline,
//! 4. stops voices whose clip is over (or gone),
//! 5. defers if the context is still suspended,
//! 6. starts clips entering their trigger window,
//! 7. re-arms the frame loop.
//!
//! Stops run before starts, so a stale voice is always retired before a
//! fresh one for the same clip is considered. Seeks and loop wraps are
//! discontinuities: every timeline voice is flushed and clips spanning the
//! new position start with the matching intra-clip offset.

use std::collections::BTreeSet;

use crate::config::EngineConfig;
use crate::context::{AudioContext, ContextState};
use crate::router::ChannelMix;
use crate::sound::SoundParameters;
use crate::timeline::{TimelineClip, TimelineState, TimelineTrack};
use crate::voice::{VoiceKey, VoiceManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

/// A pending frame-callback request. The host only ticks while one is pending.
#[derive(Debug, Default)]
pub struct FrameLoop {
    pending: bool,
}

impl FrameLoop {
    pub fn request(&mut self) {
        self.pending = true;
    }

    pub fn cancel(&mut self) {
        self.pending = false;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Consume the pending request, as the host does before running a frame.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}

/// What the scheduler drives on each tick.
pub struct Playback<'a> {
    pub ctx: &'a mut AudioContext,
    pub voices: &'a mut VoiceManager,
    pub sounds: &'a [SoundParameters],
}

impl Playback<'_> {
    fn sound(&self, id: &str) -> Option<&SoundParameters> {
        self.sounds.iter().find(|s| s.id == id)
    }

    fn start(&mut self, track: &TimelineTrack, clip: &TimelineClip, position: f64, now: f64) {
        let sounds = self.sounds;
        let Some(sound) = sounds.iter().find(|s| s.id == track.sound_id) else {
            return;
        };
        let key = VoiceKey::new(&track.id, &clip.id);
        let mix = ChannelMix {
            volume: track.volume(),
            pan: track.pan(),
        };
        let offset = clip.offset_at(position);
        log::debug!("Triggering {key} at {position:.3}s (offset {offset:.3}s)");
        // Other clips keep playing.
        if let Err(e) = self.voices.play(self.ctx, key, sound, mix, offset, now) {
            log::debug!("Clip {} on track {} skipped: {e}", clip.id, track.id);
        }
    }
}

#[derive(Debug)]
pub struct TimelineScheduler {
    state: TransportState,
    frame: FrameLoop,
    /// Wall-clock instant the current run started.
    started_at: f64,
    /// Timeline position at `started_at`.
    start_position: f64,
    /// Clips already started during the current pass through their window.
    triggered: BTreeSet<VoiceKey>,
    /// Run a spanning sync instead of window triggers on the next live tick.
    pending_sync: bool,
    /// Tracks already reported as pointing at a missing sound.
    dangling: BTreeSet<String>,
    trigger_window: f64,
}

impl TimelineScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        TimelineScheduler {
            state: TransportState::Stopped,
            frame: FrameLoop::default(),
            started_at: 0.0,
            start_position: 0.0,
            triggered: BTreeSet::new(),
            pending_sync: false,
            dangling: BTreeSet::new(),
            trigger_window: config.trigger_window,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn frame(&self) -> &FrameLoop {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut FrameLoop {
        &mut self.frame
    }

    /// Transport position at wall-clock `now`.
    pub fn position(&self, now: f64, timeline: &TimelineState) -> f64 {
        match self.state {
            TransportState::Playing => {
                (self.start_position + (now - self.started_at).max(0.0)).min(timeline.duration)
            }
            _ => timeline.current_time,
        }
    }

    fn restart_clock(&mut self, position: f64, now: f64) {
        self.start_position = position;
        self.started_at = now;
    }

    /// Flush every timeline voice and forget which clips already fired.
    fn flush(&mut self, pb: &mut Playback) {
        pb.voices.stop_timeline(pb.ctx);
        self.triggered.clear();
    }

    pub fn play(&mut self, now: f64, timeline: &mut TimelineState, pb: &mut Playback) {
        if self.state == TransportState::Playing {
            return;
        }
        if timeline.current_time >= timeline.duration {
            timeline.current_time = 0.0;
        }
        let position = timeline.current_time.max(0.0);
        log::info!("Transport playing from {position:.3}s");
        self.state = TransportState::Playing;
        timeline.is_playing = true;
        self.restart_clock(position, now);
        self.triggered.clear();
        self.sync(position, now, timeline, pb);
        self.frame.request();
    }

    pub fn pause(&mut self, now: f64, timeline: &mut TimelineState, pb: &mut Playback) {
        if self.state != TransportState::Playing {
            return;
        }
        timeline.current_time = self.position(now, timeline);
        log::info!("Transport paused at {:.3}s", timeline.current_time);
        self.state = TransportState::Paused;
        timeline.is_playing = false;
        self.frame.cancel();
        self.pending_sync = false;
        self.flush(pb);
    }

    pub fn stop(&mut self, timeline: &mut TimelineState, pb: &mut Playback) {
        log::info!("Transport stopped");
        self.state = TransportState::Stopped;
        timeline.is_playing = false;
        timeline.current_time = 0.0;
        self.frame.cancel();
        self.pending_sync = false;
        self.dangling.clear();
        self.flush(pb);
    }

    /// Jump to `time`. While playing, clips spanning the target restart with
    /// the right offset; otherwise clips whose window covers it are auditioned.
    pub fn seek(&mut self, time: f64, now: f64, timeline: &mut TimelineState, pb: &mut Playback) {
        let time = if time.is_finite() {
            time.clamp(0.0, timeline.duration)
        } else {
            0.0
        };
        log::debug!("Seek to {time:.3}s");
        self.flush(pb);
        timeline.current_time = time;
        match self.state {
            TransportState::Playing => {
                self.restart_clock(time, now);
                self.sync(time, now, timeline, pb);
                self.frame.request();
            }
            _ => {
                if pb.ctx.state() == ContextState::Running {
                    self.trigger_window_check(time, now, timeline, pb);
                    // Auditioned voices are retired by `tick`.
                    if !pb.voices.is_empty() {
                        self.frame.request();
                    }
                } else {
                    pb.ctx.request_resume();
                }
            }
        }
    }

    /// Start every clip spanning `position`, or defer until the context runs.
    fn sync(&mut self, position: f64, now: f64, timeline: &TimelineState, pb: &mut Playback) {
        if pb.ctx.state() != ContextState::Running {
            pb.ctx.request_resume();
            self.pending_sync = true;
            return;
        }
        self.pending_sync = false;
        let any_solo = timeline.any_solo();
        for track in &timeline.tracks {
            if !self.playable(track, any_solo, pb) {
                continue;
            }
            for clip in track.clips.iter().filter(|c| c.spans(position)) {
                pb.start(track, clip, position, now);
                self.triggered.insert(VoiceKey::new(&track.id, &clip.id));
            }
        }
    }

    fn playable(&mut self, track: &TimelineTrack, any_solo: bool, pb: &Playback) -> bool {
        if !track.is_audible(any_solo) {
            return false;
        }
        if pb.sound(&track.sound_id).is_none() {
            if self.dangling.insert(track.id.clone()) {
                log::warn!(
                    "Track {} references missing sound {}; skipping",
                    track.id,
                    track.sound_id
                );
            }
            return false;
        }
        self.dangling.remove(&track.id);
        true
    }

    /// Start clips whose trigger window covers `position` and that have not
    /// fired during this pass.
    fn trigger_window_check(
        &mut self,
        position: f64,
        now: f64,
        timeline: &TimelineState,
        pb: &mut Playback,
    ) {
        let window = self.trigger_window;
        // Leaving a window re-arms the clip for a later pass.
        self.triggered.retain(|key| {
            key.clip()
                .and_then(|(track_id, clip_id)| timeline.clip(track_id, clip_id))
                .is_some_and(|c| c.in_trigger_window(position, window))
        });

        let any_solo = timeline.any_solo();
        for track in &timeline.tracks {
            if !self.playable(track, any_solo, pb) {
                continue;
            }
            for clip in &track.clips {
                if !clip.in_trigger_window(position, window) {
                    continue;
                }
                let key = VoiceKey::new(&track.id, &clip.id);
                if pb.voices.is_active(&key) || self.triggered.contains(&key) {
                    continue;
                }
                pb.start(track, clip, position, now);
                self.triggered.insert(key);
            }
        }
    }

    /// Stop voices whose clip ended before `position` or no longer exists.
    fn stop_finished(&mut self, position: f64, timeline: &TimelineState, pb: &mut Playback) {
        let finished: Vec<VoiceKey> = pb
            .voices
            .active_keys()
            .filter(|key| !key.is_preview())
            .filter(|key| {
                key.clip()
                    .and_then(|(track_id, clip_id)| timeline.clip(track_id, clip_id))
                    .is_none_or(|clip| position > clip.end_time())
            })
            .cloned()
            .collect();
        for key in finished {
            log::debug!("Clip {key} finished at {position:.3}s");
            pb.voices.stop(pb.ctx, &key);
        }
    }

    /// Advance one frame.
    pub fn tick(&mut self, now: f64, timeline: &mut TimelineState, pb: &mut Playback) {
        pb.voices.poll(pb.ctx, now);
        if self.state != TransportState::Playing {
            return;
        }

        let mut position = self.position(now, timeline);

        if let Some(region) = timeline.active_loop() {
            if position >= region.end {
                log::debug!("Loop wrap {:.3}s → {:.3}s", region.end, region.start);
                position = region.start;
                self.restart_clock(position, now);
                self.flush(pb);
                timeline.current_time = position;
                self.sync(position, now, timeline, pb);
                self.frame.request();
                return;
            }
        }

        if position >= timeline.duration {
            log::info!("Reached end of timeline");
            self.state = TransportState::Stopped;
            self.frame.cancel();
            self.pending_sync = false;
            timeline.is_playing = false;
            timeline.current_time = 0.0;
            self.flush(pb);
            return;
        }

        self.stop_finished(position, timeline, pb);

        if pb.ctx.state() != ContextState::Running {
            pb.ctx.request_resume();
        } else if self.pending_sync {
            self.sync(position, now, timeline, pb);
        } else {
            self.trigger_window_check(position, now, timeline, pb);
        }

        timeline.current_time = position;
        self.frame.request();
    }
}
