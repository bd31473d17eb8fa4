//! `Studio` — the engine surface a UI drives.
//!
//! Every mutator is synchronous; the transport picks changes up on the next
//! frame. The host calls [`Studio::frame`] while it returns `true`, and
//! pulls audio from the live context with [`Studio::pull_audio`].

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::context::{AudioContext, ContextHolder, StereoBuffer};
use crate::error::{EngineError, ensure_finite};
use crate::preset::{PersistedState, Preset, TimelinePreset};
use crate::render::{RenderOptions, render_sound, render_timeline};
use crate::router::ChannelMix;
use crate::scheduler::{Playback, TimelineScheduler, TransportState};
use crate::sound::{SoundKind, SoundParameters};
use crate::timeline::{
    MAX_TIMELINE_DURATION, TimelineClip, TimelineState, TimelineTrack, mint_id, validate_placement,
};
use crate::voice::{VoiceKey, VoiceManager};
use crate::wav::{EncodedAudio, Encoder, EncoderRegistry, ExportFormat};

/// Partial track edit; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackUpdate {
    pub sound_id: Option<String>,
    pub name: Option<String>,
    pub color: Option<String>,
    pub muted: Option<bool>,
    pub solo: Option<bool>,
    pub volume: Option<f64>,
    pub pan: Option<f64>,
}

/// Partial clip edit; `None` leaves a field unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClipUpdate {
    pub start_time: Option<f64>,
    pub duration: Option<f64>,
    pub offset: Option<f64>,
}

#[derive(Debug)]
pub struct Studio {
    config: EngineConfig,
    sounds: Vec<SoundParameters>,
    presets: Vec<Preset>,
    timeline_presets: Vec<TimelinePreset>,
    timeline: TimelineState,
    holder: ContextHolder,
    voices: VoiceManager,
    scheduler: TimelineScheduler,
    encoders: EncoderRegistry,
}

impl Default for Studio {
    fn default() -> Self {
        Studio::new(EngineConfig::default())
    }
}

impl Studio {
    pub fn new(config: EngineConfig) -> Self {
        Studio {
            holder: ContextHolder::new(config.clone()),
            voices: VoiceManager::new(config.clone()),
            scheduler: TimelineScheduler::new(&config),
            encoders: EncoderRegistry::default(),
            sounds: Vec::new(),
            presets: Vec::new(),
            timeline_presets: Vec::new(),
            timeline: TimelineState::default(),
            config,
        }
    }

    // ── Accessors ───────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn timeline(&self) -> &TimelineState {
        &self.timeline
    }

    pub fn sounds(&self) -> &[SoundParameters] {
        &self.sounds
    }

    pub fn sound(&self, id: &str) -> Option<&SoundParameters> {
        self.sounds.iter().find(|s| s.id == id)
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn timeline_presets(&self) -> &[TimelinePreset] {
        &self.timeline_presets
    }

    pub fn voices(&self) -> &VoiceManager {
        &self.voices
    }

    pub fn transport_state(&self) -> TransportState {
        self.scheduler.state()
    }

    /// Transport position at wall-clock `now`.
    pub fn position(&self, now: f64) -> f64 {
        self.scheduler.position(now, &self.timeline)
    }

    /// The live context, if anything has needed it yet.
    pub fn context(&mut self) -> Option<&mut AudioContext> {
        self.holder.existing()
    }

    pub fn context_constructions(&self) -> u32 {
        self.holder.constructions()
    }

    pub fn register_encoder(&mut self, encoder: Box<dyn Encoder>) {
        self.encoders.register(encoder);
    }

    fn with_playback<R>(
        &mut self,
        f: impl FnOnce(&mut TimelineScheduler, &mut TimelineState, &mut Playback<'_>) -> R,
    ) -> R {
        let mut pb = Playback {
            ctx: self.holder.get(),
            voices: &mut self.voices,
            sounds: &self.sounds,
        };
        f(&mut self.scheduler, &mut self.timeline, &mut pb)
    }

    /// Stop voices of tracks that can no longer be heard.
    fn silence_inaudible(&mut self) {
        let Some(ctx) = self.holder.existing() else {
            return;
        };
        let any_solo = self.timeline.any_solo();
        for track in &self.timeline.tracks {
            let dangling = !self.sounds.iter().any(|s| s.id == track.sound_id);
            let silent = !track.is_audible(any_solo) || dangling;
            if silent {
                self.voices.stop_track(ctx, &track.id);
            }
        }
    }

    fn stop_voice(&mut self, key: &VoiceKey) {
        if let Some(ctx) = self.holder.existing() {
            self.voices.stop(ctx, key);
        }
    }

    fn stop_track_voices(&mut self, track_id: &str) {
        if let Some(ctx) = self.holder.existing() {
            self.voices.stop_track(ctx, track_id);
        }
    }

    // ── Sounds ──────────────────────────────────────────────

    /// Add `sound`, minting an id when it has none or a clashing one.
    pub fn add_sound(&mut self, mut sound: SoundParameters) -> String {
        if sound.id.is_empty() || self.sound(&sound.id).is_some() {
            sound.id = mint_id();
        }
        let id = sound.id.clone();
        log::debug!("Added sound {id} ({})", sound.kind);
        self.sounds.push(sound);
        id
    }

    /// Add a sound with the defaults for `kind`.
    pub fn new_sound(&mut self, kind: SoundKind) -> String {
        self.add_sound(SoundParameters::new(kind))
    }

    /// Edit a sound in place. Voices pick the change up when next triggered.
    pub fn update_sound(
        &mut self,
        id: &str,
        update: impl FnOnce(&mut SoundParameters),
    ) -> Result<(), EngineError> {
        let sound = self
            .sounds
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| EngineError::UnknownSound { id: id.to_string() })?;
        update(sound);
        sound.id = id.to_string();
        Ok(())
    }

    /// Remove a sound. Tracks that reference it fall silent.
    pub fn delete_sound(&mut self, id: &str) -> Result<SoundParameters, EngineError> {
        let index = self
            .sounds
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| EngineError::UnknownSound { id: id.to_string() })?;
        let sound = self.sounds.remove(index);
        self.stop_voice(&VoiceKey::preview(id));
        self.silence_inaudible();
        Ok(sound)
    }

    // ── Tracks ──────────────────────────────────────────────

    pub fn add_track(
        &mut self,
        sound_id: &str,
        name: impl Into<String>,
    ) -> Result<String, EngineError> {
        if self.sound(sound_id).is_none() {
            return Err(EngineError::UnknownSound {
                id: sound_id.to_string(),
            });
        }
        let track = TimelineTrack::new(sound_id, name);
        let id = track.id.clone();
        self.timeline.tracks.push(track);
        Ok(id)
    }

    pub fn remove_track(&mut self, track_id: &str) -> Result<TimelineTrack, EngineError> {
        let index = self
            .timeline
            .tracks
            .iter()
            .position(|t| t.id == track_id)
            .ok_or_else(|| EngineError::UnknownTrack {
                id: track_id.to_string(),
            })?;
        self.stop_track_voices(track_id);
        Ok(self.timeline.tracks.remove(index))
    }

    /// Apply `update`. Muting (or soloing another track) stops the voices
    /// that can no longer be heard straight away.
    pub fn update_track(&mut self, track_id: &str, update: TrackUpdate) -> Result<(), EngineError> {
        if let Some(volume) = update.volume {
            ensure_finite("volume", volume)?;
        }
        if let Some(pan) = update.pan {
            ensure_finite("pan", pan)?;
        }
        let track = self
            .timeline
            .track_mut(track_id)
            .ok_or_else(|| EngineError::UnknownTrack {
                id: track_id.to_string(),
            })?;
        let rebound = update.sound_id.as_ref().is_some_and(|s| *s != track.sound_id);
        if let Some(sound_id) = update.sound_id {
            track.sound_id = sound_id;
        }
        if let Some(name) = update.name {
            track.name = name;
        }
        if let Some(color) = update.color {
            track.color = color;
        }
        if let Some(muted) = update.muted {
            track.muted = muted;
        }
        if let Some(solo) = update.solo {
            track.solo = solo;
        }
        if let Some(volume) = update.volume {
            track.volume = volume.clamp(0.0, 2.0);
        }
        if let Some(pan) = update.pan {
            track.pan = pan.clamp(-1.0, 1.0);
        }
        if rebound {
            self.stop_track_voices(track_id);
        }
        self.silence_inaudible();
        Ok(())
    }

    // ── Clips ───────────────────────────────────────────────

    fn track_mut(&mut self, track_id: &str) -> Result<&mut TimelineTrack, EngineError> {
        self.timeline
            .track_mut(track_id)
            .ok_or_else(|| EngineError::UnknownTrack {
                id: track_id.to_string(),
            })
    }

    pub fn add_clip(
        &mut self,
        track_id: &str,
        start_time: f64,
        duration: f64,
    ) -> Result<String, EngineError> {
        let clip = TimelineClip::new(start_time, duration)?;
        let id = clip.id.clone();
        self.track_mut(track_id)?.clips.push(clip);
        Ok(id)
    }

    pub fn remove_clip(
        &mut self,
        track_id: &str,
        clip_id: &str,
    ) -> Result<TimelineClip, EngineError> {
        let track = self.track_mut(track_id)?;
        let index = track
            .clips
            .iter()
            .position(|c| c.id == clip_id)
            .ok_or_else(|| EngineError::UnknownClip {
                id: clip_id.to_string(),
            })?;
        let clip = track.clips.remove(index);
        self.stop_voice(&VoiceKey::new(track_id, clip_id));
        Ok(clip)
    }

    /// Edit a clip's placement. A sounding voice keeps playing and is
    /// stopped by the transport once it passes the new end.
    pub fn update_clip(
        &mut self,
        track_id: &str,
        clip_id: &str,
        update: ClipUpdate,
    ) -> Result<(), EngineError> {
        let clip = self
            .track_mut(track_id)?
            .clip_mut(clip_id)
            .ok_or_else(|| EngineError::UnknownClip {
                id: clip_id.to_string(),
            })?;
        let start_time = update.start_time.unwrap_or(clip.start_time);
        let duration = update.duration.unwrap_or(clip.duration);
        validate_placement(start_time, duration)?;
        let offset = match update.offset {
            Some(offset) => ensure_finite("offset", offset)?.max(0.0),
            None => clip.offset,
        };
        clip.start_time = start_time;
        clip.duration = duration;
        clip.offset = offset;
        Ok(())
    }

    /// Move a clip to `start_time` on `to_track`. Its voice, if any, stops.
    pub fn move_clip(
        &mut self,
        from_track: &str,
        clip_id: &str,
        to_track: &str,
        start_time: f64,
    ) -> Result<(), EngineError> {
        if self.timeline.track(to_track).is_none() {
            return Err(EngineError::UnknownTrack {
                id: to_track.to_string(),
            });
        }
        let duration = self
            .timeline
            .clip(from_track, clip_id)
            .map(|c| c.duration)
            .ok_or_else(|| EngineError::UnknownClip {
                id: clip_id.to_string(),
            })?;
        validate_placement(start_time, duration)?;

        let mut clip = self.remove_clip(from_track, clip_id)?;
        clip.start_time = start_time;
        self.track_mut(to_track)?.clips.push(clip);
        Ok(())
    }

    /// Change the timeline length, pulling the playhead inside it.
    pub fn set_duration(&mut self, duration: f64) -> Result<(), EngineError> {
        if !(duration.is_finite() && duration > 0.0 && duration <= MAX_TIMELINE_DURATION) {
            return Err(EngineError::InvalidParameter {
                field: "duration",
                value: duration,
            });
        }
        self.timeline.duration = duration;
        self.timeline.current_time = self.timeline.current_time.min(duration);
        Ok(())
    }

    // ── Transport ───────────────────────────────────────────

    pub fn play(&mut self, now: f64) {
        self.with_playback(|sched, timeline, pb| sched.play(now, timeline, pb));
    }

    pub fn pause(&mut self, now: f64) {
        if self.holder.is_created() {
            self.with_playback(|sched, timeline, pb| sched.pause(now, timeline, pb));
            self.keep_polling();
        }
    }

    pub fn stop(&mut self) {
        if self.holder.is_created() {
            self.with_playback(|sched, timeline, pb| sched.stop(timeline, pb));
            self.keep_polling();
        } else {
            self.timeline.current_time = 0.0;
            self.timeline.is_playing = false;
        }
    }

    pub fn seek(&mut self, time: f64, now: f64) {
        self.with_playback(|sched, timeline, pb| sched.seek(time, now, timeline, pb));
        self.keep_polling();
    }

    /// Set the loop region. Does not change whether looping is enabled.
    pub fn set_loop_points(&mut self, start: f64, end: f64) -> Result<(), EngineError> {
        self.timeline.check_loop(start, end)?;
        self.timeline.loop_region.start = start;
        self.timeline.loop_region.end = end;
        Ok(())
    }

    /// Flip looping on or off, returning the new setting.
    pub fn toggle_loop(&mut self) -> bool {
        let region = &mut self.timeline.loop_region;
        region.enabled = !region.enabled;
        log::debug!("Loop {}", if region.enabled { "enabled" } else { "disabled" });
        region.enabled
    }

    /// Voices outside the transport (previews) still need polling for cleanup.
    fn keep_polling(&mut self) {
        if !self.voices.is_empty() {
            self.scheduler.frame_mut().request();
        }
    }

    /// Run one frame if one was requested. Returns whether another is wanted.
    pub fn frame(&mut self, now: f64) -> bool {
        if !self.scheduler.frame_mut().take() {
            return false;
        }
        let Some(ctx) = self.holder.existing() else {
            return false;
        };
        if ctx.resume_requested() {
            if let Err(e) = ctx.resume() {
                log::error!("Could not resume audio context: {e}");
            }
        }
        let mut pb = Playback {
            ctx,
            voices: &mut self.voices,
            sounds: &self.sounds,
        };
        self.scheduler.tick(now, &mut self.timeline, &mut pb);
        self.keep_polling();
        self.scheduler.frame().is_pending()
    }

    /// Pull `frames` of live output, as an audio callback would.
    pub fn pull_audio(&mut self, frames: usize) -> Result<StereoBuffer, EngineError> {
        self.holder.get().render(frames)
    }

    /// The user-gesture resume.
    pub fn resume_audio(&mut self) -> Result<(), EngineError> {
        self.holder.get().resume()
    }

    // ── Preview ─────────────────────────────────────────────

    /// Play a sound once, outside the timeline. Re-previewing restarts it.
    pub fn preview_sound(&mut self, sound_id: &str, now: f64) -> Result<(), EngineError> {
        let sound = self
            .sounds
            .iter()
            .find(|s| s.id == sound_id)
            .ok_or_else(|| EngineError::UnknownSound {
                id: sound_id.to_string(),
            })?;
        let ctx = self.holder.get();
        ctx.request_resume();
        self.voices.play(
            ctx,
            VoiceKey::preview(sound_id),
            sound,
            ChannelMix::default(),
            0.0,
            now,
        )?;
        self.scheduler.frame_mut().request();
        Ok(())
    }

    pub fn stop_preview(&mut self, sound_id: &str) -> bool {
        match self.holder.existing() {
            Some(ctx) => self.voices.stop(ctx, &VoiceKey::preview(sound_id)),
            None => false,
        }
    }

    /// Stop the transport and every voice, leaving no timer or frame armed.
    pub fn shutdown(&mut self) {
        self.stop();
        if let Some(ctx) = self.holder.existing() {
            self.voices.stop_all(ctx);
        }
        self.scheduler.frame_mut().cancel();
    }

    // ── Export ──────────────────────────────────────────────

    /// Render the timeline offline and encode it.
    pub fn export(
        &self,
        format: ExportFormat,
        options: RenderOptions,
        progress: &mut dyn FnMut(f64),
    ) -> Result<EncodedAudio, EngineError> {
        log::info!("Exporting timeline as {format}");
        let buffer =
            render_timeline(&self.timeline, &self.sounds, options, &self.config, progress)?;
        self.encoders.encode(format, &buffer)
    }

    /// Render and encode a single sound.
    pub fn export_sound(
        &self,
        sound_id: &str,
        format: ExportFormat,
    ) -> Result<EncodedAudio, EngineError> {
        let sound = self.sound(sound_id).ok_or_else(|| EngineError::UnknownSound {
            id: sound_id.to_string(),
        })?;
        let buffer = render_sound(sound, true, &self.config)?;
        self.encoders.encode(format, &buffer)
    }

    // ── Persistence and presets ─────────────────────────────

    /// Replace sounds and presets with a persisted document.
    pub fn hydrate(&mut self, state: PersistedState) {
        self.shutdown();
        log::info!(
            "Hydrating {} sounds, {} presets, {} timeline presets",
            state.sounds.len(),
            state.presets.len(),
            state.timeline_presets.len()
        );
        self.sounds = state.sounds;
        self.presets = state.presets;
        self.timeline_presets = state.timeline_presets;
    }

    pub fn snapshot(&self) -> PersistedState {
        PersistedState {
            sounds: self.sounds.clone(),
            presets: self.presets.clone(),
            timeline_presets: self.timeline_presets.clone(),
        }
    }

    /// Replace the timeline, stopping whatever it was playing.
    pub fn set_timeline(&mut self, timeline: TimelineState) {
        self.stop();
        self.timeline = TimelineState {
            current_time: 0.0,
            is_playing: false,
            ..timeline
        };
    }

    pub fn save_preset(
        &mut self,
        sound_id: &str,
        name: impl Into<String>,
        saved_at: f64,
    ) -> Result<String, EngineError> {
        let sound = self.sound(sound_id).ok_or_else(|| EngineError::UnknownSound {
            id: sound_id.to_string(),
        })?;
        let preset = Preset::capture(name, sound, saved_at);
        let id = preset.id.clone();
        self.presets.push(preset);
        Ok(id)
    }

    /// Add the preset's sound under a fresh id, returning that id.
    pub fn load_preset(&mut self, preset_id: &str) -> Result<String, EngineError> {
        let sound = self
            .presets
            .iter()
            .find(|p| p.id == preset_id)
            .map(Preset::instantiate)
            .ok_or_else(|| EngineError::UnknownPreset {
                id: preset_id.to_string(),
            })?;
        Ok(self.add_sound(sound))
    }

    pub fn delete_preset(&mut self, preset_id: &str) -> bool {
        let before = self.presets.len();
        self.presets.retain(|p| p.id != preset_id);
        self.presets.len() != before
    }

    pub fn save_timeline_preset(&mut self, name: impl Into<String>, saved_at: f64) -> String {
        let preset = TimelinePreset::capture(name, &self.timeline, &self.sounds, saved_at);
        let id = preset.id.clone();
        self.timeline_presets.push(preset);
        id
    }

    /// Append the preset's tracks and sounds under fresh ids. Returns the
    /// new track ids.
    pub fn load_timeline_preset(&mut self, preset_id: &str) -> Result<Vec<String>, EngineError> {
        let (tracks, sounds) = self
            .timeline_presets
            .iter()
            .find(|p| p.id == preset_id)
            .map(TimelinePreset::instantiate)
            .ok_or_else(|| EngineError::UnknownPreset {
                id: preset_id.to_string(),
            })?;
        self.sounds.extend(sounds);
        let ids = tracks.iter().map(|t| t.id.clone()).collect();
        self.timeline.tracks.extend(tracks);
        Ok(ids)
    }

    pub fn delete_timeline_preset(&mut self, preset_id: &str) -> bool {
        let before = self.timeline_presets.len();
        self.timeline_presets.retain(|p| p.id != preset_id);
        self.timeline_presets.len() != before
    }
}
